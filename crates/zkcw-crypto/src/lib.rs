//! Session cryptography for the client/worker channel.
//!
//! - `keys`: per-session key pairs and channel key agreement
//! - `channel`: sealed payload envelopes
//! - `fingerprint`: stable digests of transaction artifacts

pub mod channel;
pub mod keys;

use serde_json::Value;
use sha3::{Digest, Keccak256};
use zkcw_types::{bytes_to_hex, Hex, Result};

pub use channel::Envelope;
pub use keys::{ChannelKey, PublicKey, SessionKeyPair};

/// keccak256 over the JSON encoding of `value`.
///
/// Object keys serialize in sorted order, so equal values always share a
/// fingerprint regardless of how they were built.
pub fn fingerprint(value: &Value) -> Result<Hex> {
    let encoded = serde_json::to_vec(value)?;
    Ok(bytes_to_hex(&Keccak256::digest(&encoded)))
}
