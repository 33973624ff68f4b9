//! Payload envelopes sealed with NaCl SecretBox (XSalsa20-Poly1305).
//!
//! Sealed layout:
//! 1. nonce = 24 fresh random bytes per message
//! 2. ciphertext = secretbox(json(body), nonce, channel_key)

use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use xsalsa20poly1305::{
    aead::{Aead, KeyInit},
    Key, Nonce, XSalsa20Poly1305,
};

use zkcw_types::{bytes_to_hex, hex_to_bytes, CloudError, Hex, Result};

use crate::keys::ChannelKey;

const NONCE_LEN: usize = 24;

/// A request or response body, either in the clear or sealed for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Envelope {
    Plain { body: Value },
    Sealed { nonce: Hex, ciphertext: Hex },
}

impl Envelope {
    pub fn plain(body: Value) -> Self {
        Envelope::Plain { body }
    }

    pub fn seal(key: &ChannelKey, body: &Value) -> Result<Self> {
        let plaintext = serde_json::to_vec(body)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let cipher = XSalsa20Poly1305::new(Key::from_slice(&key.0));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_slice())
            .map_err(|e| CloudError::Crypto(format!("encryption failed: {}", e)))?;

        Ok(Envelope::Sealed {
            nonce: bytes_to_hex(&nonce_bytes),
            ciphertext: bytes_to_hex(&ciphertext),
        })
    }

    /// Open the envelope. A sealed envelope requires the channel key.
    pub fn open(self, key: Option<&ChannelKey>) -> Result<Value> {
        match self {
            Envelope::Plain { body } => Ok(body),
            Envelope::Sealed { nonce, ciphertext } => {
                let key = key.ok_or_else(|| {
                    CloudError::Handshake("received a sealed payload without a channel key".into())
                })?;
                let nonce_bytes = hex_to_bytes(&nonce)?;
                if nonce_bytes.len() != NONCE_LEN {
                    return Err(CloudError::Crypto(format!(
                        "nonce must be {} bytes, got {}",
                        NONCE_LEN,
                        nonce_bytes.len()
                    )));
                }
                let ciphertext = hex_to_bytes(&ciphertext)?;

                let cipher = XSalsa20Poly1305::new(Key::from_slice(&key.0));
                let plaintext = cipher
                    .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
                    .map_err(|_| CloudError::Handshake("failed to open sealed payload".into()))?;
                Ok(serde_json::from_slice(&plaintext)?)
            }
        }
    }

    /// Open an envelope that must be sealed. A plain envelope is refused.
    pub fn open_sealed(self, key: &ChannelKey) -> Result<Value> {
        if !self.is_sealed() {
            return Err(CloudError::Handshake(
                "expected a sealed payload, received plaintext".into(),
            ));
        }
        self.open(Some(key))
    }

    pub fn is_sealed(&self) -> bool {
        matches!(self, Envelope::Sealed { .. })
    }
}
