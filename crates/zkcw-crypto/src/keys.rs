//! Session key pairs on the BN254 G1 curve and channel key derivation.
//!
//! Flow: random scalar sk → pk = sk·G → shared = sk·peer_pk
//!       → HKDF-SHA256(salt, compress(shared), info:context) → 32-byte channel key

use ark_bn254::{Fr, G1Affine, G1Projective};
use ark_ec::{AffineRepr, CurveGroup, PrimeGroup};
use ark_ff::Zero;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::UniformRand;
use hkdf::Hkdf;
use sha2::Sha256;
use std::fmt;
use zkcw_types::{bytes_to_hex, hex_to_bytes, CloudError, Result};

const HKDF_SALT: &[u8] = b"zkcw.session";
const HKDF_INFO: &str = "zkcw.channel";

/// Length of a compressed public key.
pub const PUBLIC_KEY_LEN: usize = 32;

/// A session public key (compressed G1 point on the wire).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(G1Affine);

impl PublicKey {
    pub fn to_bytes(&self) -> Result<[u8; PUBLIC_KEY_LEN]> {
        let mut buf = Vec::with_capacity(PUBLIC_KEY_LEN);
        self.0
            .serialize_compressed(&mut buf)
            .map_err(|e| CloudError::Crypto(e.to_string()))?;
        buf.try_into()
            .map_err(|_| CloudError::Crypto("unexpected compressed point length".into()))
    }

    pub fn to_hex(&self) -> Result<String> {
        Ok(bytes_to_hex(&self.to_bytes()?))
    }

    /// Parse a compressed point, rejecting off-curve points and the identity.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex_to_bytes(hex_str)?;
        if bytes.len() != PUBLIC_KEY_LEN {
            return Err(CloudError::Crypto(format!(
                "public key must be {} bytes, got {}",
                PUBLIC_KEY_LEN,
                bytes.len()
            )));
        }
        let point = G1Affine::deserialize_compressed(bytes.as_slice())
            .map_err(|e| CloudError::Crypto(format!("invalid public key: {}", e)))?;
        if point.is_zero() {
            return Err(CloudError::Crypto("public key is the identity point".into()));
        }
        Ok(Self(point))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_hex() {
            Ok(hex) => write!(f, "PublicKey({})", hex),
            Err(_) => f.write_str("PublicKey(<invalid>)"),
        }
    }
}

/// Secret scalar. Never serialized, never printed.
pub struct SecretKey(Fr);

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey([redacted])")
    }
}

/// Symmetric key for sealing payloads between a client and one worker instance.
#[derive(Clone, PartialEq, Eq)]
pub struct ChannelKey(pub(crate) [u8; 32]);

impl fmt::Debug for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChannelKey([redacted])")
    }
}

/// Fresh key pair generated for a single session.
#[derive(Debug)]
pub struct SessionKeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl SessionKeyPair {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut sk = Fr::rand(&mut rng);
        while sk.is_zero() {
            sk = Fr::rand(&mut rng);
        }
        let pk = (G1Projective::generator() * sk).into_affine();
        Self {
            secret: SecretKey(sk),
            public: PublicKey(pk),
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// ECDH against the peer key, expanded with HKDF under `context`
    /// (the job id, so keys are never shared between worker instances).
    pub fn derive_channel_key(&self, peer: &PublicKey, context: &str) -> Result<ChannelKey> {
        let shared = (peer.0.into_group() * self.secret.0).into_affine();
        if shared.is_zero() {
            return Err(CloudError::Crypto("degenerate shared secret".into()));
        }
        let mut ikm = Vec::with_capacity(PUBLIC_KEY_LEN);
        shared
            .serialize_compressed(&mut ikm)
            .map_err(|e| CloudError::Crypto(e.to_string()))?;

        let info = format!("{}:{}", HKDF_INFO, context);
        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), &ikm);
        let mut okm = [0u8; 32];
        hk.expand(info.as_bytes(), &mut okm)
            .map_err(|e| CloudError::Crypto(format!("key derivation failed: {}", e)))?;
        Ok(ChannelKey(okm))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_sides_derive_the_same_channel_key() {
        let client = SessionKeyPair::generate();
        let worker = SessionKeyPair::generate();

        let k1 = client.derive_channel_key(worker.public_key(), "job-1").unwrap();
        let k2 = worker.derive_channel_key(client.public_key(), "job-1").unwrap();
        assert_eq!(k1, k2);

        let other_job = client.derive_channel_key(worker.public_key(), "job-2").unwrap();
        assert_ne!(k1, other_job);
    }

    #[test]
    fn test_public_key_hex_roundtrip() {
        let pair = SessionKeyPair::generate();
        let hex = pair.public_key().to_hex().unwrap();
        assert_eq!(hex.len(), 2 + 2 * PUBLIC_KEY_LEN);
        assert_eq!(&PublicKey::from_hex(&hex).unwrap(), pair.public_key());
    }

    #[test]
    fn test_rejects_malformed_public_keys() {
        assert!(PublicKey::from_hex("0x1234").is_err());
        assert!(PublicKey::from_hex("not-hex").is_err());
        assert!(PublicKey::from_hex(&format!("0x{}", "ff".repeat(32))).is_err());
    }

    #[test]
    fn test_debug_output_redacts_secrets() {
        let pair = SessionKeyPair::generate();
        let printed = format!("{:?}", pair);
        assert!(printed.contains("[redacted]"));

        let key = pair
            .derive_channel_key(SessionKeyPair::generate().public_key(), "job")
            .unwrap();
        assert_eq!(format!("{:?}", key), "ChannelKey([redacted])");
    }
}
