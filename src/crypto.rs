//! Signature verification, nonce generation, and credential hashing.
//!
//! All key material enters the server as lowercase hex. Lengths are checked
//! strictly (32-byte public keys, 64-byte signatures) before any call into
//! `ed25519-dalek`.

use std::fmt;

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

pub const PUBLIC_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;
pub const NONCE_LEN: usize = 32;

#[derive(Debug)]
pub enum CryptoError {
    InvalidLength(&'static str),
    InvalidKey,
    InvalidSignature,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CryptoError::InvalidLength(message) => write!(f, "invalid length: {message}"),
            CryptoError::InvalidKey => write!(f, "invalid public key"),
            CryptoError::InvalidSignature => write!(f, "invalid signature"),
        }
    }
}

impl std::error::Error for CryptoError {}

/// Decode a hex public key, enforcing the 32-byte length.
pub fn decode_public_key_hex(hex_str: &str) -> Result<[u8; PUBLIC_KEY_LEN], CryptoError> {
    let bytes = hex::decode(hex_str).map_err(|_| CryptoError::InvalidLength("invalid hex"))?;
    if bytes.len() != PUBLIC_KEY_LEN {
        return Err(CryptoError::InvalidLength("public key must be 32 bytes"));
    }
    let mut key_bytes = [0u8; PUBLIC_KEY_LEN];
    key_bytes.copy_from_slice(&bytes);
    Ok(key_bytes)
}

/// Decode a hex detached signature, enforcing the 64-byte length.
pub fn decode_signature_hex(hex_str: &str) -> Result<[u8; SIGNATURE_LEN], CryptoError> {
    let bytes = hex::decode(hex_str).map_err(|_| CryptoError::InvalidLength("invalid hex"))?;
    if bytes.len() != SIGNATURE_LEN {
        return Err(CryptoError::InvalidLength("signature must be 64 bytes"));
    }
    let mut sig_bytes = [0u8; SIGNATURE_LEN];
    sig_bytes.copy_from_slice(&bytes);
    Ok(sig_bytes)
}

/// Verify a detached Ed25519 signature over `message`.
pub fn verify_detached(
    public_key: &[u8; PUBLIC_KEY_LEN],
    message: &[u8],
    signature: &[u8; SIGNATURE_LEN],
) -> Result<(), CryptoError> {
    let verifying_key = VerifyingKey::from_bytes(public_key).map_err(|_| CryptoError::InvalidKey)?;
    let signature = Signature::from_bytes(signature);
    verifying_key
        .verify(message, &signature)
        .map_err(|_| CryptoError::InvalidSignature)
}

/// Generate a fresh 32-byte challenge nonce.
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// SHA-256 of a bearer credential, hex-encoded.
///
/// This hash is the only key the rate limiter ever sees; the raw token, the
/// account it maps to, and the request origin stay out of the counter store.
pub fn credential_hash(credential: &str) -> String {
    hex::encode(Sha256::digest(credential.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    #[test]
    fn decode_public_key_rejects_bad_input() {
        assert!(decode_public_key_hex("zz").is_err());
        assert!(decode_public_key_hex("0102").is_err());
        let ok = decode_public_key_hex(&"ab".repeat(32)).unwrap();
        assert_eq!(ok.len(), 32);
    }

    #[test]
    fn decode_signature_enforces_64_bytes() {
        assert!(decode_signature_hex(&"ab".repeat(32)).is_err());
        assert!(decode_signature_hex(&"ab".repeat(64)).is_ok());
    }

    #[test]
    fn verify_accepts_valid_and_rejects_tampered() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public = signing_key.verifying_key().to_bytes();
        let message = b"challenge bytes";
        let signature = signing_key.sign(message).to_bytes();

        assert!(verify_detached(&public, message, &signature).is_ok());
        assert!(verify_detached(&public, b"other bytes", &signature).is_err());

        let mut flipped = signature;
        flipped[0] ^= 0x01;
        assert!(verify_detached(&public, message, &flipped).is_err());
    }

    #[test]
    fn nonces_differ_between_calls() {
        assert_ne!(generate_nonce(), generate_nonce());
    }

    #[test]
    fn credential_hash_is_stable_hex() {
        let h = credential_hash("bearer-token");
        assert_eq!(h.len(), 64);
        assert_eq!(h, credential_hash("bearer-token"));
        assert_ne!(h, credential_hash("other-token"));
    }
}
