//! RSA-OAEP primitives for the key exchange
//!
//! The exchange wraps the cluster encryption key under an ephemeral
//! RSA-2048 public key using OAEP with SHA-256 and an empty label. Public
//! keys travel as DER-encoded SubjectPublicKeyInfo bytes.

use crate::error::{KeyManagerError, Result};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

/// RSA modulus size used for ephemeral exchange keypairs
pub const RSA_KEY_BITS: usize = 2048;

/// Generates a fresh RSA-2048 private key
pub fn generate_keypair() -> Result<RsaPrivateKey> {
    let mut rng = rand::rngs::OsRng;
    RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
        .map_err(|e| KeyManagerError::Crypto(format!("RSA key generation failed: {}", e)))
}

/// Serializes an RSA public key to DER-encoded SubjectPublicKeyInfo bytes
pub fn serialize_public_key(pubkey: &RsaPublicKey) -> Result<Vec<u8>> {
    let der = pubkey
        .to_public_key_der()
        .map_err(|e| KeyManagerError::Crypto(format!("failed to serialize public key: {}", e)))?;
    Ok(der.as_bytes().to_vec())
}

/// Parses DER-encoded SubjectPublicKeyInfo bytes into an RSA public key.
///
/// Non-RSA keys and malformed DER are rejected.
pub fn deserialize_public_key(der: &[u8]) -> Result<RsaPublicKey> {
    RsaPublicKey::from_public_key_der(der)
        .map_err(|e| KeyManagerError::Protocol(format!("not an RSA public key: {}", e)))
}

/// Encrypts data under a public key with RSA-OAEP(SHA-256, empty label)
pub fn encrypt_with_public_key(msg: &[u8], pubkey: &RsaPublicKey) -> Result<Vec<u8>> {
    let mut rng = rand::rngs::OsRng;
    pubkey
        .encrypt(&mut rng, Oaep::new::<Sha256>(), msg)
        .map_err(|e| KeyManagerError::Crypto(format!("RSA-OAEP encryption failed: {}", e)))
}

/// Decrypts data with a private key under RSA-OAEP(SHA-256, empty label)
pub fn decrypt_with_private_key(ciphertext: &[u8], privkey: &RsaPrivateKey) -> Result<Vec<u8>> {
    privkey
        .decrypt(Oaep::new::<Sha256>(), ciphertext)
        .map_err(|e| KeyManagerError::Crypto(format!("RSA-OAEP decryption failed: {}", e)))
}

/// SHA-256 digest
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}
