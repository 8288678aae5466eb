//! Error types for enclave key provisioning

use thiserror::Error;

/// Errors surfaced by key provisioning and the key exchange protocol
#[derive(Error, Debug)]
pub enum KeyManagerError {
    #[error("no sealed encryption key found: {0}")]
    NoSealedKey(String),

    #[error("key exchange with peer failed: {0}")]
    PeerFetch(String),

    #[error("attestation report is not bound to the presented public key")]
    BindingMismatch,

    #[error("failed to seal encryption key: {0}")]
    SealFailed(String),

    #[error("cryptographic error: {0}")]
    Crypto(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("attestation error: {0}")]
    Attestation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, KeyManagerError>;
