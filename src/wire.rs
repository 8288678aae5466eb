//! Wire types for the key exchange endpoint
//!
//! These types are shared by the requester and provider sides of the
//! exchange. Byte-valued fields travel as standard-alphabet padded base64
//! strings inside the JSON envelope.

use serde::{Deserialize, Serialize};

/// Path of the key exchange endpoint, mounted under [`API_VERSION_PREFIX`]
pub const PATH_KEY_EXCHANGE: &str = "/key-exchange";

/// Version prefix shared by all endpoints of the service
pub const API_VERSION_PREFIX: &str = "/v1";

/// Attestation report carrier sent alongside the requester's public key.
///
/// The `enclave_id` and `host_address` fields are not consulted by the
/// exchange; they are kept for schema compatibility with the wider
/// attestation type used elsewhere in the network and travel empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationEvidence {
    /// Raw attestation report bytes from the enclave platform
    #[serde(with = "base64_bytes")]
    pub report: Vec<u8>,
    /// The DER-encoded public key the report is bound to, echoed for
    /// consumers of the wider schema
    #[serde(with = "base64_bytes", default)]
    pub pub_key: Vec<u8>,
    /// Placeholder identity field, unused for the exchange
    #[serde(default)]
    pub enclave_id: String,
    /// Placeholder address field, unused for the exchange
    #[serde(default)]
    pub host_address: String,
}

/// Request sent from the key requester to the key provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyExchangeRequest {
    /// DER-encoded SubjectPublicKeyInfo bytes of the requester's ephemeral
    /// RSA public key
    #[serde(with = "base64_bytes")]
    pub public_key: Vec<u8>,
    /// JSON-serialized [`AttestationEvidence`]
    #[serde(with = "base64_bytes")]
    pub attestation: Vec<u8>,
}

/// Response sent from the key provider back to the requester
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyExchangeResponse {
    /// Base64-encoded RSA-OAEP ciphertext of the encryption key
    pub encrypted_key: String,
}

/// Serde adapter encoding `Vec<u8>` fields as padded standard base64 strings
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
