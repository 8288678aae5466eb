//! Requester side of the key exchange
//!
//! A freshly started node without a key asks a peer enclave for it:
//!
//! 1. Generate an ephemeral RSA-2048 key pair
//! 2. Bind the SHA-256 digest of the DER public key into an attestation
//!    report, zero-padded to the report's user-data width
//! 3. POST the public key and the report to the peer's exchange endpoint
//! 4. Decrypt the returned key under the ephemeral private key
//!
//! The ephemeral key pair lives for exactly one attempt and is dropped on
//! every exit path. There are no retries; the caller restarts the node
//! instead.

use crate::crypto;
use crate::enclave::{EnclaveRuntime, REPORT_USER_DATA_LEN};
use crate::error::{KeyManagerError, Result};
use crate::wire::{
    AttestationEvidence, KeyExchangeRequest, KeyExchangeResponse, API_VERSION_PREFIX,
    PATH_KEY_EXCHANGE,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rsa::RsaPublicKey;
use std::time::Duration;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Total deadline for the exchange round-trip
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on the provider's response body
const MAX_RESPONSE_BYTES: usize = 64 * 1024;

/// How much of a non-OK response body is quoted in errors
const ERROR_BODY_PREFIX: usize = 256;

/// Fetches the cluster encryption key from the peer at `peer_url`.
///
/// Any failure aborts the exchange; the error is wrapped by the caller's
/// provisioning policy.
pub async fn fetch_key(
    peer_url: &str,
    runtime: &dyn EnclaveRuntime,
) -> Result<Zeroizing<Vec<u8>>> {
    let privkey = crypto::generate_keypair()?;
    let pubkey = RsaPublicKey::from(&privkey);
    debug!("generated ephemeral RSA key pair for key exchange");

    let public_key_der = crypto::serialize_public_key(&pubkey)?;

    let digest = crypto::sha256(&public_key_der);
    let mut user_data = [0u8; REPORT_USER_DATA_LEN];
    user_data[..digest.len()].copy_from_slice(&digest);
    let report = runtime.get_remote_report(&user_data)?;

    let evidence = AttestationEvidence {
        report,
        pub_key: public_key_der.clone(),
        enclave_id: String::new(),
        host_address: String::new(),
    };
    let attestation = serde_json::to_vec(&evidence)?;

    let request = KeyExchangeRequest {
        public_key: public_key_der,
        attestation,
    };
    let url = format!(
        "{}{}{}",
        peer_url.trim_end_matches('/'),
        API_VERSION_PREFIX,
        PATH_KEY_EXCHANGE
    );
    info!(url = %url, "requesting encryption key from key provider");

    let client = reqwest::Client::builder()
        .timeout(EXCHANGE_TIMEOUT)
        .build()
        .map_err(|e| KeyManagerError::Protocol(format!("failed to build HTTP client: {}", e)))?;

    let response = client
        .post(&url)
        .json(&request)
        .send()
        .await
        .map_err(|e| KeyManagerError::Protocol(format!("POST {} failed: {}", url, e)))?;

    let status = response.status();
    let body = read_capped(response).await?;
    if !status.is_success() {
        let prefix = String::from_utf8_lossy(&body[..body.len().min(ERROR_BODY_PREFIX)]);
        return Err(KeyManagerError::Protocol(format!(
            "key provider returned {}: {}",
            status, prefix
        )));
    }

    let response: KeyExchangeResponse = serde_json::from_slice(&body)
        .map_err(|e| KeyManagerError::Protocol(format!("malformed key provider response: {}", e)))?;

    let encrypted_key = STANDARD
        .decode(&response.encrypted_key)
        .map_err(|e| KeyManagerError::Protocol(format!("malformed encrypted key: {}", e)))?;

    let key = crypto::decrypt_with_private_key(&encrypted_key, &privkey).map(Zeroizing::new)?;
    info!("received and decrypted encryption key from key provider");
    Ok(key)
}

/// Reads a response body to completion, failing once it exceeds
/// [`MAX_RESPONSE_BYTES`] rather than buffering an unbounded payload.
async fn read_capped(mut response: reqwest::Response) -> Result<Vec<u8>> {
    if let Some(len) = response.content_length() {
        if len > MAX_RESPONSE_BYTES as u64 {
            return Err(KeyManagerError::Protocol(format!(
                "response body of {} bytes exceeds cap of {}",
                len, MAX_RESPONSE_BYTES
            )));
        }
    }

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| KeyManagerError::Protocol(format!("failed to read response body: {}", e)))?
    {
        if body.len() + chunk.len() > MAX_RESPONSE_BYTES {
            return Err(KeyManagerError::Protocol(format!(
                "response body exceeds cap of {} bytes",
                MAX_RESPONSE_BYTES
            )));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enclave::LocalEnclave;
    use crate::provider::testing::{spawn_canned_responder, spawn_provider};
    use crate::provider::KeyProvider;
    use crate::provision::EncryptionKey;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fetch_key_happy_path() {
        let key = EncryptionKey::generate().expect("Failed to generate key");
        let expected = key.as_bytes().to_vec();
        let peer_url = spawn_provider(KeyProvider::new(Arc::new(LocalEnclave::new()), key)).await;

        let runtime = LocalEnclave::new();
        let fetched = fetch_key(&peer_url, &runtime)
            .await
            .expect("Failed to fetch key");
        assert_eq!(&fetched[..], &expected[..]);
    }

    #[tokio::test]
    async fn test_fetch_key_tolerates_trailing_slash() {
        let key = EncryptionKey::generate().expect("Failed to generate key");
        let peer_url = spawn_provider(KeyProvider::new(Arc::new(LocalEnclave::new()), key)).await;

        let runtime = LocalEnclave::new();
        let fetched = fetch_key(&format!("{}/", peer_url), &runtime).await;
        assert!(fetched.is_ok());
    }

    #[tokio::test]
    async fn test_non_ok_status_carries_bounded_body() {
        let peer_url = spawn_canned_responder(503, "x".repeat(4096)).await;

        let runtime = LocalEnclave::new();
        let err = fetch_key(&peer_url, &runtime).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("503"));
        assert!(message.len() < 1024);
    }

    #[tokio::test]
    async fn test_malformed_response_body_rejected() {
        let peer_url = spawn_canned_responder(200, "not json".to_string()).await;

        let runtime = LocalEnclave::new();
        let err = fetch_key(&peer_url, &runtime).await.unwrap_err();
        assert!(matches!(err, KeyManagerError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_malformed_base64_key_rejected() {
        let peer_url =
            spawn_canned_responder(200, r#"{"encrypted_key":"!!not-base64!!"}"#.to_string()).await;

        let runtime = LocalEnclave::new();
        let err = fetch_key(&peer_url, &runtime).await.unwrap_err();
        assert!(matches!(err, KeyManagerError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_oversized_response_rejected() {
        let peer_url = spawn_canned_responder(200, "x".repeat(MAX_RESPONSE_BYTES + 1)).await;

        let runtime = LocalEnclave::new();
        let err = fetch_key(&peer_url, &runtime).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("cap"));
    }
}
