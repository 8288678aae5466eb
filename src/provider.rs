//! Provider side of the key exchange
//!
//! The provider holds the cluster encryption key and releases it to peers
//! that prove, via remote attestation, that they are trusted enclaves and
//! that the public key in the request is the one their report is bound to.
//! The binding check is the load-bearing step: without it a man in the
//! middle could swap its own public key into an otherwise valid request.
//!
//! Handlers are stateless and share only the immutable key and the
//! enclave runtime, so concurrent exchanges need no coordination.

use crate::crypto;
use crate::enclave::EnclaveRuntime;
use crate::error::{KeyManagerError, Result};
use crate::provision::EncryptionKey;
use crate::wire::{AttestationEvidence, KeyExchangeRequest, KeyExchangeResponse};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::sync::Arc;
use tracing::{info, warn};

/// Handler for inbound key exchange requests
pub struct KeyProvider {
    runtime: Arc<dyn EnclaveRuntime>,
    local_key: EncryptionKey,
}

impl KeyProvider {
    /// Creates a provider releasing `local_key` to attested requesters
    pub fn new(runtime: Arc<dyn EnclaveRuntime>, local_key: EncryptionKey) -> Self {
        Self { runtime, local_key }
    }

    /// Handles one key exchange request body.
    ///
    /// Errors map onto HTTP statuses via [`response_status`]; the response
    /// sent to the requester never explains *why* verification failed.
    pub fn handle_exchange(&self, body: &[u8]) -> Result<KeyExchangeResponse> {
        let request: KeyExchangeRequest = serde_json::from_slice(body)
            .map_err(|e| KeyManagerError::Protocol(format!("malformed exchange request: {}", e)))?;
        let evidence: AttestationEvidence = serde_json::from_slice(&request.attestation)
            .map_err(|e| {
                KeyManagerError::Protocol(format!("malformed attestation evidence: {}", e))
            })?;

        let verified = self.runtime.verify_remote_report(&evidence.report)?;

        let expected_digest = crypto::sha256(&request.public_key);
        if !verified.data.starts_with(&expected_digest) {
            warn!(
                digest = %hex::encode(expected_digest),
                "attestation user data is not bound to the presented public key"
            );
            return Err(KeyManagerError::BindingMismatch);
        }

        let pubkey = crypto::deserialize_public_key(&request.public_key)?;
        let encrypted = crypto::encrypt_with_public_key(self.local_key.as_bytes(), &pubkey)?;

        info!(
            digest = %hex::encode(expected_digest),
            "releasing encryption key to attested requester"
        );
        Ok(KeyExchangeResponse {
            encrypted_key: STANDARD.encode(encrypted),
        })
    }
}

/// HTTP status the exchange endpoint returns for a handler error.
///
/// Attestation failures are deliberately indistinguishable beyond the
/// status code; the detail stays in the provider's own logs.
pub fn response_status(err: &KeyManagerError) -> u16 {
    match err {
        KeyManagerError::Protocol(_)
        | KeyManagerError::BindingMismatch
        | KeyManagerError::Serialization(_) => 400,
        KeyManagerError::Attestation(_) => 401,
        _ => 500,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-process HTTP listeners for exchange tests

    use super::*;
    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{body::Incoming, Request, Response};
    use hyper_util::rt::TokioIo;
    use std::convert::Infallible;
    use tokio::net::TcpListener;

    async fn spawn<F>(handler: F) -> String
    where
        F: Fn(Vec<u8>) -> (u16, Vec<u8>) + Clone + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind listener");
        let addr = listener.local_addr().expect("Failed to read local addr");

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let handler = handler.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let handler = handler.clone();
                        async move {
                            let body = req
                                .collect()
                                .await
                                .map(|b| b.to_bytes().to_vec())
                                .unwrap_or_default();
                            let (status, body) = handler(body);
                            let response = Response::builder()
                                .status(status)
                                .header("Content-Type", "application/json")
                                .body(Full::new(Bytes::from(body)))
                                .unwrap();
                            Ok::<_, Infallible>(response)
                        }
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        format!("http://{}", addr)
    }

    /// Serves a [`KeyProvider`] the way the binary mounts it
    pub(crate) async fn spawn_provider(provider: KeyProvider) -> String {
        let provider = Arc::new(provider);
        spawn(move |body| match provider.handle_exchange(&body) {
            Ok(response) => (200, serde_json::to_vec(&response).unwrap()),
            Err(e) => (response_status(&e), Vec::new()),
        })
        .await
    }

    /// Serves a fixed status and body regardless of the request
    pub(crate) async fn spawn_canned_responder(status: u16, body: String) -> String {
        spawn(move |_| (status, body.clone().into_bytes())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enclave::{LocalEnclave, REPORT_USER_DATA_LEN};
    use rsa::RsaPublicKey;
    use zeroize::Zeroizing;

    fn provider_with_key(key_bytes: &[u8]) -> KeyProvider {
        KeyProvider::new(
            Arc::new(LocalEnclave::new()),
            EncryptionKey::new(Zeroizing::new(key_bytes.to_vec())),
        )
    }

    /// Builds the request a well-behaved requester would send for `pubkey_der`
    fn attested_request(runtime: &LocalEnclave, pubkey_der: Vec<u8>) -> Vec<u8> {
        let digest = crypto::sha256(&pubkey_der);
        let mut user_data = [0u8; REPORT_USER_DATA_LEN];
        user_data[..digest.len()].copy_from_slice(&digest);
        let report = runtime
            .get_remote_report(&user_data)
            .expect("Failed to get report");

        let evidence = AttestationEvidence {
            report,
            pub_key: pubkey_der.clone(),
            enclave_id: String::new(),
            host_address: String::new(),
        };
        let request = KeyExchangeRequest {
            public_key: pubkey_der,
            attestation: serde_json::to_vec(&evidence).unwrap(),
        };
        serde_json::to_vec(&request).unwrap()
    }

    #[test]
    fn test_exchange_releases_key_to_attested_requester() {
        let local_key = b"\xaa".repeat(32);
        let provider = provider_with_key(&local_key);
        let runtime = LocalEnclave::new();

        let privkey = crypto::generate_keypair().expect("Failed to generate keypair");
        let pubkey_der =
            crypto::serialize_public_key(&RsaPublicKey::from(&privkey)).expect("Failed to serialize");
        let body = attested_request(&runtime, pubkey_der);

        let response = provider
            .handle_exchange(&body)
            .expect("Failed to handle exchange");

        let ciphertext = STANDARD.decode(&response.encrypted_key).expect("Bad base64");
        let decrypted =
            crypto::decrypt_with_private_key(&ciphertext, &privkey).expect("Failed to decrypt");
        assert_eq!(decrypted, local_key);
    }

    #[test]
    fn test_substituted_public_key_is_rejected() {
        let provider = provider_with_key(&[0xaa; 32]);
        let runtime = LocalEnclave::new();

        // evidence is bound to key A, but the request body presents key B
        let key_a = crypto::generate_keypair().expect("Failed to generate keypair");
        let key_b = crypto::generate_keypair().expect("Failed to generate keypair");
        let der_a =
            crypto::serialize_public_key(&RsaPublicKey::from(&key_a)).expect("Failed to serialize");
        let der_b =
            crypto::serialize_public_key(&RsaPublicKey::from(&key_b)).expect("Failed to serialize");

        let digest_a = crypto::sha256(&der_a);
        let mut user_data = [0u8; REPORT_USER_DATA_LEN];
        user_data[..digest_a.len()].copy_from_slice(&digest_a);
        let report = runtime
            .get_remote_report(&user_data)
            .expect("Failed to get report");

        let evidence = AttestationEvidence {
            report,
            pub_key: der_a,
            enclave_id: String::new(),
            host_address: String::new(),
        };
        let request = KeyExchangeRequest {
            public_key: der_b,
            attestation: serde_json::to_vec(&evidence).unwrap(),
        };

        let err = provider
            .handle_exchange(&serde_json::to_vec(&request).unwrap())
            .unwrap_err();
        assert!(matches!(err, KeyManagerError::BindingMismatch));
        assert_eq!(response_status(&err), 400);
    }

    #[test]
    fn test_tampered_report_is_rejected_opaquely() {
        let provider = provider_with_key(&[0xaa; 32]);
        let runtime = LocalEnclave::new();

        let privkey = crypto::generate_keypair().expect("Failed to generate keypair");
        let pubkey_der =
            crypto::serialize_public_key(&RsaPublicKey::from(&privkey)).expect("Failed to serialize");
        let digest = crypto::sha256(&pubkey_der);
        let mut user_data = [0u8; REPORT_USER_DATA_LEN];
        user_data[..digest.len()].copy_from_slice(&digest);
        let mut report = runtime
            .get_remote_report(&user_data)
            .expect("Failed to get report");
        let last = report.len() - 1;
        report[last] ^= 0xff;

        let evidence = AttestationEvidence {
            report,
            pub_key: pubkey_der.clone(),
            enclave_id: String::new(),
            host_address: String::new(),
        };
        let request = KeyExchangeRequest {
            public_key: pubkey_der,
            attestation: serde_json::to_vec(&evidence).unwrap(),
        };

        let err = provider
            .handle_exchange(&serde_json::to_vec(&request).unwrap())
            .unwrap_err();
        assert!(matches!(err, KeyManagerError::Attestation(_)));
        assert_eq!(response_status(&err), 401);
    }

    #[test]
    fn test_malformed_body_is_bad_request() {
        let provider = provider_with_key(&[0xaa; 32]);
        let err = provider.handle_exchange(b"not json").unwrap_err();
        assert!(matches!(err, KeyManagerError::Protocol(_)));
        assert_eq!(response_status(&err), 400);
    }

    #[test]
    fn test_non_rsa_public_key_is_rejected() {
        let provider = provider_with_key(&[0xaa; 32]);
        let runtime = LocalEnclave::new();

        // attested correctly, but the bound bytes are not an RSA key
        let body = attested_request(&runtime, b"not a der public key".to_vec());
        let err = provider.handle_exchange(&body).unwrap_err();
        assert!(matches!(err, KeyManagerError::Protocol(_)));
        assert_eq!(response_status(&err), 400);
    }
}
