//! Enclave runtime primitives: attestation and sealing
//!
//! The provisioning protocol consumes the enclave platform through the narrow
//! [`EnclaveRuntime`] interface:
//! - Remote attestation report generation over caller-supplied user data
//! - Report verification, recovering the bound user data
//! - Sealing bytes to hardware-bound storage and unsealing them
//!
//! Production deployments implement the trait over their platform SDK.
//! [`LocalEnclave`] is a software stand-in for development and tests: its
//! reports are tagged blobs with an integrity digest, and its sealer derives
//! an AES-256-GCM key from a fixed label instead of hardware.

use crate::error::{KeyManagerError, Result};
use aes_gcm::{aead::Aead, Aes256Gcm, KeyInit, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

/// Width of the user-data field in an attestation report.
///
/// Callers binding shorter data must zero-pad it to this width; verifiers
/// match against a prefix of the recovered field.
pub const REPORT_USER_DATA_LEN: usize = 64;

/// AES-GCM nonce length used by the software sealer
const SEAL_NONCE_LEN: usize = 12;

/// Tag prefixing every report produced by [`LocalEnclave`]
const LOCAL_REPORT_TAG: &[u8] = b"local-enclave-report-v1:";

/// User data recovered from a verified attestation report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedReport {
    /// The user data bound at report generation time, padded to
    /// [`REPORT_USER_DATA_LEN`] bytes
    pub data: Vec<u8>,
}

/// Narrow interface over the enclave platform primitives
pub trait EnclaveRuntime: Send + Sync {
    /// Produces an attestation report binding `user_data` to this enclave's
    /// measurements. Data shorter than [`REPORT_USER_DATA_LEN`] is zero-padded.
    fn get_remote_report(&self, user_data: &[u8]) -> Result<Vec<u8>>;

    /// Verifies a peer's attestation report and returns the bound user data.
    ///
    /// Verification applies the runtime's measurement policy; reports from
    /// unknown enclaves fail here, and the caller learns nothing beyond the
    /// failure itself.
    fn verify_remote_report(&self, report: &[u8]) -> Result<VerifiedReport>;

    /// Seals plaintext to hardware-bound storage
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Unseals bytes previously produced by [`EnclaveRuntime::seal`]
    fn unseal(&self, sealed: &[u8]) -> Result<Vec<u8>>;
}

/// Software enclave runtime for development and tests
///
/// Reports carry the user data in the clear behind a fixed tag plus an
/// integrity digest, so tampering is detected but nothing is measured.
/// Sealed blobs are AES-256-GCM ciphertexts under a key derived from
/// `seal_label`, laid out as `[ 12-byte nonce | ciphertext ]`.
pub struct LocalEnclave {
    seal_label: String,
}

impl LocalEnclave {
    /// Creates a software runtime sealing under the default label
    pub fn new() -> Self {
        Self::with_seal_label("enclave-keymanager-dev")
    }

    /// Creates a software runtime sealing under a caller-chosen label.
    ///
    /// Two instances with different labels cannot unseal each other's blobs,
    /// mirroring hardware identity binding.
    pub fn with_seal_label(seal_label: impl Into<String>) -> Self {
        warn!("using software enclave runtime; reports and sealing are not hardware-backed");
        Self {
            seal_label: seal_label.into(),
        }
    }

    fn seal_cipher(&self) -> Aes256Gcm {
        let key: [u8; 32] = Sha256::digest(self.seal_label.as_bytes()).into();
        Aes256Gcm::new(&key.into())
    }
}

impl Default for LocalEnclave {
    fn default() -> Self {
        Self::new()
    }
}

impl EnclaveRuntime for LocalEnclave {
    fn get_remote_report(&self, user_data: &[u8]) -> Result<Vec<u8>> {
        if user_data.len() > REPORT_USER_DATA_LEN {
            return Err(KeyManagerError::Attestation(format!(
                "user data exceeds report field: {} > {}",
                user_data.len(),
                REPORT_USER_DATA_LEN
            )));
        }

        let mut padded = [0u8; REPORT_USER_DATA_LEN];
        padded[..user_data.len()].copy_from_slice(user_data);

        let mut report = Vec::with_capacity(LOCAL_REPORT_TAG.len() + REPORT_USER_DATA_LEN + 32);
        report.extend_from_slice(LOCAL_REPORT_TAG);
        report.extend_from_slice(&padded);
        let digest = Sha256::digest(&report);
        report.extend_from_slice(&digest);
        Ok(report)
    }

    fn verify_remote_report(&self, report: &[u8]) -> Result<VerifiedReport> {
        let expected_len = LOCAL_REPORT_TAG.len() + REPORT_USER_DATA_LEN + 32;
        if report.len() != expected_len || !report.starts_with(LOCAL_REPORT_TAG) {
            return Err(KeyManagerError::Attestation(
                "report does not match this runtime's format".to_string(),
            ));
        }

        let (signed, digest) = report.split_at(expected_len - 32);
        if Sha256::digest(signed).as_slice() != digest {
            return Err(KeyManagerError::Attestation(
                "report integrity check failed".to_string(),
            ));
        }

        let data = signed[LOCAL_REPORT_TAG.len()..].to_vec();
        Ok(VerifiedReport { data })
    }

    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; SEAL_NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .seal_cipher()
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| KeyManagerError::Crypto("failed to seal data".to_string()))?;

        let mut sealed = Vec::with_capacity(SEAL_NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn unseal(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < SEAL_NONCE_LEN {
            return Err(KeyManagerError::Crypto(
                "sealed blob is truncated".to_string(),
            ));
        }

        let (nonce, ciphertext) = sealed.split_at(SEAL_NONCE_LEN);
        self.seal_cipher()
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| KeyManagerError::Crypto("failed to unseal data".to_string()))
    }
}
