//! Startup key provisioning
//!
//! At boot the node resolves the database encryption key through one of
//! three paths selected by `encryption_key_source`:
//!
//! - `""`: unseal the existing key; fail if none is present. This is the
//!   production default and never generates or fetches, so a node cannot
//!   silently reinitialize its key.
//! - `"new"`: use the existing sealed key if one unseals, otherwise generate
//!   a fresh random key. Despite the name this is "use-or-create", which
//!   bootstraps the first node of a cluster.
//! - a URL: fetch the key from the peer enclave at that address via the
//!   attested key exchange.
//!
//! A key obtained from the last two paths is sealed before it is returned,
//! so a crash after provisioning never loses a key that was observed
//! externally.

use crate::config::ProvisionConfig;
use crate::enclave::EnclaveRuntime;
use crate::error::{KeyManagerError, Result};
use crate::keystore::KeyStore;
use crate::requester;
use rand::RngCore;
use std::fmt;
use tracing::{error, info};
use zeroize::Zeroizing;

/// Length of a generated database encryption key
pub const ENCRYPTION_KEY_LEN: usize = 32;

/// The cluster's shared database encryption key.
///
/// The bytes are zeroized on drop and never appear in `Debug` output or
/// logs.
pub struct EncryptionKey(Zeroizing<Vec<u8>>);

impl EncryptionKey {
    /// Wraps already-provisioned key bytes
    pub fn new(bytes: Zeroizing<Vec<u8>>) -> Self {
        Self(bytes)
    }

    /// Generates a fresh uniformly-random key
    pub fn generate() -> Result<Self> {
        let mut bytes = Zeroizing::new(vec![0u8; ENCRYPTION_KEY_LEN]);
        rand::rngs::OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| KeyManagerError::Crypto(format!("key generation failed: {}", e)))?;
        Ok(Self(bytes))
    }

    /// The raw key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Zeroizing<Vec<u8>>> for EncryptionKey {
    fn from(bytes: Zeroizing<Vec<u8>>) -> Self {
        Self::new(bytes)
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionKey(<{} bytes redacted>)", self.0.len())
    }
}

/// Resolves the database encryption key for this node.
///
/// Returns `Ok(None)` when no key is needed (sqlite). Newly generated or
/// fetched keys are sealed before this function returns.
pub async fn provision(
    config: &ProvisionConfig,
    runtime: &dyn EnclaveRuntime,
    store: &KeyStore,
) -> Result<Option<EncryptionKey>> {
    // sqlite runs in development and testing setups without encryption
    if config.db_type == "sqlite" {
        info!("using sqlite database, no encryption key needed");
        return Ok(None);
    }

    if config.encryption_key_source.is_empty() {
        info!("no key exchange url set, trying to unseal existing encryption key");
        return match store.unseal() {
            Ok(Some(key)) => Ok(Some(EncryptionKey::from(key))),
            Ok(None) => Err(KeyManagerError::NoSealedKey(
                "key file absent; set ENCRYPTION_KEY_SOURCE to provision one".to_string(),
            )),
            Err(e) => Err(KeyManagerError::NoSealedKey(e.to_string())),
        };
    }

    let key = if config.encryption_key_source == "new" {
        match store.unseal() {
            Ok(Some(existing)) => {
                info!("found existing encryption key, keeping it");
                EncryptionKey::from(existing)
            }
            Ok(None) => {
                info!("no existing encryption key found, generating new random encryption key");
                EncryptionKey::generate()?
            }
            Err(e) => {
                info!(error = %e, "existing key is unusable, generating new random encryption key");
                EncryptionKey::generate()?
            }
        }
    } else {
        info!(peer = %config.encryption_key_source, "fetching encryption key from key provider");
        let fetched = requester::fetch_key(&config.encryption_key_source, runtime)
            .await
            .map_err(|e| {
                error!(error = %e, "unable to get encryption key from key provider");
                KeyManagerError::PeerFetch(e.to_string())
            })?;
        EncryptionKey::from(fetched)
    };

    store
        .seal(key.as_bytes())
        .map_err(|e| KeyManagerError::SealFailed(e.to_string()))?;

    Ok(Some(key))
}
