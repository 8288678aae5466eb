//! Sealed persistence for the cluster encryption key
//!
//! The key lives in a single file whose contents are the enclave platform's
//! sealed-blob format; there is no versioning layer on top. Outside an
//! enclave both operations are no-ops, so development runs never touch the
//! key file.

use crate::enclave::EnclaveRuntime;
use crate::error::{KeyManagerError, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Fixed location of the sealed key file
pub const DEFAULT_KEY_FILE: &str = "/data/encryption-key.json";

/// Single-file store for the sealed encryption key
pub struct KeyStore {
    runtime: Arc<dyn EnclaveRuntime>,
    inside_enclave: bool,
    path: PathBuf,
}

impl KeyStore {
    /// Creates a store over the fixed key file location
    pub fn new(runtime: Arc<dyn EnclaveRuntime>, inside_enclave: bool) -> Self {
        Self::with_path(runtime, inside_enclave, DEFAULT_KEY_FILE)
    }

    /// Creates a store over a caller-chosen key file location
    pub fn with_path(
        runtime: Arc<dyn EnclaveRuntime>,
        inside_enclave: bool,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runtime,
            inside_enclave,
            path: path.into(),
        }
    }

    /// Path of the sealed key file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Attempts to read and unseal the stored key.
    ///
    /// Returns `Ok(None)` outside an enclave or when no key file exists.
    /// A present but unusable file (corruption, sealed by another enclave
    /// identity) is an error.
    pub fn unseal(&self) -> Result<Option<Zeroizing<Vec<u8>>>> {
        if !self.inside_enclave {
            debug!("not inside an enclave, skipping unseal");
            return Ok(None);
        }

        let sealed = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no sealed key file present");
                return Ok(None);
            }
            Err(e) => return Err(KeyManagerError::Io(e)),
        };

        let key = self.runtime.unseal(&sealed).map(Zeroizing::new)?;
        info!(path = %self.path.display(), "unsealed encryption key");
        Ok(Some(key))
    }

    /// Seals the key and atomically replaces the key file.
    ///
    /// No-op outside an enclave. A failed write leaves any existing file in
    /// its prior state.
    pub fn seal(&self, key: &[u8]) -> Result<()> {
        if !self.inside_enclave {
            debug!("not inside an enclave, skipping seal");
            return Ok(());
        }

        let sealed = self.runtime.seal(key)?;

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o600))?;
        }
        tmp.write_all(&sealed)?;
        tmp.flush()?;
        tmp.persist(&self.path)
            .map_err(|e| KeyManagerError::Io(e.error))?;

        info!(path = %self.path.display(), "sealed encryption key written");
        Ok(())
    }
}
