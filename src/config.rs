//! Runtime configuration for the key provisioning service
//!
//! The core only ever sees the [`ProvisionConfig`] struct; reading the
//! environment is confined to [`ProvisionConfig::from_env`] so that tests and
//! embedding binaries can construct configurations directly.

use std::env;

/// Configuration that selects the key provisioning path at startup
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    /// Database engine backing the service. `"sqlite"` needs no encryption key.
    pub db_type: String,
    /// Whether the process runs inside a hardware enclave. When false,
    /// sealing and unsealing are no-ops (development mode).
    pub inside_enclave: bool,
    /// Where the encryption key comes from:
    /// - `""`: unseal an existing key, fail if none is present
    /// - `"new"`: unseal an existing key, generate a fresh one if not found
    /// - a URL: fetch the key from the peer enclave at that address
    pub encryption_key_source: String,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            db_type: "postgres".to_string(),
            inside_enclave: false,
            encryption_key_source: String::new(),
        }
    }
}

impl ProvisionConfig {
    /// Reads the configuration from `DB_TYPE`, `INSIDE_ENCLAVE` and
    /// `ENCRYPTION_KEY_SOURCE`
    pub fn from_env() -> Self {
        Self {
            db_type: env::var("DB_TYPE").unwrap_or_else(|_| "postgres".to_string()),
            inside_enclave: env::var("INSIDE_ENCLAVE")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            encryption_key_source: env::var("ENCRYPTION_KEY_SOURCE").unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProvisionConfig::default();
        assert_eq!(config.db_type, "postgres");
        assert!(!config.inside_enclave);
        assert!(config.encryption_key_source.is_empty());
    }
}
