//! Enclave key provisioning for the wallet-extension database
//!
//! This library obtains, persists and shares the symmetric key that
//! encrypts the service's on-disk database across a fleet of attested
//! enclaves:
//! - Three provisioning modes at startup: unseal-only, use-or-create, and
//!   fetch-from-peer
//! - An attested key exchange in which a requester binds an ephemeral RSA
//!   public key into its attestation report and a provider releases the key
//!   encrypted under it
//! - Hardware-sealed single-file persistence of the key across restarts

pub mod config;
pub mod crypto;
pub mod enclave;
pub mod error;
pub mod keystore;
pub mod provider;
pub mod provision;
pub mod requester;
pub mod wire;
