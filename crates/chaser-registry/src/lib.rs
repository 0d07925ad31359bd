//! Per-account credentials and instrument specifications.
//!
//! Both caches are TTL-bound: credentials default to 5 minutes so a key
//! rotation is observed within one window, instrument filters to 1 hour.

pub mod credentials;
pub mod error;
pub mod spec_cache;

pub use credentials::{CredentialStore, Credentials, DEFAULT_CREDENTIAL_TTL};
pub use error::{CredentialError, RegistryError, RegistryResult};
pub use spec_cache::{SpecCache, SpecCacheEntry, DEFAULT_SPEC_TTL};
