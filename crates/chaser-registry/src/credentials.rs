//! Account credential store.
//!
//! Loads active accounts from the durable store and caches them for a TTL.
//! Callers fetch credentials per use instead of holding on to them.

use crate::error::{RegistryError, RegistryResult};
use chaser_core::{AccountId, AccountRecord, Endpoints, Environment};
use chaser_persistence::Store;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const DEFAULT_CREDENTIAL_TTL: Duration = Duration::from_secs(5 * 60);

/// Immutable credentials for one account.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    #[zeroize(skip)]
    pub account_id: AccountId,
    #[zeroize(skip)]
    pub environment: Environment,
    #[zeroize(skip)]
    pub endpoints: Endpoints,
    pub api_key: String,
    api_secret: String,
    pub ws_api_key: String,
    ed25519_private_key_pem: String,
}

impl Credentials {
    fn from_record(record: &AccountRecord) -> Self {
        Self {
            account_id: record.id,
            environment: record.environment,
            endpoints: record
                .endpoints
                .clone()
                .unwrap_or_else(|| record.environment.default_endpoints()),
            api_key: record.api_key.clone(),
            api_secret: record.api_secret.clone(),
            ws_api_key: record.ws_api_key.clone(),
            ed25519_private_key_pem: record.ed25519_private_key_pem.clone(),
        }
    }

    /// REST HMAC secret.
    pub fn api_secret(&self) -> &str {
        &self.api_secret
    }

    /// Ed25519 key material for the WebSocket API.
    pub fn ed25519_private_key_pem(&self) -> &str {
        &self.ed25519_private_key_pem
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account_id", &self.account_id)
            .field("environment", &self.environment)
            .field("endpoints", &self.endpoints)
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("ws_api_key", &self.ws_api_key)
            .field("ed25519_private_key_pem", &"<redacted>")
            .finish()
    }
}

struct CachedCredentials {
    credentials: Arc<Credentials>,
    loaded_at: Instant,
}

/// TTL cache in front of the account table.
pub struct CredentialStore {
    store: Arc<dyn Store>,
    ttl: Duration,
    cache: DashMap<AccountId, CachedCredentials>,
}

impl CredentialStore {
    pub fn new(store: Arc<dyn Store>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            cache: DashMap::new(),
        }
    }

    /// Cached credentials, reloaded when older than the TTL.
    pub fn load(&self, account: AccountId) -> RegistryResult<Arc<Credentials>> {
        if let Some(entry) = self.cache.get(&account) {
            if entry.loaded_at.elapsed() < self.ttl {
                return Ok(entry.credentials.clone());
            }
            debug!(account_id = %account, "Credential cache entry expired");
        }
        self.force_reload(account)
    }

    /// Bypass the cache.
    pub fn force_reload(&self, account: AccountId) -> RegistryResult<Arc<Credentials>> {
        let record = match self.store.account(account)? {
            Some(record) if record.active => record,
            _ => {
                self.cache.remove(&account);
                warn!(account_id = %account, "Credentials requested for inactive or missing account");
                return Err(RegistryError::InactiveOrMissingAccount(account));
            }
        };

        let credentials = Arc::new(Credentials::from_record(&record));
        self.cache.insert(
            account,
            CachedCredentials {
                credentials: credentials.clone(),
                loaded_at: Instant::now(),
            },
        );
        info!(account_id = %account, environment = %credentials.environment, "Loaded account credentials");
        Ok(credentials)
    }

    pub fn invalidate(&self, account: AccountId) {
        self.cache.remove(&account);
    }

    pub fn invalidate_all(&self) {
        self.cache.clear();
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaser_persistence::MemoryStore;

    fn account(id: u64, active: bool, secret: &str) -> AccountRecord {
        AccountRecord {
            id: AccountId(id),
            name: format!("acct {id}"),
            active,
            environment: Environment::Testnet,
            api_key: "key".to_string(),
            api_secret: secret.to_string(),
            ws_api_key: "ws-key".to_string(),
            ed25519_private_key_pem: "pem".to_string(),
            endpoints: None,
        }
    }

    fn setup(ttl: Duration) -> (Arc<MemoryStore>, CredentialStore) {
        let store = Arc::new(MemoryStore::new());
        let creds = CredentialStore::new(store.clone(), ttl);
        (store, creds)
    }

    #[test]
    fn test_load_active_account_uses_environment_defaults() {
        let (store, creds) = setup(DEFAULT_CREDENTIAL_TTL);
        store.upsert_account(account(1, true, "s1")).unwrap();

        let loaded = creds.load(AccountId(1)).unwrap();
        assert_eq!(loaded.api_secret(), "s1");
        assert_eq!(
            loaded.endpoints.rest_url,
            "https://testnet.binancefuture.com"
        );
    }

    #[test]
    fn test_inactive_and_missing_accounts_rejected() {
        let (store, creds) = setup(DEFAULT_CREDENTIAL_TTL);
        store.upsert_account(account(2, false, "s")).unwrap();

        assert!(matches!(
            creds.load(AccountId(2)),
            Err(RegistryError::InactiveOrMissingAccount(AccountId(2)))
        ));
        assert!(matches!(
            creds.load(AccountId(3)),
            Err(RegistryError::InactiveOrMissingAccount(AccountId(3)))
        ));
    }

    #[test]
    fn test_rotation_visible_after_ttl_or_force_reload() {
        let (store, creds) = setup(Duration::from_secs(3600));
        store.upsert_account(account(1, true, "old")).unwrap();
        assert_eq!(creds.load(AccountId(1)).unwrap().api_secret(), "old");

        store.upsert_account(account(1, true, "new")).unwrap();
        assert_eq!(creds.load(AccountId(1)).unwrap().api_secret(), "old");
        assert_eq!(creds.force_reload(AccountId(1)).unwrap().api_secret(), "new");

        store.upsert_account(account(1, true, "newer")).unwrap();
        creds.invalidate(AccountId(1));
        assert_eq!(creds.load(AccountId(1)).unwrap().api_secret(), "newer");
    }

    #[test]
    fn test_zero_ttl_always_reloads() {
        let (store, creds) = setup(Duration::ZERO);
        store.upsert_account(account(1, true, "a")).unwrap();
        creds.load(AccountId(1)).unwrap();
        store.upsert_account(account(1, false, "a")).unwrap();
        assert!(creds.load(AccountId(1)).is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let (store, creds) = setup(DEFAULT_CREDENTIAL_TTL);
        store.upsert_account(account(1, true, "very-secret")).unwrap();
        let text = format!("{:?}", creds.load(AccountId(1)).unwrap());
        assert!(!text.contains("very-secret"));
        assert!(text.contains("<redacted>"));
    }
}
