//! Salt used to HMAC sensitive audit fields, and the per-device cache holding it.

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use ring::hmac;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::context::AuditContext;
use crate::error::AuditError;

/// Storage key the salt is persisted under by default.
pub const DEFAULT_SALT_LOCATION: &str = "salt";

/// The only HMAC construction currently supported.
pub const HMAC_SHA256: &str = "hmac-sha256";

/// Persistent key/value view the salt is read from and written to.
#[async_trait]
pub trait SaltStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AuditError>;

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), AuditError>;
}

/// In-memory salt storage, for tests and single-process tools.
#[derive(Default)]
pub struct InmemSaltStorage {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl InmemSaltStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SaltStorage for InmemSaltStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AuditError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| AuditError::LockPoisoned("salt storage"))?;
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), AuditError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| AuditError::LockPoisoned("salt storage"))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// Where the salt lives and how it is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaltConfig {
    /// Storage key. Empty means an ephemeral salt that is never persisted.
    pub location: String,
    pub hmac_type: String,
}

impl Default for SaltConfig {
    fn default() -> Self {
        Self {
            location: DEFAULT_SALT_LOCATION.to_string(),
            hmac_type: HMAC_SHA256.to_string(),
        }
    }
}

/// Secret keying material for deterministic hashing of sensitive values.
pub struct Salt {
    salt_id: String,
    generated: bool,
    hmac_type: String,
    key: hmac::Key,
}

impl Salt {
    /// Load the salt from `storage`, generating and persisting one if absent.
    pub async fn new(storage: &dyn SaltStorage, config: &SaltConfig) -> Result<Self, AuditError> {
        if config.hmac_type != HMAC_SHA256 {
            return Err(AuditError::Salt(format!(
                "unsupported HMAC type {:?}",
                config.hmac_type
            )));
        }

        let location = config.location.trim();
        let (salt_id, generated) = if location.is_empty() {
            (Uuid::new_v4().to_string(), true)
        } else {
            match storage.get(location).await? {
                Some(raw) => {
                    let id = String::from_utf8(raw).map_err(|_| {
                        AuditError::Salt(format!("salt at {location:?} is not valid UTF-8"))
                    })?;
                    if id.is_empty() {
                        return Err(AuditError::Salt(format!("salt at {location:?} is empty")));
                    }
                    (id, false)
                }
                None => {
                    let id = Uuid::new_v4().to_string();
                    storage.put(location, id.clone().into_bytes()).await?;
                    tracing::info!(location, "generated new audit salt");
                    (id, true)
                }
            }
        };

        let key = hmac::Key::new(hmac::HMAC_SHA256, salt_id.as_bytes());
        Ok(Self {
            salt_id,
            generated,
            hmac_type: config.hmac_type.clone(),
            key,
        })
    }

    pub fn salt_id(&self) -> &str {
        &self.salt_id
    }

    /// Whether this salt was created rather than loaded from storage.
    pub fn did_generate(&self) -> bool {
        self.generated
    }

    /// Hex-encoded HMAC of `data`.
    pub fn hmac(&self, data: &str) -> String {
        hex::encode(hmac::sign(&self.key, data.as_bytes()).as_ref())
    }

    /// HMAC of `data` prefixed with the HMAC type, e.g. `hmac-sha256:ab12...`.
    pub fn identified_hmac(&self, data: &str) -> String {
        format!("{}:{}", self.hmac_type, self.hmac(data))
    }
}

// Prevent accidental Debug output of the salt
impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Salt")
            .field("salt_id", &"<redacted>")
            .field("hmac_type", &self.hmac_type)
            .field("generated", &self.generated)
            .finish()
    }
}

/// Supplies the salt used by formatters.
#[async_trait]
pub trait Salter: Send + Sync {
    async fn salt(&self, ctx: &AuditContext) -> Result<Arc<Salt>, AuditError>;
}

/// Lazily created, explicitly invalidated salt shared by one audit device.
///
/// Reads go through an atomic pointer and never block each other. Generation
/// and invalidation serialize on one mutex, and the pointer only ever holds a
/// fully constructed salt.
pub struct SaltCache {
    salt: ArcSwapOption<Salt>,
    lock: Mutex<()>,
    storage: Arc<dyn SaltStorage>,
    config: SaltConfig,
}

impl SaltCache {
    pub fn new(storage: Arc<dyn SaltStorage>, config: SaltConfig) -> Self {
        Self {
            salt: ArcSwapOption::empty(),
            lock: Mutex::new(()),
            storage,
            config,
        }
    }

    /// The cached salt, generating it first if needed.
    pub async fn get(&self) -> Result<Arc<Salt>, AuditError> {
        if let Some(salt) = self.salt.load_full() {
            return Ok(salt);
        }

        let _guard = self.lock.lock().await;

        // Another caller may have generated it while we waited.
        if let Some(salt) = self.salt.load_full() {
            return Ok(salt);
        }

        match Salt::new(self.storage.as_ref(), &self.config).await {
            Ok(salt) => {
                let salt = Arc::new(salt);
                self.salt.store(Some(Arc::clone(&salt)));
                Ok(salt)
            }
            Err(e) => {
                self.salt.store(None);
                Err(e)
            }
        }
    }

    /// Forget the cached salt; the next [`SaltCache::get`] regenerates it.
    pub async fn invalidate(&self) {
        let _guard = self.lock.lock().await;
        self.salt.store(None);
    }

    pub fn is_cached(&self) -> bool {
        self.salt.load().is_some()
    }
}

#[async_trait]
impl Salter for SaltCache {
    async fn salt(&self, _ctx: &AuditContext) -> Result<Arc<Salt>, AuditError> {
        self.get().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Wraps in-memory storage, counting reads and optionally failing.
    #[derive(Default)]
    struct CountingStorage {
        inner: InmemSaltStorage,
        reads: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl SaltStorage for CountingStorage {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, AuditError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(AuditError::Salt("storage unavailable".to_string()));
            }
            self.inner.get(key).await
        }

        async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), AuditError> {
            self.inner.put(key, value).await
        }
    }

    #[tokio::test]
    async fn test_salt_generated_then_loaded() {
        let storage = InmemSaltStorage::new();
        let config = SaltConfig::default();

        let first = Salt::new(&storage, &config).await.unwrap();
        assert!(first.did_generate());

        let second = Salt::new(&storage, &config).await.unwrap();
        assert!(!second.did_generate());
        assert_eq!(first.salt_id(), second.salt_id());
        assert_eq!(first.hmac("token"), second.hmac("token"));
    }

    #[tokio::test]
    async fn test_identified_hmac_format() {
        let storage = InmemSaltStorage::new();
        let salt = Salt::new(&storage, &SaltConfig::default()).await.unwrap();

        let hashed = salt.identified_hmac("s.abc123");
        assert!(hashed.starts_with("hmac-sha256:"));
        assert_eq!(hashed.len(), "hmac-sha256:".len() + 64);
        assert_ne!(salt.hmac("a"), salt.hmac("b"));
    }

    #[tokio::test]
    async fn test_ephemeral_salt_is_not_persisted() {
        let storage = InmemSaltStorage::new();
        let config = SaltConfig {
            location: String::new(),
            ..Default::default()
        };
        let a = Salt::new(&storage, &config).await.unwrap();
        let b = Salt::new(&storage, &config).await.unwrap();
        assert_ne!(a.salt_id(), b.salt_id());
        assert!(storage.get(DEFAULT_SALT_LOCATION).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unsupported_hmac_type() {
        let storage = InmemSaltStorage::new();
        let config = SaltConfig {
            hmac_type: "hmac-md5".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            Salt::new(&storage, &config).await,
            Err(AuditError::Salt(_))
        ));
    }

    #[test]
    fn test_debug_redacts_salt() {
        let config = SaltConfig::default();
        let salt = Salt {
            salt_id: "super-secret-salt".to_string(),
            generated: true,
            hmac_type: config.hmac_type,
            key: hmac::Key::new(hmac::HMAC_SHA256, b"super-secret-salt"),
        };
        let output = format!("{salt:?}");
        assert!(output.contains("<redacted>"));
        assert!(!output.contains("super-secret-salt"));
    }

    #[tokio::test]
    async fn test_cache_returns_same_instance() {
        let cache = SaltCache::new(Arc::new(InmemSaltStorage::new()), SaltConfig::default());
        assert!(!cache.is_cached());

        let a = cache.get().await.unwrap();
        let b = cache.get().await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(cache.is_cached());
    }

    #[tokio::test]
    async fn test_cache_invalidate_regenerates() {
        let cache = SaltCache::new(Arc::new(InmemSaltStorage::new()), SaltConfig::default());
        let a = cache.get().await.unwrap();

        cache.invalidate().await;
        assert!(!cache.is_cached());

        let b = cache.get().await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        // Same persisted material, reloaded.
        assert_eq!(a.salt_id(), b.salt_id());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cache_concurrent_callers_share_one_generation() {
        let storage = Arc::new(CountingStorage::default());
        let cache = Arc::new(SaltCache::new(storage.clone(), SaltConfig::default()));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.get().await.unwrap() }));
        }

        let mut salts = Vec::new();
        for handle in handles {
            salts.push(handle.await.unwrap());
        }

        assert_eq!(storage.reads.load(Ordering::SeqCst), 1);
        assert!(salts.iter().all(|s| Arc::ptr_eq(s, &salts[0])));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cache_concurrent_callers_share_one_regeneration() {
        let storage = Arc::new(CountingStorage::default());
        let cache = Arc::new(SaltCache::new(storage.clone(), SaltConfig::default()));

        let before = cache.get().await.unwrap();
        cache.invalidate().await;
        let reads_before = storage.reads.load(Ordering::SeqCst);

        let mut handles = Vec::new();
        for _ in 0..32 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.get().await.unwrap() }));
        }

        let mut salts = Vec::new();
        for handle in handles {
            salts.push(handle.await.unwrap());
        }

        assert_eq!(storage.reads.load(Ordering::SeqCst) - reads_before, 1);
        assert!(salts.iter().all(|s| Arc::ptr_eq(s, &salts[0])));
        assert!(!Arc::ptr_eq(&before, &salts[0]));
        assert_eq!(before.salt_id(), salts[0].salt_id());
    }

    #[tokio::test]
    async fn test_cache_failure_leaves_cache_empty() {
        let storage = Arc::new(CountingStorage::default());
        storage.fail.store(true, Ordering::SeqCst);
        let cache = SaltCache::new(storage.clone(), SaltConfig::default());

        assert!(cache.get().await.is_err());
        assert!(!cache.is_cached());

        storage.fail.store(false, Ordering::SeqCst);
        assert!(cache.get().await.is_ok());
        assert!(cache.is_cached());
    }
}
