//! Secret resolution backed by SSM Parameter Store.

use async_trait::async_trait;
use aws_sdk_ssm::error::DisplayErrorContext;
use aws_sdk_ssm::Client as SsmClient;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{Config, Error, Result};

/// Parameter name of the shared API secret.
pub const API_KEY_PARAM_NAME: &str = "api_key";
/// Parameter name of the PDF library license key.
pub const PDF_FOCUS_KEY_PARAM_NAME: &str = "pdf_focus_key";

/// Parameters fetched eagerly at startup.
pub const PARAMS_TO_CACHE: [&str; 2] = [API_KEY_PARAM_NAME, PDF_FOCUS_KEY_PARAM_NAME];

/// Remote store that secrets are fetched from on a cache miss.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch the decrypted value stored at `path`.
    async fn fetch(&self, path: &str) -> Result<String>;
}

/// SSM Parameter Store backed secret store.
pub struct SsmSecretStore {
    client: SsmClient,
}

impl SsmSecretStore {
    pub fn new(client: SsmClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretStore for SsmSecretStore {
    async fn fetch(&self, path: &str) -> Result<String> {
        let response = self
            .client
            .get_parameter()
            .name(path)
            .with_decryption(true)
            .send()
            .await
            .map_err(|e| {
                Error::SecretUnavailable(format!(
                    "Failed to get parameter {}: {}",
                    path,
                    DisplayErrorContext(&e)
                ))
            })?;

        response
            .parameter()
            .and_then(|p| p.value())
            .map(str::to_string)
            .ok_or_else(|| Error::SecretUnavailable(format!("Parameter {} has no value", path)))
    }
}

/// In-memory secret cache keyed by parameter name.
///
/// Entries never expire. Concurrent inserts for the same key keep the first
/// value stored.
#[derive(Default)]
pub struct SecretCache {
    entries: RwLock<HashMap<String, String>>,
}

impl SecretCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, name: &str) -> Option<String> {
        self.entries.read().await.get(name).cloned()
    }

    /// Insert `value` unless the key is already present; returns the cached value.
    pub async fn insert_if_absent(&self, name: &str, value: String) -> String {
        let mut entries = self.entries.write().await;
        entries.entry(name.to_string()).or_insert(value).clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl std::fmt::Debug for SecretCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("SecretCache");
        match self.entries.try_read() {
            Ok(entries) => debug.field("names", &entries.keys().collect::<Vec<_>>()),
            Err(_) => debug.field("names", &"<locked>"),
        };
        debug.finish_non_exhaustive()
    }
}

/// Resolves secrets from the environment (local) or the cached remote store.
#[derive(Clone)]
pub struct SecretResolver {
    config: Arc<Config>,
    cache: Arc<SecretCache>,
    store: Arc<dyn SecretStore>,
}

impl SecretResolver {
    pub fn new(config: Arc<Config>, cache: Arc<SecretCache>, store: Arc<dyn SecretStore>) -> Self {
        Self {
            config,
            cache,
            store,
        }
    }

    /// Shared secret expected in the `X-API-Key` header.
    pub async fn api_key(&self) -> Result<String> {
        if self.config.is_local() {
            return local_value(self.config.local_api_key.as_deref(), "API_KEY");
        }
        self.get_parameter(API_KEY_PARAM_NAME).await
    }

    /// License key of the PDF processing library.
    pub async fn pdf_focus_key(&self) -> Result<String> {
        if self.config.is_local() {
            return local_value(self.config.local_pdf_focus_key.as_deref(), "PDF_FOCUS_KEY");
        }
        self.get_parameter(PDF_FOCUS_KEY_PARAM_NAME).await
    }

    /// Fetch every startup parameter into the cache.
    pub async fn preload(&self) -> Result<()> {
        for name in PARAMS_TO_CACHE {
            self.get_parameter(name).await?;
        }
        info!(count = self.cache.len().await, "Preloaded SSM parameters");
        Ok(())
    }

    /// Get a parameter, consulting the cache before the remote store.
    pub async fn get_parameter(&self, name: &str) -> Result<String> {
        if let Some(value) = self.cache.get(name).await {
            return Ok(value);
        }

        let path = self.config.parameter_path(name);
        debug!(parameter = %path, "Fetching SSM parameter");
        let value = self.store.fetch(&path).await?;

        Ok(self.cache.insert_if_absent(name, value).await)
    }
}

fn local_value(value: Option<&str>, key: &str) -> Result<String> {
    value
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::Config(format!(
                "{} environment variable is not set for local environment",
                key
            ))
        })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::tests::{deployed_vars, lookup_from};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Store that serves fixed values and counts fetches.
    #[derive(Default)]
    pub(crate) struct FakeSecretStore {
        pub values: Mutex<HashMap<String, String>>,
        pub fetches: AtomicUsize,
    }

    impl FakeSecretStore {
        pub(crate) fn with(pairs: &[(&str, &str)]) -> Self {
            Self {
                values: Mutex::new(
                    pairs
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SecretStore for FakeSecretStore {
        async fn fetch(&self, path: &str) -> Result<String> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.values
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| Error::SecretUnavailable(format!("ParameterNotFound: {}", path)))
        }
    }

    fn deployed_config() -> Arc<Config> {
        Arc::new(Config::from_lookup(lookup_from(&deployed_vars())).unwrap())
    }

    #[tokio::test]
    async fn test_remote_value_is_cached() {
        let store = Arc::new(FakeSecretStore::with(&[(
            "/reg/dev/dev1/cg/pdf2data/api_key",
            "remote-key",
        )]));
        let resolver = SecretResolver::new(deployed_config(), Arc::new(SecretCache::new()), store.clone());

        assert_eq!(resolver.api_key().await.unwrap(), "remote-key");
        assert_eq!(resolver.api_key().await.unwrap(), "remote-key");
        assert_eq!(store.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cached_value_survives_remote_change() {
        let path = "/reg/dev/dev1/cg/pdf2data/pdf_focus_key";
        let store = Arc::new(FakeSecretStore::with(&[(path, "v1")]));
        let resolver = SecretResolver::new(deployed_config(), Arc::new(SecretCache::new()), store.clone());

        assert_eq!(resolver.pdf_focus_key().await.unwrap(), "v1");
        store.values.lock().unwrap().insert(path.to_string(), "v2".to_string());
        assert_eq!(resolver.pdf_focus_key().await.unwrap(), "v1");
    }

    #[tokio::test]
    async fn test_missing_parameter_is_secret_unavailable() {
        let store = Arc::new(FakeSecretStore::default());
        let resolver = SecretResolver::new(deployed_config(), Arc::new(SecretCache::new()), store);

        let err = resolver.api_key().await.unwrap_err();
        assert!(matches!(err, Error::SecretUnavailable(_)));
    }

    #[tokio::test]
    async fn test_local_mode_reads_environment_only() {
        let mut vars = deployed_vars();
        vars.retain(|(k, _)| *k != "ENV_NAME");
        vars.push(("ENV_NAME", "loc"));
        vars.push(("LOCAL_DYNAMODB_ENDPOINT", "http://localhost:8000"));
        vars.push(("API_KEY", "local-key"));
        let config = Arc::new(Config::from_lookup(lookup_from(&vars)).unwrap());
        let store = Arc::new(FakeSecretStore::default());
        let resolver = SecretResolver::new(config, Arc::new(SecretCache::new()), store.clone());

        assert_eq!(resolver.api_key().await.unwrap(), "local-key");
        assert!(matches!(resolver.pdf_focus_key().await, Err(Error::Config(_))));
        assert_eq!(store.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_preload_fills_cache() {
        let store = Arc::new(FakeSecretStore::with(&[
            ("/reg/dev/dev1/cg/pdf2data/api_key", "k"),
            ("/reg/dev/dev1/cg/pdf2data/pdf_focus_key", "l"),
        ]));
        let cache = Arc::new(SecretCache::new());
        let resolver = SecretResolver::new(deployed_config(), cache.clone(), store);

        resolver.preload().await.unwrap();
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_insert_if_absent_keeps_first_value() {
        let cache = SecretCache::new();
        assert_eq!(cache.insert_if_absent("k", "first".into()).await, "first");
        assert_eq!(cache.insert_if_absent("k", "second".into()).await, "first");
    }

    #[tokio::test]
    async fn test_debug_output_hides_values() {
        let cache = SecretCache::new();
        cache.insert_if_absent("api_key", "s3cr3t-value".into()).await;

        let printed = format!("{:?}", cache);
        assert!(printed.contains("api_key"));
        assert!(!printed.contains("s3cr3t-value"));
    }

    #[tokio::test]
    async fn test_concurrent_resolution_is_consistent() {
        let store = Arc::new(FakeSecretStore::with(&[(
            "/reg/dev/dev1/cg/pdf2data/api_key",
            "remote-key",
        )]));
        let resolver = SecretResolver::new(deployed_config(), Arc::new(SecretCache::new()), store);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let resolver = resolver.clone();
                tokio::spawn(async move { resolver.api_key().await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "remote-key");
        }
    }
}
