use std::path::{Path, PathBuf};
use std::sync::Arc;

use moka::future::Cache;

use crate::libxml2::XmlSchemaPtr;

/// Process-wide map from absolute schema path to compiled schema.
///
/// Entries never expire. Concurrent first requests for one path run the
/// loader once; the others wait for its result.
#[derive(Clone)]
pub struct ParsedSchemaCache {
    cache: Cache<PathBuf, Arc<XmlSchemaPtr>>,
}

impl ParsedSchemaCache {
    pub fn new() -> Self {
        Self {
            cache: Cache::builder().build(),
        }
    }

    /// Get a compiled schema, running `loader` only if `key` is missing.
    ///
    /// A failed load is not cached; the next request tries again.
    pub async fn get_or_load<F, Fut, E>(
        &self,
        key: PathBuf,
        loader: F,
    ) -> Result<Arc<XmlSchemaPtr>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<XmlSchemaPtr>, E>>,
        E: Send + Sync + Clone + 'static,
    {
        self.cache
            .try_get_with(key, loader())
            .await
            .map_err(|e| (*e).clone())
    }

    pub async fn get(&self, key: &Path) -> Option<Arc<XmlSchemaPtr>> {
        self.cache.get(key).await
    }

    pub async fn invalidate(&self, key: &Path) {
        self.cache.invalidate(key).await;
    }

    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }
}

impl Default for ParsedSchemaCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::libxml2::LibXml2Wrapper;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SIMPLE_XSD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xs:schema xmlns:xs="http://www.w3.org/2001/XMLSchema">
    <xs:element name="root" type="xs:string"/>
</xs:schema>"#;

    fn compile() -> Result<Arc<XmlSchemaPtr>, String> {
        LibXml2Wrapper::new()
            .parse_schema_from_memory(SIMPLE_XSD.as_bytes())
            .map(Arc::new)
            .map_err(|e| e.to_string())
    }

    #[tokio::test]
    async fn test_loader_runs_once_per_key() {
        let cache = ParsedSchemaCache::new();
        let loads = Arc::new(AtomicUsize::new(0));
        let key = PathBuf::from("/schemas/root.xsd");

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                let loads = Arc::clone(&loads);
                let key = key.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_load(key, || async move {
                            loads.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                            compile()
                        })
                        .await
                })
            })
            .collect();

        let schemas: Vec<_> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(schemas.iter().all(|s| Arc::ptr_eq(s, &schemas[0])));
        assert_eq!(cache.entry_count().await, 1);
    }

    #[tokio::test]
    async fn test_failed_load_is_not_cached() {
        let cache = ParsedSchemaCache::new();
        let key = PathBuf::from("/schemas/broken.xsd");

        let first: Result<_, String> = cache
            .get_or_load(key.clone(), || async { Err("boom".to_string()) })
            .await;
        assert_eq!(first.unwrap_err(), "boom");
        assert!(cache.get(&key).await.is_none());

        let second = cache.get_or_load(key.clone(), || async { compile() }).await;
        assert!(second.is_ok());
        assert!(cache.get(&key).await.is_some());
    }

    #[tokio::test]
    async fn test_invalidate_forces_reload() {
        let cache = ParsedSchemaCache::new();
        let key = PathBuf::from("/schemas/root.xsd");
        cache.get_or_load(key.clone(), || async { compile() }).await.unwrap();
        assert_eq!(cache.entry_count().await, 1);

        cache.invalidate(&key).await;
        assert!(cache.get(&key).await.is_none());
        assert_eq!(cache.entry_count().await, 0);
    }
}
