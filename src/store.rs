//! Validated document store: read, mutate, validate, then atomically replace.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

use crate::document::{Document, Mutation};
use crate::error::{StoreError, StoreResult};
use crate::validator::SchemaValidator;

/// One async lock per absolute document path
#[derive(Default)]
struct PathLocks {
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl PathLocks {
    fn lock_for(&self, path: &Path) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(path.to_path_buf()).or_default())
    }

    /// Forget the lock for `path` once nobody holds or waits on it
    fn prune(&self, path: &Path) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(path).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(path);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

pub struct DocumentStore {
    validator: Arc<SchemaValidator>,
    locks: PathLocks,
}

impl DocumentStore {
    pub fn new(validator: Arc<SchemaValidator>) -> Self {
        Self {
            validator,
            locks: PathLocks::default(),
        }
    }

    pub fn validator(&self) -> &Arc<SchemaValidator> {
        &self.validator
    }

    /// Read and parse the document at `path`
    pub async fn load(&self, path: &Path) -> StoreResult<Document> {
        Document::load(path).await
    }

    /// Apply `mutation` to the document at `path` and persist it only if the
    /// result validates against `schema`.
    ///
    /// Updates to the same path run one at a time. On any error the file on
    /// disk is left as it was.
    pub async fn update(
        &self,
        path: &Path,
        schema: &str,
        mutation: &Mutation,
    ) -> StoreResult<Document> {
        let path = std::path::absolute(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let lock = self.locks.lock_for(&path);
        let guard = Arc::clone(&lock).lock_owned().await;
        drop(lock);

        let result = self.update_locked(path.clone(), schema, mutation, guard).await;
        self.locks.prune(&path);
        result
    }

    async fn update_locked(
        &self,
        path: PathBuf,
        schema: &str,
        mutation: &Mutation,
        guard: OwnedMutexGuard<()>,
    ) -> StoreResult<Document> {
        let data = tokio::fs::read(&path).await.map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        let compiled = self.validator.schema(schema).await?;

        let mut document = Document::parse(&path, &data)?;
        document.apply(mutation)?;

        let report = compiled.validate(&document)?;
        if !report.ok {
            debug!(
                path = %path.display(),
                schema,
                errors = report.errors.len(),
                "update rejected"
            );
            return Err(StoreError::Validation {
                path,
                schema: schema.to_string(),
                errors: report.errors,
            });
        }

        let bytes = document.to_bytes()?;
        persist(path.clone(), bytes, Some(guard)).await?;
        info!(path = %path.display(), selector = %mutation.selector, "document updated");
        Ok(document)
    }
}

/// Replace `path` with `bytes` so readers see either the old or the new
/// content, never a partial write.
pub async fn write_atomic(path: &Path, bytes: Vec<u8>) -> StoreResult<()> {
    persist(path.to_path_buf(), bytes, None).await
}

/// Runs the replacement on the blocking pool. `guard` stays held until the
/// file is in place, even when the calling future is dropped first.
async fn persist(
    path: PathBuf,
    bytes: Vec<u8>,
    guard: Option<OwnedMutexGuard<()>>,
) -> StoreResult<()> {
    let target = path.clone();
    let written = tokio::task::spawn_blocking(move || {
        let _guard = guard;
        replace_file(&target, &bytes)
    })
    .await
    .unwrap_or_else(|err| Err(std::io::Error::other(err)));
    written.map_err(|source| StoreError::Io { path, source })
}

/// Write a temporary sibling, flush it and rename it over `path`. The
/// temporary file is deleted on every failure before the rename.
fn replace_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());

    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{file_name}."))
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}
