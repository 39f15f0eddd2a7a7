//! Scratch workspaces that are removed however the work inside them ends.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::PipelineError;

/// A uniquely named scratch directory, valid for the duration of one
/// [`ResourceScope::with_workspace`] call.
#[derive(Debug, Clone)]
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of a file called `name` inside the workspace
    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

fn report_cleanup_failure(path: &Path, err: &std::io::Error) {
    if err.kind() != std::io::ErrorKind::NotFound {
        warn!(path = %path.display(), error = %err, "failed to remove workspace");
    }
}

/// Creates workspaces under a scratch root
#[derive(Debug, Clone)]
pub struct ResourceScope {
    root: PathBuf,
    prefix: String,
}

impl ResourceScope {
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
        }
    }

    fn create(&self) -> Result<TempDir, PipelineError> {
        std::fs::create_dir_all(&self.root).map_err(|source| PipelineError::Workspace {
            path: self.root.clone(),
            source,
        })?;
        tempfile::Builder::new()
            .prefix(&format!("{}-", self.prefix))
            .tempdir_in(&self.root)
            .map_err(|source| PipelineError::Workspace {
                path: self.root.clone(),
                source,
            })
    }

    /// Run `body` with a fresh workspace and delete the workspace afterwards,
    /// whether `body` succeeds, fails, panics or is cancelled. A cleanup
    /// failure is logged and never replaces `body`'s result.
    ///
    /// The `TempDir` lives in this future, so unwinding or dropping the
    /// future removes the directory too.
    pub async fn with_workspace<T, E, F, Fut>(&self, body: F) -> Result<T, E>
    where
        F: FnOnce(Workspace) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<PipelineError>,
    {
        let dir = self.create()?;
        let path = dir.path().to_path_buf();
        debug!(workspace = %path.display(), "workspace created");

        let outcome = body(Workspace { path: path.clone() }).await;

        match tokio::task::spawn_blocking(move || dir.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => report_cleanup_failure(&path, &err),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "workspace cleanup task failed")
            }
        }
        outcome
    }
}
