//! Plan artifact storage.
//!
//! A plan produced by one CI job is stored under `(artifact, file_name)` and
//! retrieved by the job that applies it.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use tracing::debug;

#[async_trait]
pub trait PlanStorage: Send + Sync {
    async fn store(&self, data: &[u8], artifact: &str, file_name: &str) -> anyhow::Result<()>;

    /// Copy a stored plan to `local_path`. `Ok(None)` when nothing is stored.
    async fn retrieve(
        &self,
        local_path: &Path,
        artifact: &str,
        file_name: &str,
    ) -> anyhow::Result<Option<PathBuf>>;

    async fn delete(&self, artifact: &str, file_name: &str) -> anyhow::Result<()>;

    async fn exists(&self, artifact: &str, file_name: &str) -> anyhow::Result<bool>;
}

/// Directory-backed storage: `<root>/<artifact>/<file_name>`.
#[derive(Debug, Clone)]
pub struct LocalPlanStorage {
    root: PathBuf,
}

impl LocalPlanStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, artifact: &str, file_name: &str) -> PathBuf {
        self.root.join(artifact).join(file_name)
    }
}

#[async_trait]
impl PlanStorage for LocalPlanStorage {
    async fn store(&self, data: &[u8], artifact: &str, file_name: &str) -> anyhow::Result<()> {
        let path = self.path(artifact, file_name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("Failed to store plan at {}", path.display()))?;
        debug!(path = %path.display(), "Stored plan");
        Ok(())
    }

    async fn retrieve(
        &self,
        local_path: &Path,
        artifact: &str,
        file_name: &str,
    ) -> anyhow::Result<Option<PathBuf>> {
        let path = self.path(artifact, file_name);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::copy(&path, local_path).await.with_context(|| {
            format!(
                "Failed to copy plan {} to {}",
                path.display(),
                local_path.display()
            )
        })?;
        Ok(Some(local_path.to_path_buf()))
    }

    async fn delete(&self, artifact: &str, file_name: &str) -> anyhow::Result<()> {
        let path = self.path(artifact, file_name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to delete plan {}", path.display()))
            }
        }
    }

    async fn exists(&self, artifact: &str, file_name: &str) -> anyhow::Result<bool> {
        let path = self.path(artifact, file_name);
        tokio::fs::try_exists(&path)
            .await
            .with_context(|| format!("Failed to check plan {}", path.display()))
    }
}
