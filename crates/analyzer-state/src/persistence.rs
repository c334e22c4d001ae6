//! Persistence boundary
//!
//! The store never assumes a storage medium. It hands a serialized snapshot
//! to [`StatePersistence::save`] and reads one back through
//! [`StatePersistence::load`].

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Host-provided key/value storage for serialized state
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatePersistence: Send + Sync {
    /// Store the serialized state, replacing any previous value
    async fn save(&self, serialized: String) -> anyhow::Result<()>;

    /// Read the serialized state, `None` if nothing was saved yet
    async fn load(&self) -> anyhow::Result<Option<String>>;
}

/// Keeps the serialized state in memory
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    contents: Mutex<Option<String>>,
}

impl MemoryPersistence {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend that already holds `serialized`
    pub fn with_contents(serialized: impl Into<String>) -> Self {
        Self {
            contents: Mutex::new(Some(serialized.into())),
        }
    }

    /// The last saved value
    pub fn contents(&self) -> Option<String> {
        self.contents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl StatePersistence for MemoryPersistence {
    async fn save(&self, serialized: String) -> anyhow::Result<()> {
        *self.contents.lock().unwrap_or_else(PoisonError::into_inner) = Some(serialized);
        Ok(())
    }

    async fn load(&self) -> anyhow::Result<Option<String>> {
        Ok(self.contents())
    }
}

/// Stores the serialized state as a JSON file
#[derive(Debug, Clone)]
pub struct FilePersistence {
    path: PathBuf,
}

impl FilePersistence {
    /// Persist to `path`; parent directories are created on first save
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Target file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StatePersistence for FilePersistence {
    async fn save(&self, serialized: String) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, serialized).await?;
        debug!(path = %self.path.display(), "State written");
        Ok(())
    }

    async fn load(&self) -> anyhow::Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_round_trip() {
        let backend = MemoryPersistence::new();
        assert!(backend.load().await.unwrap().is_none());

        backend.save("{\"a\":1}".to_string()).await.unwrap();
        assert_eq!(backend.load().await.unwrap().as_deref(), Some("{\"a\":1}"));
    }

    #[tokio::test]
    async fn test_file_backend() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilePersistence::new(dir.path().join("nested").join("state.json"));

        assert!(backend.load().await.unwrap().is_none());

        backend.save("{}".to_string()).await.unwrap();
        assert_eq!(backend.load().await.unwrap().as_deref(), Some("{}"));
        assert!(backend.path().exists());
    }
}
