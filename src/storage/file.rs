use crate::error::{MarginError, MarginResult};
use crate::storage::{KeyValueStore, validate_key};
use async_trait::async_trait;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const EXTENSION: &str = "json";

/// A key-value store keeping one file per key in a directory.
///
/// `:` in keys is stored as `~` in file names, which keeps them valid on
/// every platform.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens (and creates, if missing) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> MarginResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(FileStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root
            .join(format!("{}.{EXTENSION}", key.replace(':', "~")))
    }

    fn key_for(path: &Path) -> Option<String> {
        if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        Some(stem.replace('~', ":"))
    }

    /// Writes data to a temporary file in the store directory and renames it
    /// over the target, so a crash mid-write never leaves a torn file.
    fn write_atomic(root: &Path, path: &Path, data: &[u8]) -> MarginResult<()> {
        let mut tmp = NamedTempFile::new_in(root)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| MarginError::Io(e.error))?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn get(&self, key: &str) -> MarginResult<Option<String>> {
        validate_key(key)?;
        match tokio::fs::read(self.path_for(key)).await {
            // invalid UTF-8 is handed on as replacement chars for validation to reject
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(data) => Ok(Some(data)),
                Err(e) => {
                    tracing::warn!(key, "stored value is not valid UTF-8");
                    Ok(Some(String::from_utf8_lossy(e.as_bytes()).into_owned()))
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MarginError::Io(e)),
        }
    }

    async fn set(&self, key: &str, value: &str) -> MarginResult<()> {
        validate_key(key)?;
        let root = self.root.clone();
        let path = self.path_for(key);
        let data = value.as_bytes().to_vec();

        tokio::task::spawn_blocking(move || Self::write_atomic(&root, &path, &data))
            .await
            .map_err(|e| MarginError::Storage(format!("file write task failed: {e}")))?
    }

    async fn remove(&self, key: &str) -> MarginResult<bool> {
        validate_key(key)?;
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(MarginError::Io(e)),
        }
    }

    async fn keys_with_prefix(&self, prefix: &str) -> MarginResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(key) = Self::key_for(&path) {
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}
