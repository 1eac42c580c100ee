use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Where uploaded media bytes live. Names are single path components chosen
/// by the ingestion pipeline.
#[async_trait::async_trait]
pub trait ContentStorage: Send + Sync {
    /// Create the content directory if it is missing. Safe to call repeatedly.
    async fn ensure_dir(&self) -> Result<()>;
    async fn write(&self, name: &str, bytes: &[u8]) -> Result<()>;
    async fn exists(&self, name: &str) -> Result<bool>;
    /// Remove `name`. Returns `Ok(false)` when it was already absent.
    async fn delete(&self, name: &str) -> Result<bool>;
    /// Filesystem location of `name`, for tools that read the file directly.
    fn path_of(&self, name: &str) -> Result<PathBuf>;
}

/// Flat directory on the local filesystem, also served statically.
#[derive(Debug, Clone)]
pub struct LocalContentStorage {
    root: PathBuf,
}

impl LocalContentStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn name_to_path(&self, name: &str) -> Result<PathBuf> {
        if !is_single_component(name) {
            bail!("Storage name '{}' is not a plain file name", name);
        }
        Ok(self.root.join(name))
    }
}

/// True when `name` is one ordinary path component: no separators, no `.`/`..`.
pub fn is_single_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

#[async_trait::async_trait]
impl ContentStorage for LocalContentStorage {
    async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create upload directory {}", self.root.display()))
    }

    async fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.name_to_path(name)?;

        let mut file = fs::File::create(&path)
            .await
            .with_context(|| format!("Failed to create file {}", path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("Failed to write file {}", path.display()))?;
        file.sync_all()
            .await
            .with_context(|| format!("Failed to sync file {}", path.display()))?;

        log::debug!("stored {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        let path = self.name_to_path(name)?;
        fs::try_exists(&path)
            .await
            .with_context(|| format!("Failed to check {}", path.display()))
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let path = self.name_to_path(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => {
                Err(err).with_context(|| format!("Failed to delete file {}", path.display()))
            }
        }
    }

    fn path_of(&self, name: &str) -> Result<PathBuf> {
        self.name_to_path(name)
    }
}
