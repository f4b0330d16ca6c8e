//! On-disk layer implementation.
//!
//! A `DiskLayer` owns a subtree rooted at a host directory. Virtual paths
//! are validated before being joined onto the root, so operations cannot
//! escape it.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::fs::error::{StoreError, StoreResult};
use crate::fs::path::validate_path;
use crate::types::LayerId;

use super::traits::Layer;

#[derive(Debug)]
pub struct DiskLayer {
    id: LayerId,
    root: PathBuf,
    sealed: AtomicBool,
}

impl DiskLayer {
    /// Create a new layer, creating its root directory on disk.
    pub async fn create(id: LayerId, root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;

        tracing::info!(layer_id = id, root = %root.display(), "Created layer");

        Ok(Self { id, root, sealed: AtomicBool::new(false) })
    }

    /// Open a handle to an existing layer root.
    pub fn open(id: LayerId, root: impl Into<PathBuf>, sealed: bool) -> Self {
        Self { id, root: root.into(), sealed: AtomicBool::new(sealed) }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Mark the layer read-only. There is no way back.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
        tracing::info!(layer_id = self.id, "Sealed layer");
    }

    fn resolve(&self, path: &str) -> StoreResult<PathBuf> {
        validate_path(path)?;
        Ok(self.root.join(path))
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.is_sealed() {
            Err(StoreError::ReadOnly(self.id))
        } else {
            Ok(())
        }
    }
}

/// Move a directory tree, falling back to copy-then-delete when a rename is
/// not possible (e.g. across devices).
async fn move_tree(source: &Path, destination: &Path) -> std::io::Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).await?;
    }

    match fs::rename(source, destination).await {
        Ok(()) => Ok(()),
        Err(err) => {
            tracing::debug!(
                source = %source.display(),
                destination = %destination.display(),
                error = %err,
                "Rename failed, copying instead"
            );
            copy_dir_recursive(source, destination).await?;
            fs::remove_dir_all(source).await
        }
    }
}

async fn copy_dir_recursive(source: &Path, destination: &Path) -> std::io::Result<()> {
    let mut stack = vec![(source.to_path_buf(), destination.to_path_buf())];

    while let Some((src, dst)) = stack.pop() {
        fs::create_dir_all(&dst).await?;
        let mut dir = fs::read_dir(&src).await?;
        while let Some(entry) = dir.next_entry().await? {
            let target = dst.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                stack.push((entry.path(), target));
            } else {
                fs::copy(entry.path(), target).await?;
            }
        }
    }

    Ok(())
}

#[async_trait]
impl Layer for DiskLayer {
    fn id(&self) -> LayerId {
        self.id
    }

    fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    async fn write(&self, path: &str, content: &[u8]) -> StoreResult<()> {
        self.check_writable()?;
        let full_path = self.resolve(path)?;

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full_path)
            .await
        {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(StoreError::Conflict(format!(
                    "File already exists in layer {}: {path}",
                    self.id
                )));
            }
            Err(err) => return Err(err.into()),
        };

        file.write_all(content).await?;
        file.flush().await?;

        Ok(())
    }

    async fn create_directories(&self, path: &str) -> StoreResult<()> {
        self.check_writable()?;
        let full_path = self.resolve(path)?;
        fs::create_dir_all(&full_path).await?;
        Ok(())
    }

    async fn move_directory_into(&self, source: &Path, destination: &str) -> StoreResult<()> {
        self.check_writable()?;
        let target = self.resolve(destination)?;
        move_tree(source, &target).await?;
        Ok(())
    }

    async fn move_directory_out_of(&self, source: &str, destination: &Path) -> StoreResult<()> {
        self.check_writable()?;
        let full_source = self.resolve(source)?;
        move_tree(&full_source, destination).await?;
        Ok(())
    }

    async fn move_directory_internal(&self, source: &str, destination: &str) -> StoreResult<()> {
        self.check_writable()?;
        let full_source = self.resolve(source)?;
        let full_destination = self.resolve(destination)?;
        move_tree(&full_source, &full_destination).await?;
        Ok(())
    }

    async fn delete_directory(&self, path: &str) -> StoreResult<()> {
        self.check_writable()?;
        let full_path = self.resolve(path)?;
        match fs::remove_dir_all(&full_path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete_files(&self, paths: &[String]) -> StoreResult<()> {
        // No sealed check: purges are allowed on archived layers.
        for path in paths {
            let full_path = self.resolve(path)?;
            match fs::remove_file(&full_path).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    async fn read(&self, path: &str) -> StoreResult<Vec<u8>> {
        let full_path = self.resolve(path)?;
        match fs::read(&full_path).await {
            Ok(content) => Ok(content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(path.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn file_exists(&self, path: &str) -> StoreResult<bool> {
        let full_path = self.resolve(path)?;
        Ok(fs::try_exists(&full_path).await?)
    }
}
