use async_trait::async_trait;
#[cfg(any(test, feature = "mockall"))]
use mockall::automock;
use std::path::Path;

use crate::fs::error::StoreResult;
use crate::types::LayerId;

/// A single filesystem layer: a subtree on disk owned exclusively by this
/// layer. All paths are virtual paths confined to the layer root; external
/// host paths appear only in the move/copy boundary operations.
///
/// Sealed layers reject mutations with `ReadOnly`, with one exception:
/// `delete_files` operates on sealed layers too, because purging content
/// from archived layers is a sanctioned repository operation.
#[cfg_attr(any(test, feature = "mockall"), automock)]
#[async_trait]
pub trait Layer: Send + Sync + std::fmt::Debug {
    fn id(&self) -> LayerId;

    fn is_sealed(&self) -> bool;

    /// Write a new file, creating parent directories as needed. Overwriting
    /// is not supported; callers guarantee novelty through the listing index.
    async fn write(&self, path: &str, content: &[u8]) -> StoreResult<()>;

    async fn create_directories(&self, path: &str) -> StoreResult<()>;

    /// Move an external directory tree into the layer at `destination`.
    /// Uses a rename when possible, else copy-then-delete.
    async fn move_directory_into(&self, source: &Path, destination: &str) -> StoreResult<()>;

    /// Move a directory tree out of the layer to an external `destination`.
    /// Inverse of `move_directory_into`.
    async fn move_directory_out_of(&self, source: &str, destination: &Path) -> StoreResult<()>;

    /// Rename a directory within the layer.
    async fn move_directory_internal(&self, source: &str, destination: &str) -> StoreResult<()>;

    /// Recursively delete a directory.
    async fn delete_directory(&self, path: &str) -> StoreResult<()>;

    /// Best-effort bulk file removal; missing files are skipped.
    async fn delete_files(&self, paths: &[String]) -> StoreResult<()>;

    async fn read(&self, path: &str) -> StoreResult<Vec<u8>>;

    async fn file_exists(&self, path: &str) -> StoreResult<bool>;
}
