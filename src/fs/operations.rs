//! The virtual-filesystem facade over the layer stack.
//!
//! Every operation composes a disk mutation on the top layer with a listing
//! index update. Disk actions come first, so readers going through the
//! index never observe a file before its record exists.

use sqlx::sqlite::SqlitePool;
use std::collections::HashMap;
use std::path::Path;
use tokio::fs;
use tracing::{debug, error};

use crate::fs::error::{StoreError, StoreResult};
use crate::fs::path::{base_name, parent_of, prefixes, validate_path};
use crate::layer::{InliningFilter, LayerManager, RejectAll};
use crate::storage::{EntryType, ListingOperations, ListingRecord, ListingStore};
use crate::types::LayerId;

pub struct LayeredStorage<'a> {
    listing: ListingOperations<'a>,
    layers: &'a LayerManager,
    inlining_filter: Box<dyn InliningFilter>,
}

/// A descendant of an external directory tree, captured before the tree is
/// moved into the store.
struct ExternalEntry {
    relative_path: String,
    entry_type: EntryType,
    inline: bool,
}

impl<'a> LayeredStorage<'a> {
    pub fn new(pool: &'a SqlitePool, layers: &'a LayerManager) -> Self {
        Self::with_inlining_filter(pool, layers, Box::new(RejectAll))
    }

    pub fn with_inlining_filter(
        pool: &'a SqlitePool,
        layers: &'a LayerManager,
        inlining_filter: Box<dyn InliningFilter>,
    ) -> Self {
        Self { listing: ListingOperations::new(pool), layers, inlining_filter }
    }

    /// Visible immediate children of `path` (`""` addresses the root).
    pub async fn list_directory(&self, path: &str) -> StoreResult<Vec<ListingRecord>> {
        self.listing.list_directory(path).await
    }

    /// Visible proper descendants of `path`.
    pub async fn list_recursive(&self, path: &str) -> StoreResult<Vec<ListingRecord>> {
        self.listing.list_recursive(path).await
    }

    pub async fn directory_is_empty(&self, path: &str) -> StoreResult<bool> {
        Ok(self.list_directory(path).await?.is_empty())
    }

    pub async fn file_exists(&self, path: &str) -> StoreResult<bool> {
        Ok(!self.listing.find_layers_containing(path).await?.is_empty())
    }

    /// Read file bytes through the overlay: inlined content first, then the
    /// newest layer with a record, then the newest layer holding the file on
    /// disk (legacy state without records).
    pub async fn read(&self, path: &str) -> StoreResult<Vec<u8>> {
        if self.listing.is_content_inlined(path).await? {
            return self.listing.read_inlined(path).await;
        }

        let containing = self.listing.find_layers_containing(path).await?;
        if let Some(layer_id) = containing.last() {
            return self.layers.layer(*layer_id)?.read(path).await;
        }

        for layer in self.layers.layers().into_iter().rev() {
            if layer.file_exists(path).await? {
                return layer.read(path).await;
            }
        }

        Err(StoreError::NotFound(path.to_string()))
    }

    pub async fn read_to_string(&self, path: &str) -> StoreResult<String> {
        let content = self.read(path).await?;
        String::from_utf8(content).map_err(|_| StoreError::Encoding(path.to_string()))
    }

    /// Write a new file into the top layer. The media type is accepted for
    /// interface compatibility and ignored.
    pub async fn write(
        &self,
        path: &str,
        content: &[u8],
        _media_type: Option<&str>,
    ) -> StoreResult<()> {
        let top = self.layers.top_layer()?;
        top.write(path, content).await?;
        self.listing.add_file(top.id(), path).await?;
        Ok(())
    }

    pub async fn create_directories(&self, path: &str) -> StoreResult<()> {
        let top = self.layers.top_layer()?;
        top.create_directories(path).await?;
        self.listing.add_directories(top.id(), path).await?;
        Ok(())
    }

    /// Copy the visible tree under `source` to an external directory.
    /// Records are processed in ascending path length, so a parent directory
    /// always exists before anything inside it is written.
    pub async fn copy_directory_out_of(
        &self,
        source: &str,
        destination: &Path,
    ) -> StoreResult<()> {
        let mut records = self.listing.list_recursive(source).await?;
        records.sort_by_key(|record| record.path.len());

        for record in &records {
            let target = destination.join(&record.path);
            match record.entry_type {
                EntryType::Directory => {
                    fs::create_dir_all(&target).await?;
                }
                EntryType::File => {
                    let content = self.read(&record.path).await?;
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent).await?;
                    }
                    fs::write(&target, content).await?;
                }
                EntryType::Other => {}
            }
        }

        Ok(())
    }

    pub async fn copy_file_into(
        &self,
        source: &Path,
        destination: &str,
        _media_type: Option<&str>,
    ) -> StoreResult<()> {
        let content = fs::read(source).await?;
        let top = self.layers.top_layer()?;
        top.write(destination, &content).await?;
        self.listing.add_file(top.id(), destination).await?;
        Ok(())
    }

    pub async fn copy_file_internal(&self, source: &str, destination: &str) -> StoreResult<()> {
        let content = self.read(source).await?;
        let top = self.layers.top_layer()?;
        top.write(destination, &content).await?;
        self.listing.add_file(top.id(), destination).await?;
        Ok(())
    }

    /// Move an external directory tree into the store at `destination`.
    ///
    /// Order: materialize the destination's parent chain, capture the
    /// external tree, move it on disk, then synthesize and persist the
    /// records (reading inlined content back through the overlay, which at
    /// that point resolves to the just-moved files on disk). If persisting
    /// fails, the tree is moved back out to bound the inconsistency window.
    pub async fn move_directory_into(&self, source: &Path, destination: &str) -> StoreResult<()> {
        validate_path(destination)?;
        let top = self.layers.top_layer()?;

        let parent = parent_of(destination);
        let mut parent_records = Vec::new();
        if !parent.is_empty() {
            parent_records = self.listing.add_directories(top.id(), parent).await?;
            if !parent_records.is_empty() {
                top.create_directories(parent).await?;
            }
        }

        let entries = self.walk_external(source).await?;

        top.move_directory_into(source, destination).await?;

        let mut records = Vec::with_capacity(entries.len() + parent_records.len());
        for entry in entries {
            let dest_path = if entry.relative_path.is_empty() {
                destination.to_string()
            } else {
                format!("{destination}/{}", entry.relative_path)
            };
            // Inlined bytes must match the authoritative copy at
            // (top, dest_path), which the move just put on disk.
            let content = if entry.inline {
                let content = top.read(&dest_path).await?;
                debug!(path = %dest_path, length = content.len(), "Inlining file content");
                Some(content)
            } else {
                None
            };
            let mut record = ListingRecord::new(top.id(), dest_path, entry.entry_type);
            record.content = content;
            records.push(record);
        }
        records.extend(parent_records);

        if let Err(err) = self.listing.save_records(records).await {
            error!(
                destination,
                error = %err,
                "Failed to persist records after move; moving the directory back out"
            );
            if let Err(undo_err) = top.move_directory_out_of(destination, source).await {
                error!(
                    destination,
                    error = %undo_err,
                    "Compensation failed; disk and index are inconsistent"
                );
            }
            return Err(err);
        }

        Ok(())
    }

    /// Capture every entry of an external tree, including the root itself,
    /// before it is moved. The inlining decision is made here because the
    /// filter operates on external paths.
    async fn walk_external(&self, source: &Path) -> StoreResult<Vec<ExternalEntry>> {
        let metadata = fs::metadata(source).await?;
        let root_type = if metadata.is_dir() {
            EntryType::Directory
        } else if metadata.is_file() {
            EntryType::File
        } else {
            EntryType::Other
        };

        let mut entries = vec![ExternalEntry {
            relative_path: String::new(),
            entry_type: root_type,
            inline: false,
        }];

        let mut stack = vec![(source.to_path_buf(), String::new())];
        while let Some((dir, prefix)) = stack.pop() {
            let mut dir_reader = fs::read_dir(&dir).await?;
            while let Some(entry) = dir_reader.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let relative_path =
                    if prefix.is_empty() { name } else { format!("{prefix}/{name}") };
                let file_type = entry.file_type().await?;
                let entry_type = if file_type.is_dir() {
                    EntryType::Directory
                } else if file_type.is_file() {
                    EntryType::File
                } else {
                    EntryType::Other
                };

                if entry_type == EntryType::Directory {
                    stack.push((entry.path(), relative_path.clone()));
                }

                let inline =
                    entry_type == EntryType::File && self.inlining_filter.accept(&entry.path());
                entries.push(ExternalEntry { relative_path, entry_type, inline });
            }
        }

        Ok(entries)
    }

    /// Rename a directory within the top layer. The source keeps its
    /// basename beneath the destination: `a/b` moved to `c` lands at `c/b`.
    pub async fn move_directory_internal(
        &self,
        source: &str,
        destination: &str,
    ) -> StoreResult<()> {
        validate_path(source)?;
        validate_path(destination)?;
        let top = self.layers.top_layer()?;

        let descendants = self.listing.list_recursive(source).await?;
        self.check_all_in_top_layer(&descendants, top.id(), "move_directory_internal")?;

        let target = format!("{destination}/{}", base_name(source));
        top.move_directory_internal(source, &target).await?;

        let mut records = descendants;
        records.extend(
            self.listing
                .get_records_by_path(source)
                .await?
                .into_iter()
                .filter(|record| record.layer_id == top.id()),
        );
        for record in &mut records {
            record.path = format!("{target}{}", &record.path[source.len()..]);
        }
        self.listing.save_records(records).await?;

        Ok(())
    }

    fn check_all_in_top_layer(
        &self,
        records: &[ListingRecord],
        top_id: LayerId,
        operation: &str,
    ) -> StoreResult<()> {
        for record in records {
            if record.layer_id != top_id {
                return Err(StoreError::InvariantViolation(format!(
                    "Path {} is not in the top layer; {operation} requires the source to be completely in the top layer",
                    record.path
                )));
            }
        }
        Ok(())
    }

    /// Delete a directory tree from the top layer. Records in sealed layers
    /// stay untouched; the precondition rejects trees that extend below the
    /// top layer.
    pub async fn delete_directory(&self, path: &str) -> StoreResult<()> {
        validate_path(path)?;
        let top = self.layers.top_layer()?;

        let descendants = self.listing.list_recursive(path).await?;
        self.check_all_in_top_layer(&descendants, top.id(), "delete_directory")?;

        top.delete_directory(path).await?;

        let mut doomed = descendants;
        doomed.extend(
            self.listing
                .get_records_by_path(path)
                .await?
                .into_iter()
                .filter(|record| record.layer_id == top.id()),
        );
        self.listing.delete_records(&doomed).await?;

        Ok(())
    }

    pub async fn delete_file(&self, path: &str) -> StoreResult<()> {
        self.delete_files(&[path.to_string()]).await
    }

    /// Delete files from every layer containing them, sealed layers
    /// included, and drop their records.
    pub async fn delete_files(&self, paths: &[String]) -> StoreResult<()> {
        let mut layer_paths: HashMap<LayerId, Vec<String>> = HashMap::new();
        let mut doomed = Vec::new();

        for path in paths {
            for record in self.listing.get_records_by_path(path).await? {
                layer_paths.entry(record.layer_id).or_default().push(path.clone());
                doomed.push(record);
            }
        }

        for (layer_id, paths_in_layer) in layer_paths {
            self.layers.layer(layer_id)?.delete_files(&paths_in_layer).await?;
        }

        self.listing.delete_records(&doomed).await?;

        Ok(())
    }

    /// Delete every directory under `path` whose visible view is empty,
    /// deepest first. An empty directory outside the top layer cannot be
    /// deleted and fails the whole sweep.
    pub async fn delete_empty_dirs_down(&self, path: &str) -> StoreResult<()> {
        let mut listings = self.listing.list_recursive(path).await?;
        listings.sort_by(|a, b| b.path.len().cmp(&a.path.len()));

        let top = self.layers.top_layer()?;
        for record in listings {
            if record.entry_type != EntryType::Directory {
                continue;
            }
            if !self.directory_is_empty(&record.path).await? {
                continue;
            }
            if record.layer_id != top.id() {
                return Err(StoreError::InvariantViolation(format!(
                    "Trying to delete empty directory from non-top layer: {}",
                    record.path
                )));
            }
            self.delete_directory(&record.path).await?;
        }

        Ok(())
    }

    /// Walk the ancestors of `path` from deepest to shallowest, deleting
    /// each whose visible view is empty.
    pub async fn delete_empty_dirs_up(&self, path: &str) -> StoreResult<()> {
        validate_path(path)?;

        let mut ancestors = prefixes(path);
        ancestors.pop();

        for ancestor in ancestors.into_iter().rev() {
            if self.directory_is_empty(&ancestor).await? {
                self.delete_directory(&ancestor).await?;
            }
        }

        Ok(())
    }
}
