//! Layer stack management.
//!
//! The manager owns the ordered set of layers. The layer with the greatest
//! id is the top layer and the only one accepting mutations. Creating and
//! sealing layers is external policy; the manager only registers and serves
//! the current stack.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tokio::fs;

use crate::fs::error::{StoreError, StoreResult};
use crate::types::LayerId;

use super::disk::DiskLayer;
use super::traits::Layer;

#[derive(Default)]
pub struct LayerManager {
    layers: RwLock<BTreeMap<LayerId, Arc<dyn Layer>>>,
}

impl LayerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an existing layer stack from its root directory: one numeric
    /// subdirectory per layer id, all but the newest sealed.
    pub async fn open(root: &Path) -> StoreResult<Self> {
        let mut ids = Vec::new();
        let mut dir = fs::read_dir(root).await?;
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(|name| name.parse::<LayerId>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();

        let manager = Self::new();
        let top = ids.last().copied();
        for id in ids {
            let layer = DiskLayer::open(id, root.join(id.to_string()), Some(id) != top);
            manager.add_layer(Arc::new(layer))?;
        }

        tracing::info!(root = %root.display(), top_layer = ?top, "Opened layer stack");

        Ok(manager)
    }

    /// Register a layer. Fails if a layer with the same id is already known.
    pub fn add_layer(&self, layer: Arc<dyn Layer>) -> StoreResult<()> {
        let id = layer.id();
        let mut layers = self.layers.write().unwrap_or_else(|e| e.into_inner());
        if layers.contains_key(&id) {
            return Err(StoreError::InvariantViolation(format!(
                "Layer {id} is already registered"
            )));
        }
        layers.insert(id, layer);
        Ok(())
    }

    /// The layer with the greatest id; the only mutable one.
    pub fn top_layer(&self) -> StoreResult<Arc<dyn Layer>> {
        let layers = self.layers.read().unwrap_or_else(|e| e.into_inner());
        layers
            .values()
            .next_back()
            .cloned()
            .ok_or_else(|| StoreError::InvariantViolation("Layer stack is empty".to_string()))
    }

    pub fn layer(&self, id: LayerId) -> StoreResult<Arc<dyn Layer>> {
        let layers = self.layers.read().unwrap_or_else(|e| e.into_inner());
        layers.get(&id).cloned().ok_or_else(|| StoreError::NotFound(format!("layer {id}")))
    }

    /// All layers, ascending by id.
    pub fn layers(&self) -> Vec<Arc<dyn Layer>> {
        let layers = self.layers.read().unwrap_or_else(|e| e.into_inner());
        layers.values().cloned().collect()
    }
}
