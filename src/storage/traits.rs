use async_trait::async_trait;
#[cfg(any(test, feature = "mockall"))]
use mockall::automock;

use crate::fs::error::StoreResult;
use crate::types::LayerId;

use super::models::ListingRecord;

/// Persistence contract for the listing index.
///
/// Every query that collapses the layer stack ("visible view") selects, for
/// each path, the record with the greatest layer id.
#[cfg_attr(any(test, feature = "mockall"), automock)]
#[async_trait]
pub trait ListingStore: Send + Sync {
    /// Insert a `File` record. The caller guarantees `layer_id` is the top
    /// layer.
    async fn add_file(&self, layer_id: LayerId, path: &str) -> StoreResult<ListingRecord>;

    /// Ensure `Directory` records exist in `layer_id` for `path` and every
    /// ancestor. Returns only the newly created records; idempotent within
    /// a layer.
    async fn add_directories(&self, layer_id: LayerId, path: &str)
    -> StoreResult<Vec<ListingRecord>>;

    /// Bulk insert with the same invariant checks as `add_file`.
    async fn add_records(&self, records: &[ListingRecord]) -> StoreResult<()>;

    /// Bulk upsert by record id; records without an id are inserted.
    /// Returns the records with ids assigned.
    async fn save_records(&self, records: Vec<ListingRecord>) -> StoreResult<Vec<ListingRecord>>;

    /// Remove records by record id.
    async fn delete_records(&self, records: &[ListingRecord]) -> StoreResult<()>;

    /// Visible immediate children of `path` (`""` addresses the root).
    async fn list_directory(&self, path: &str) -> StoreResult<Vec<ListingRecord>>;

    /// Visible proper descendants of `path`.
    async fn list_recursive(&self, path: &str) -> StoreResult<Vec<ListingRecord>>;

    /// Layer ids containing a record for `path`, ascending.
    async fn find_layers_containing(&self, path: &str) -> StoreResult<Vec<LayerId>>;

    /// Every record for `path`, across all layers, ascending by layer id.
    async fn get_records_by_path(&self, path: &str) -> StoreResult<Vec<ListingRecord>>;

    /// True when the newest record for `path` carries an inlined content blob.
    async fn is_content_inlined(&self, path: &str) -> StoreResult<bool>;

    /// The inlined content blob of the newest record for `path`.
    async fn read_inlined(&self, path: &str) -> StoreResult<Vec<u8>>;

    /// Every record in the index.
    async fn list_all(&self) -> StoreResult<Vec<ListingRecord>>;
}
