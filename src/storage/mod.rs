pub mod listing;
pub mod models;
pub mod pool;
pub mod traits;

pub use listing::ListingOperations;
pub use models::{EntryType, ListingRecord};
pub use pool::{DatabasePool, DatabaseTransaction};
pub use traits::ListingStore;

#[cfg(any(test, feature = "mockall"))]
pub use traits::MockListingStore;
