//! Inlining filters.
//!
//! When a directory tree is moved into the store, the filter decides which
//! of its files get their content inlined into the listing index. Inlined
//! content is a read cache; the on-disk copy stays authoritative.

use std::path::Path;

pub trait InliningFilter: Send + Sync {
    fn accept(&self, path: &Path) -> bool;
}

/// Default filter: nothing is inlined.
pub struct RejectAll;

impl InliningFilter for RejectAll {
    fn accept(&self, _path: &Path) -> bool {
        false
    }
}

/// Accepts OCFL inventory files: `inventory.json` and its digest sidecars
/// (`inventory.json.sha512` etc.). These are small and read on every object
/// access, so caching them in the index pays off.
pub struct InventoryFilter;

impl InliningFilter for InventoryFilter {
    fn accept(&self, path: &Path) -> bool {
        match path.file_name().and_then(|name| name.to_str()) {
            Some(name) => name == "inventory.json" || name.starts_with("inventory.json."),
            None => false,
        }
    }
}
