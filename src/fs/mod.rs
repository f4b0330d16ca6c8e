//! Virtual filesystem: path syntax, error taxonomy, and the layered
//! storage facade.

pub mod error;
pub mod operations;
pub mod path;

pub use error::{StoreError, StoreResult};
pub use operations::LayeredStorage;
