use thiserror::Error;

use crate::types::LayerId;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Record already exists for path {path} in layer {layer_id}")]
    Duplicate { layer_id: LayerId, path: String },

    #[error("{0}")]
    InvariantViolation(String),

    #[error("Layer {0} is sealed and cannot be modified")]
    ReadOnly(LayerId),

    #[error("Invalid UTF-8 content in {0}")]
    Encoding(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
