//! Shared identifier types.

/// Identifier of a layer. Monotonically increasing; the top layer has the
/// greatest id.
pub type LayerId = i64;

/// Identifier of a listing record, assigned by the database on insert.
pub type RecordId = i64;
