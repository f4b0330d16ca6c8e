use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use crate::types::{LayerId, RecordId};

/// Type of the entry a listing record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntryType {
    File,
    Directory,
    Other,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::File => "file",
            EntryType::Directory => "directory",
            EntryType::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "file" => Some(EntryType::File),
            "directory" => Some(EntryType::Directory),
            "other" => Some(EntryType::Other),
            _ => None,
        }
    }
}

/// One row of the listing index: a path as it exists in one layer.
///
/// `record_id` is `None` until the record has been persisted. `content` is
/// an inlined copy of the file body, present only when the record was
/// ingested through a filter that elected to inline it; the on-disk file
/// remains the authoritative copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRecord {
    pub record_id: Option<RecordId>,
    pub layer_id: LayerId,
    pub path: String,
    pub entry_type: EntryType,
    pub content: Option<Vec<u8>>,
}

impl ListingRecord {
    pub fn new(layer_id: LayerId, path: impl Into<String>, entry_type: EntryType) -> Self {
        Self { record_id: None, layer_id, path: path.into(), entry_type, content: None }
    }

    pub fn with_content(mut self, content: Vec<u8>) -> Self {
        self.content = Some(content);
        self
    }
}

impl FromRow<'_, SqliteRow> for ListingRecord {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let type_str: String = row.try_get("entry_type")?;
        let entry_type = EntryType::from_str(&type_str).ok_or_else(|| sqlx::Error::ColumnDecode {
            index: "entry_type".to_string(),
            source: format!("unknown entry type: {type_str}").into(),
        })?;

        Ok(Self {
            record_id: row.try_get("record_id")?,
            layer_id: row.try_get("layer_id")?,
            path: row.try_get("path")?,
            entry_type,
            content: row.try_get("content")?,
        })
    }
}
