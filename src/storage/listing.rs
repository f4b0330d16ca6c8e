use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;
use sqlx::SqliteConnection;

use crate::fs::error::{StoreError, StoreResult};
use crate::fs::path::{prefixes, validate_path};
use crate::types::{LayerId, RecordId};

use super::models::{EntryType, ListingRecord};
use super::traits::ListingStore;

/// Listing-index operations over the `listing_records` table.
pub struct ListingOperations<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ListingOperations<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }
}

/// Escape LIKE wildcards in a path so it can be used inside a pattern.
fn escape_like(path: &str) -> String {
    path.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// LIKE patterns selecting descendants (resp. grandchildren and deeper) of
/// `path`. The empty path addresses the virtual root.
fn descendant_patterns(path: &str) -> (String, String) {
    if path.is_empty() {
        ("%".to_string(), "%/%".to_string())
    } else {
        let escaped = escape_like(path);
        (format!("{escaped}/%"), format!("{escaped}/%/%"))
    }
}

async fn exists_with_type(
    conn: &mut SqliteConnection,
    path: &str,
    entry_type: EntryType,
) -> StoreResult<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM listing_records WHERE path = ?1 AND entry_type = ?2)",
    )
    .bind(path)
    .bind(entry_type.as_str())
    .fetch_one(conn)
    .await?;

    Ok(exists)
}

async fn exists_in_layer(
    conn: &mut SqliteConnection,
    layer_id: LayerId,
    path: &str,
) -> StoreResult<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM listing_records WHERE path = ?1 AND layer_id = ?2)",
    )
    .bind(path)
    .bind(layer_id)
    .fetch_one(conn)
    .await?;

    Ok(exists)
}

async fn insert_record(
    conn: &mut SqliteConnection,
    record: &ListingRecord,
) -> StoreResult<RecordId> {
    let result = sqlx::query(
        r#"
        INSERT INTO listing_records (layer_id, path, entry_type, content)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(record.layer_id)
    .bind(&record.path)
    .bind(record.entry_type.as_str())
    .bind(record.content.as_deref())
    .execute(conn)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Checks shared by every insert path: a `File` may not land on a path that
/// is a `Directory` in any layer (and vice versa), and `(layer_id, path)`
/// must be new.
async fn check_insertable(
    conn: &mut SqliteConnection,
    record: &ListingRecord,
) -> StoreResult<()> {
    match record.entry_type {
        EntryType::File => {
            if exists_with_type(conn, &record.path, EntryType::Directory).await? {
                return Err(StoreError::Conflict(format!(
                    "Cannot add file {} because it is already occupied by a directory.",
                    record.path
                )));
            }
        }
        EntryType::Directory => {
            if exists_with_type(conn, &record.path, EntryType::File).await? {
                return Err(StoreError::Conflict(format!(
                    "Cannot add directory {} because it is already occupied by a file.",
                    record.path
                )));
            }
        }
        EntryType::Other => {}
    }

    if exists_in_layer(conn, record.layer_id, &record.path).await? {
        return Err(StoreError::Duplicate {
            layer_id: record.layer_id,
            path: record.path.clone(),
        });
    }

    Ok(())
}

#[async_trait]
impl<'a> ListingStore for ListingOperations<'a> {
    async fn add_file(&self, layer_id: LayerId, path: &str) -> StoreResult<ListingRecord> {
        validate_path(path)?;

        let mut record = ListingRecord::new(layer_id, path, EntryType::File);
        let mut tx = self.pool.begin().await?;
        check_insertable(&mut tx, &record).await?;
        record.record_id = Some(insert_record(&mut tx, &record).await?);
        tx.commit().await?;

        tracing::debug!(layer_id, path, "Added file record");

        Ok(record)
    }

    async fn add_directories(
        &self,
        layer_id: LayerId,
        path: &str,
    ) -> StoreResult<Vec<ListingRecord>> {
        validate_path(path)?;

        let mut created = Vec::new();
        let mut tx = self.pool.begin().await?;

        for prefix in prefixes(path) {
            if exists_with_type(&mut tx, &prefix, EntryType::File).await? {
                return Err(StoreError::Conflict(format!(
                    "Cannot add directory {prefix} because it is already occupied by a file."
                )));
            }
            if exists_in_layer(&mut tx, layer_id, &prefix).await? {
                continue;
            }

            let mut record = ListingRecord::new(layer_id, prefix, EntryType::Directory);
            record.record_id = Some(insert_record(&mut tx, &record).await?);
            created.push(record);
        }

        tx.commit().await?;

        tracing::debug!(layer_id, path, created = created.len(), "Added directory records");

        Ok(created)
    }

    async fn add_records(&self, records: &[ListingRecord]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        for record in records {
            validate_path(&record.path)?;
            check_insertable(&mut tx, record).await?;
            insert_record(&mut tx, record).await?;
        }

        tx.commit().await?;

        Ok(())
    }

    async fn save_records(&self, records: Vec<ListingRecord>) -> StoreResult<Vec<ListingRecord>> {
        let mut saved = records;
        let mut tx = self.pool.begin().await?;

        for record in &mut saved {
            validate_path(&record.path)?;
            match record.record_id {
                Some(record_id) => {
                    sqlx::query(
                        r#"
                        UPDATE listing_records
                        SET layer_id = ?1, path = ?2, entry_type = ?3, content = ?4
                        WHERE record_id = ?5
                        "#,
                    )
                    .bind(record.layer_id)
                    .bind(&record.path)
                    .bind(record.entry_type.as_str())
                    .bind(record.content.as_deref())
                    .bind(record_id)
                    .execute(&mut *tx)
                    .await?;
                }
                None => {
                    record.record_id = Some(insert_record(&mut tx, record).await?);
                }
            }
        }

        tx.commit().await?;

        tracing::debug!(count = saved.len(), "Saved listing records");

        Ok(saved)
    }

    async fn delete_records(&self, records: &[ListingRecord]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        for record in records {
            if let Some(record_id) = record.record_id {
                sqlx::query("DELETE FROM listing_records WHERE record_id = ?1")
                    .bind(record_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;

        tracing::debug!(count = records.len(), "Deleted listing records");

        Ok(())
    }

    async fn list_directory(&self, path: &str) -> StoreResult<Vec<ListingRecord>> {
        let (children, grandchildren) = descendant_patterns(path);

        let records = sqlx::query_as::<_, ListingRecord>(
            r#"
            SELECT record_id, layer_id, path, entry_type, content
            FROM listing_records AS l
            WHERE l.path LIKE ?1 ESCAPE '\'
              AND l.path NOT LIKE ?2 ESCAPE '\'
              AND l.layer_id = (SELECT MAX(l2.layer_id)
                                FROM listing_records AS l2
                                WHERE l2.path = l.path)
            "#,
        )
        .bind(&children)
        .bind(&grandchildren)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    async fn list_recursive(&self, path: &str) -> StoreResult<Vec<ListingRecord>> {
        let (descendants, _) = descendant_patterns(path);

        let records = sqlx::query_as::<_, ListingRecord>(
            r#"
            SELECT record_id, layer_id, path, entry_type, content
            FROM listing_records AS l
            WHERE l.path LIKE ?1 ESCAPE '\'
              AND l.layer_id = (SELECT MAX(l2.layer_id)
                                FROM listing_records AS l2
                                WHERE l2.path = l.path)
            "#,
        )
        .bind(&descendants)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    async fn find_layers_containing(&self, path: &str) -> StoreResult<Vec<LayerId>> {
        let layers: Vec<LayerId> = sqlx::query_scalar(
            "SELECT layer_id FROM listing_records WHERE path = ?1 ORDER BY layer_id",
        )
        .bind(path)
        .fetch_all(self.pool)
        .await?;

        Ok(layers)
    }

    async fn get_records_by_path(&self, path: &str) -> StoreResult<Vec<ListingRecord>> {
        let records = sqlx::query_as::<_, ListingRecord>(
            r#"
            SELECT record_id, layer_id, path, entry_type, content
            FROM listing_records
            WHERE path = ?1
            ORDER BY layer_id
            "#,
        )
        .bind(path)
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    async fn is_content_inlined(&self, path: &str) -> StoreResult<bool> {
        let inlined: Option<bool> = sqlx::query_scalar(
            r#"
            SELECT content IS NOT NULL
            FROM listing_records
            WHERE path = ?1
            ORDER BY layer_id DESC
            LIMIT 1
            "#,
        )
        .bind(path)
        .fetch_optional(self.pool)
        .await?;

        Ok(inlined.unwrap_or(false))
    }

    async fn read_inlined(&self, path: &str) -> StoreResult<Vec<u8>> {
        let content: Option<Option<Vec<u8>>> = sqlx::query_scalar(
            r#"
            SELECT content
            FROM listing_records
            WHERE path = ?1
            ORDER BY layer_id DESC
            LIMIT 1
            "#,
        )
        .bind(path)
        .fetch_optional(self.pool)
        .await?;

        content.flatten().ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn list_all(&self) -> StoreResult<Vec<ListingRecord>> {
        let records = sqlx::query_as::<_, ListingRecord>(
            "SELECT record_id, layer_id, path, entry_type, content FROM listing_records",
        )
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }
}
