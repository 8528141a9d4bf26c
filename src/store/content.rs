//! SQLite-backed document-content store.
//!
//! Models the content collection as `{id, element_type, content}` rows
//! where `content` is the payload sub-document serialized as JSON. Lives
//! in its own database file; it deliberately shares no transaction with
//! the metadata store.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};

use crate::schema::element_data;

use super::meta::table_exists;
use super::pool::{AsyncSqlitePool, DieselError};
use super::{ContentRow, ContentStore, StoreError};

const CREATE_TABLE: &str = "\
CREATE TABLE element_data (
    id TEXT PRIMARY KEY NOT NULL,
    element_type TEXT NOT NULL,
    content TEXT NOT NULL,
    status INTEGER NOT NULL DEFAULT 0,
    creator TEXT NOT NULL DEFAULT '',
    create_time TEXT NOT NULL,
    updater TEXT NOT NULL DEFAULT '',
    update_time TEXT NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0
)";

const CREATE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_element_data_type ON element_data (element_type)";

#[derive(Insertable)]
#[diesel(table_name = element_data)]
struct NewElementData {
    id: String,
    element_type: String,
    content: String,
    status: i32,
    creator: String,
    create_time: String,
    updater: String,
    update_time: String,
    deleted: i32,
}

/// Content store over one SQLite database file.
#[derive(Clone)]
pub struct SqliteContentStore {
    pool: AsyncSqlitePool,
}

impl SqliteContentStore {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// The DDL a manual migration needs to apply.
    pub fn migration_ddl() -> String {
        format!("{CREATE_TABLE};\n{CREATE_INDEX};")
    }
}

#[async_trait]
impl ContentStore for SqliteContentStore {
    async fn ensure_schema(&self, auto_create: bool) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        if table_exists(&mut conn, "element_data").await? {
            return Ok(());
        }
        if !auto_create {
            return Err(StoreError::MissingTable {
                table: "element_data".to_string(),
                ddl: Self::migration_ddl(),
            });
        }

        tracing::info!(db = %self.pool.database_url(), "creating element_data schema");
        diesel::sql_query(CREATE_TABLE).execute(&mut conn).await?;
        diesel::sql_query(CREATE_INDEX).execute(&mut conn).await?;
        Ok(())
    }

    async fn insert_batch(&self, rows: &[ContentRow]) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let records = rows
            .iter()
            .map(|row| {
                Ok(NewElementData {
                    id: row.id.clone(),
                    element_type: row.element_type.as_str().to_string(),
                    content: serde_json::to_string(&row.content)?,
                    status: row.audit.status,
                    creator: row.audit.creator.clone(),
                    create_time: row.audit.create_time.to_rfc3339(),
                    updater: row.audit.updater.clone(),
                    update_time: row.audit.update_time.to_rfc3339(),
                    deleted: row.audit.deleted,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        let mut conn = self.pool.get().await?;
        let written = conn
            .transaction(|conn| {
                Box::pin(async move {
                    let mut written = 0usize;
                    for record in &records {
                        written += diesel::insert_into(element_data::table)
                            .values(record)
                            .execute(conn)
                            .await?;
                    }
                    Ok::<usize, DieselError>(written)
                })
            })
            .await?;

        Ok(written)
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.pool.get().await?;
        let mut deleted = 0usize;
        for chunk in ids.chunks(500) {
            deleted += diesel::delete(element_data::table.filter(element_data::id.eq_any(chunk)))
                .execute(&mut conn)
                .await?;
        }
        Ok(deleted)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let mut conn = self.pool.get().await?;
        let count: i64 = element_data::table
            .filter(element_data::deleted.eq(0))
            .count()
            .get_result(&mut conn)
            .await?;
        Ok(count as u64)
    }
}
