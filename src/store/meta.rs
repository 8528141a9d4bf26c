//! SQLite-backed metadata store.

use async_trait::async_trait;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};

use crate::schema::element_meta_info;

use super::pool::{AsyncSqliteConnection, AsyncSqlitePool, DieselError};
use super::{MetaRow, MetaStore, StoreError};

const CREATE_TABLE: &str = "\
CREATE TABLE element_meta_info (
    element_id TEXT PRIMARY KEY NOT NULL,
    page_index INTEGER,
    element_type TEXT NOT NULL,
    page_position TEXT,
    text_level INTEGER,
    bucket_name TEXT,
    image_file_path TEXT,
    image_file_name TEXT,
    image_file_type TEXT,
    image_file_suffix TEXT,
    knowledge_base_id TEXT,
    knowledge_base_name TEXT,
    parent_knowledge_base_id TEXT,
    parent_knowledge_base_name TEXT,
    knowledge_type TEXT,
    status INTEGER NOT NULL DEFAULT 0,
    creator TEXT NOT NULL DEFAULT '',
    create_time TEXT NOT NULL,
    updater TEXT NOT NULL DEFAULT '',
    update_time TEXT NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0
)";

const CREATE_INDEXES: [&str; 3] = [
    "CREATE INDEX IF NOT EXISTS idx_element_meta_page_index ON element_meta_info (page_index)",
    "CREATE INDEX IF NOT EXISTS idx_element_meta_type ON element_meta_info (element_type)",
    "CREATE INDEX IF NOT EXISTS idx_element_meta_kb ON element_meta_info (knowledge_base_id)",
];

#[derive(Insertable)]
#[diesel(table_name = element_meta_info)]
struct NewElementMeta {
    element_id: String,
    page_index: Option<i32>,
    element_type: String,
    page_position: Option<String>,
    text_level: Option<i32>,
    bucket_name: Option<String>,
    image_file_path: Option<String>,
    image_file_name: Option<String>,
    image_file_type: Option<String>,
    image_file_suffix: Option<String>,
    knowledge_base_id: Option<String>,
    knowledge_base_name: Option<String>,
    parent_knowledge_base_id: Option<String>,
    parent_knowledge_base_name: Option<String>,
    knowledge_type: Option<String>,
    status: i32,
    creator: String,
    create_time: String,
    updater: String,
    update_time: String,
    deleted: i32,
}

impl From<&MetaRow> for NewElementMeta {
    fn from(row: &MetaRow) -> Self {
        Self {
            element_id: row.element_id.clone(),
            page_index: row.page_index,
            element_type: row.element_type.as_str().to_string(),
            page_position: row.page_position.clone(),
            text_level: row.text_level,
            bucket_name: row.bucket_name.clone(),
            image_file_path: row.image_file_path.clone(),
            image_file_name: row.image_file_name.clone(),
            image_file_type: row.image_file_type.clone(),
            image_file_suffix: row.image_file_suffix.clone(),
            knowledge_base_id: Some(row.knowledge.kb_id.clone()),
            knowledge_base_name: Some(row.knowledge.kb_name.clone()),
            parent_knowledge_base_id: row.knowledge.parent_kb_id.clone(),
            parent_knowledge_base_name: row.knowledge.parent_kb_name.clone(),
            knowledge_type: row.knowledge.knowledge_type.clone(),
            status: row.audit.status,
            creator: row.audit.creator.clone(),
            create_time: row.audit.create_time.to_rfc3339(),
            updater: row.audit.updater.clone(),
            update_time: row.audit.update_time.to_rfc3339(),
            deleted: row.audit.deleted,
        }
    }
}

/// Metadata store over one SQLite database file.
#[derive(Clone)]
pub struct SqliteMetaStore {
    pool: AsyncSqlitePool,
}

impl SqliteMetaStore {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// The DDL a manual migration needs to apply.
    pub fn migration_ddl() -> String {
        let mut ddl = format!("{CREATE_TABLE};");
        for index in CREATE_INDEXES {
            ddl.push_str("\n");
            ddl.push_str(index);
            ddl.push(';');
        }
        ddl
    }
}

#[async_trait]
impl MetaStore for SqliteMetaStore {
    async fn ensure_schema(&self, auto_create: bool) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        if table_exists(&mut conn, "element_meta_info").await? {
            return Ok(());
        }
        if !auto_create {
            return Err(StoreError::MissingTable {
                table: "element_meta_info".to_string(),
                ddl: Self::migration_ddl(),
            });
        }

        tracing::info!(db = %self.pool.database_url(), "creating element_meta_info schema");
        diesel::sql_query(CREATE_TABLE).execute(&mut conn).await?;
        for index in CREATE_INDEXES {
            diesel::sql_query(index).execute(&mut conn).await?;
        }
        Ok(())
    }

    async fn insert_batch(&self, rows: &[MetaRow]) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let records: Vec<NewElementMeta> = rows.iter().map(NewElementMeta::from).collect();
        let mut conn = self.pool.get().await?;

        let written = conn
            .transaction(|conn| {
                Box::pin(async move {
                    let mut written = 0usize;
                    for record in &records {
                        written += diesel::insert_into(element_meta_info::table)
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
            deleted += diesel::delete(
                element_meta_info::table.filter(element_meta_info::element_id.eq_any(chunk)),
            )
            .execute(&mut conn)
            .await?;
        }
        Ok(deleted)
    }

    async fn existing_ids(&self, ids: &[String]) -> Result<Vec<String>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.get().await?;
        let mut present = Vec::new();
        for chunk in ids.chunks(500) {
            let mut found: Vec<String> = element_meta_info::table
                .filter(element_meta_info::element_id.eq_any(chunk))
                .select(element_meta_info::element_id)
                .load(&mut conn)
                .await?;
            present.append(&mut found);
        }
        Ok(present)
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let mut conn = self.pool.get().await?;
        let count: i64 = element_meta_info::table
            .filter(element_meta_info::deleted.eq(0))
            .count()
            .get_result(&mut conn)
            .await?;
        Ok(count as u64)
    }
}

#[derive(QueryableByName)]
struct TableCount {
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    n: i64,
}

/// Check for a table in `sqlite_master`.
pub(super) async fn table_exists(
    conn: &mut AsyncSqliteConnection,
    table: &str,
) -> Result<bool, DieselError> {
    let result: TableCount = diesel::sql_query(
        "SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'table' AND name = ?",
    )
    .bind::<diesel::sql_types::Text, _>(table)
    .get_result(conn)
    .await?;
    Ok(result.n > 0)
}
