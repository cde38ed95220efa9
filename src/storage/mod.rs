//! Inventory storage.
//!
//! Persists crawl runs as immutable, uniquely identified snapshots: one
//! `inventory_index` row per crawl, resource rows tagged with the index id,
//! and purge of completed snapshots together with everything built from
//! them. An index and its resources are deleted together, never
//! independently.

use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use tracing::{debug, info};

use crate::crawler::CrawlStats;
use crate::error::{PurgeError, StorageError};
use crate::resource::Resource;

mod schema;

pub use schema::ensure_schema;

const DEFAULT_MAX_CONNECTIONS: u32 = 8;
const BUSY_TIMEOUT_SECS: u64 = 5;

/// Lifecycle state of one crawl run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    Running,
    Success,
    PartialSuccess,
    Failed,
}

impl IndexStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexStatus::Running => "RUNNING",
            IndexStatus::Success => "SUCCESS",
            IndexStatus::PartialSuccess => "PARTIAL_SUCCESS",
            IndexStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RUNNING" => Some(IndexStatus::Running),
            "SUCCESS" => Some(IndexStatus::Success),
            "PARTIAL_SUCCESS" => Some(IndexStatus::PartialSuccess),
            "FAILED" => Some(IndexStatus::Failed),
            _ => None,
        }
    }

    /// Whether a snapshot in this state can feed a model import.
    pub fn importable(&self) -> bool {
        matches!(self, IndexStatus::Success | IndexStatus::PartialSuccess)
    }
}

impl std::fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One crawl run, as stored.
#[derive(Debug, Clone, FromRow)]
pub struct InventoryIndexRow {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: String,
    pub resource_count: i64,
    pub error_count: i64,
}

impl InventoryIndexRow {
    pub fn status(&self) -> Option<IndexStatus> {
        IndexStatus::parse(&self.status)
    }
}

/// One stored resource row.
#[derive(Debug, Clone, FromRow)]
pub struct ResourceRow {
    pub id: i64,
    pub index_id: i64,
    pub key: String,
    #[sqlx(rename = "type")]
    pub type_name: String,
    pub parent_key: Option<String>,
    pub parent_type: Option<String>,
    pub display_name: Option<String>,
    pub raw_data: String,
}

impl ResourceRow {
    pub fn raw(&self) -> Result<serde_json::Value, StorageError> {
        Ok(serde_json::from_str(&self.raw_data)?)
    }
}

/// Storage service for inventory snapshots.
#[derive(Debug, Clone)]
pub struct InventoryStorage {
    pool: SqlitePool,
}

impl InventoryStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database at `url` and apply the
    /// schema.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECS))
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect_with(options)
            .await?;
        ensure_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Allocate a new inventory index in `RUNNING` state.
    ///
    /// Ids are monotonically increasing and never reused.
    pub async fn begin_index(&self) -> Result<i64, StorageError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO inventory_index (started_at, status)
            VALUES (?, 'RUNNING')
            RETURNING id
            "#,
        )
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        info!(index_id = id, "began inventory index");
        Ok(id)
    }

    /// Append one resource row tagged with the index id. Safe to call
    /// concurrently from parallel crawl branches.
    pub async fn store_resource(
        &self,
        index_id: i64,
        resource: &Resource,
    ) -> Result<(), StorageError> {
        let raw = serde_json::to_string(&resource.raw_data)?;
        sqlx::query(
            r#"
            INSERT INTO resource
                (index_id, key, type, parent_key, parent_type, display_name, raw_data)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(index_id)
        .bind(&resource.key)
        .bind(&resource.type_name)
        .bind(&resource.parent_key)
        .bind(&resource.parent_type)
        .bind(&resource.display_name)
        .bind(raw)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record completion of an index. Fails with `AlreadyCompleted` when
    /// the index left `RUNNING` before.
    pub async fn complete_index(
        &self,
        index_id: i64,
        status: IndexStatus,
        stats: &CrawlStats,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE inventory_index
            SET completed_at = ?, status = ?, resource_count = ?, error_count = ?
            WHERE id = ? AND status = 'RUNNING'
            "#,
        )
        .bind(Utc::now())
        .bind(status.as_str())
        .bind(stats.stored as i64)
        .bind(stats.errors as i64)
        .bind(index_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT id FROM inventory_index WHERE id = ?")
                    .bind(index_id)
                    .fetch_optional(&self.pool)
                    .await?;
            return Err(match exists {
                Some(_) => StorageError::AlreadyCompleted(index_id),
                None => StorageError::IndexNotFound(index_id),
            });
        }

        info!(index_id, status = %status, stored = stats.stored, errors = stats.errors,
            "completed inventory index");
        Ok(())
    }

    pub async fn get_index(&self, index_id: i64) -> Result<InventoryIndexRow, StorageError> {
        sqlx::query_as::<_, InventoryIndexRow>(
            r#"
            SELECT id, started_at, completed_at, status, resource_count, error_count
            FROM inventory_index
            WHERE id = ?
            "#,
        )
        .bind(index_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StorageError::IndexNotFound(index_id))
    }

    pub async fn list_indexes(&self) -> Result<Vec<InventoryIndexRow>, StorageError> {
        Ok(sqlx::query_as::<_, InventoryIndexRow>(
            r#"
            SELECT id, started_at, completed_at, status, resource_count, error_count
            FROM inventory_index
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?)
    }

    /// Distinct resource types present in one snapshot.
    pub async fn types_in_index(&self, index_id: i64) -> Result<Vec<String>, StorageError> {
        Ok(
            sqlx::query_scalar("SELECT DISTINCT type FROM resource WHERE index_id = ? ORDER BY type")
                .bind(index_id)
                .fetch_all(&self.pool)
                .await?,
        )
    }

    /// All resources of one type in one snapshot, served by the composite
    /// `(index_id, type)` index.
    pub async fn resources_for_type(
        &self,
        index_id: i64,
        type_name: &str,
    ) -> Result<Vec<ResourceRow>, StorageError> {
        Ok(sqlx::query_as::<_, ResourceRow>(
            r#"
            SELECT id, index_id, key, type, parent_key, parent_type, display_name, raw_data
            FROM resource
            WHERE index_id = ? AND type = ?
            ORDER BY id
            "#,
        )
        .bind(index_id)
        .bind(type_name)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn resource_count(&self, index_id: i64) -> Result<i64, StorageError> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM resource WHERE index_id = ?")
                .bind(index_id)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    pub async fn total_resource_count(&self) -> Result<i64, StorageError> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM resource")
            .fetch_one(&self.pool)
            .await?)
    }

    /// Delete every completed index whose completion timestamp is older
    /// than `cutoff`, cascading to its resources and any model built from
    /// it. `RUNNING` indexes and ids in `protected` (imports in flight)
    /// are skipped silently.
    ///
    /// Atomic per index: a failure aborts the rest of the purge but leaves
    /// every already-purged index fully removed, and the error reports how
    /// many of the attempted indexes completed.
    pub async fn purge(
        &self,
        cutoff: DateTime<Utc>,
        protected: &HashSet<i64>,
    ) -> Result<u64, PurgeError> {
        let candidates: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM inventory_index
            WHERE status != 'RUNNING' AND completed_at IS NOT NULL AND completed_at < ?
            ORDER BY id
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PurgeError {
            purged: 0,
            attempted: 0,
            source: StorageError::Database(e),
        })?;

        let targets: Vec<i64> = candidates
            .into_iter()
            .filter(|id| !protected.contains(id))
            .collect();
        let attempted = targets.len() as u64;

        let mut purged = 0u64;
        for index_id in targets {
            if let Err(source) = self.purge_one(index_id).await {
                return Err(PurgeError {
                    purged,
                    attempted,
                    source,
                });
            }
            purged += 1;
        }

        info!(purged, "purged inventory indexes");
        Ok(purged)
    }

    /// Remove one index, its resources, and dependent models in a single
    /// transaction.
    async fn purge_one(&self, index_id: i64) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM model_resource_row
             WHERE model_id IN (SELECT id FROM model WHERE index_id = ?)",
        )
        .bind(index_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM model WHERE index_id = ?")
            .bind(index_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM resource WHERE index_id = ?")
            .bind(index_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM inventory_index WHERE id = ?")
            .bind(index_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(index_id, "purged index");
        Ok(())
    }
}
