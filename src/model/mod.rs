//! Model lifecycle and queries.
//!
//! A model is a named, queryable hierarchical materialization of exactly
//! one inventory snapshot. Models are created by the importer, selected as
//! the process-wide active model, queried by full-name prefix or type, and
//! deleted wholesale; a model is never partially removed.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::ModelError;
use crate::registry::Registry;
use crate::storage::InventoryStorage;

mod importer;

pub use importer::ModelImporter;

/// One model record.
#[derive(Debug, Clone, FromRow)]
pub struct ModelRow {
    pub id: String,
    pub name: String,
    pub index_id: i64,
    pub created_at: DateTime<Utc>,
    pub status: String,
}

/// One normalized resource row inside a model.
#[derive(Debug, Clone, FromRow)]
pub struct ModelResourceRow {
    pub id: i64,
    pub model_id: String,
    pub full_name: String,
    #[sqlx(rename = "type")]
    pub type_name: String,
    pub parent_full_name: Option<String>,
    pub display_fields: String,
    pub raw_data: String,
}

const MODEL_COLUMNS: &str = "id, name, index_id, created_at, status";
const ROW_COLUMNS: &str =
    "id, model_id, full_name, type, parent_full_name, display_fields, raw_data";

/// Reference counts of indexes with an import in flight. Purge consults
/// this so a snapshot is never deleted out from under an importer.
#[derive(Debug, Default)]
pub struct ImportTracker {
    counts: Mutex<HashMap<i64, usize>>,
}

impl ImportTracker {
    fn begin(self: Arc<Self>, index_id: i64) -> ImportGuard {
        {
            let mut counts = self.counts.lock().unwrap_or_else(|e| e.into_inner());
            *counts.entry(index_id).or_insert(0) += 1;
        }
        ImportGuard {
            tracker: self,
            index_id,
        }
    }

    pub fn active(&self) -> HashSet<i64> {
        self.counts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect()
    }
}

struct ImportGuard {
    tracker: Arc<ImportTracker>,
    index_id: i64,
}

impl Drop for ImportGuard {
    fn drop(&mut self) {
        let mut counts = self
            .tracker
            .counts
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(count) = counts.get_mut(&self.index_id) {
            *count -= 1;
            if *count == 0 {
                counts.remove(&self.index_id);
            }
        }
    }
}

/// Lifecycle operations over named models.
pub struct ModelManager {
    registry: Arc<Registry>,
    storage: InventoryStorage,
    active: RwLock<Option<String>>,
    imports: Arc<ImportTracker>,
}

impl ModelManager {
    pub fn new(registry: Arc<Registry>, storage: InventoryStorage) -> Self {
        Self {
            registry,
            storage,
            active: RwLock::new(None),
            imports: Arc::new(ImportTracker::default()),
        }
    }

    /// Build a new model from a completed snapshot. Fails with
    /// `NameAlreadyInUse` when the name exists; concurrent imports of
    /// different snapshots into different names proceed independently.
    pub async fn create_model(&self, name: &str, index_id: i64) -> Result<String, ModelError> {
        let _guard = self.imports.clone().begin(index_id);
        let importer = ModelImporter::new(&self.registry, &self.storage);
        let model_id = importer.import(index_id, name).await?;
        info!(model = name, model_id = %model_id, index_id, "created model");
        Ok(model_id)
    }

    pub async fn get_model(&self, name: &str) -> Result<ModelRow, ModelError> {
        sqlx::query_as::<_, ModelRow>(&format!(
            "SELECT {MODEL_COLUMNS} FROM model WHERE name = ?"
        ))
        .bind(name)
        .fetch_optional(self.storage.pool())
        .await?
        .ok_or_else(|| ModelError::ModelNotFound(name.to_string()))
    }

    pub async fn list_models(&self) -> Result<Vec<ModelRow>, ModelError> {
        Ok(sqlx::query_as::<_, ModelRow>(&format!(
            "SELECT {MODEL_COLUMNS} FROM model ORDER BY name"
        ))
        .fetch_all(self.storage.pool())
        .await?)
    }

    /// Select the process-wide active model. Absent at startup.
    pub async fn use_model(&self, name: &str) -> Result<(), ModelError> {
        self.get_model(name).await?;
        *self.active.write().await = Some(name.to_string());
        info!(model = name, "active model set");
        Ok(())
    }

    pub async fn active_model(&self) -> Option<String> {
        self.active.read().await.clone()
    }

    /// Delete a model and all of its rows atomically. The currently
    /// active model cannot be deleted; retarget with `use_model` first.
    pub async fn delete_model(&self, name: &str) -> Result<(), ModelError> {
        if self.active.read().await.as_deref() == Some(name) {
            return Err(ModelError::ModelInUse(name.to_string()));
        }
        let model = self.get_model(name).await?;

        let mut tx = self.storage.pool().begin().await?;
        sqlx::query("DELETE FROM model_resource_row WHERE model_id = ?")
            .bind(&model.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM model WHERE id = ?")
            .bind(&model.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(model = name, "deleted model");
        Ok(())
    }

    /// Indexes that currently feed an in-flight import.
    pub fn imports_in_flight(&self) -> HashSet<i64> {
        self.imports.active()
    }

    /// Subtree query: rows whose full name equals the prefix or sits
    /// below it.
    pub async fn rows_by_prefix(
        &self,
        name: &str,
        prefix: &str,
    ) -> Result<Vec<ModelResourceRow>, ModelError> {
        let model = self.get_model(name).await?;
        Ok(sqlx::query_as::<_, ModelResourceRow>(&format!(
            r#"
            SELECT {ROW_COLUMNS} FROM model_resource_row
            WHERE model_id = ? AND (full_name = ? OR full_name LIKE ? || '/%')
            ORDER BY full_name
            "#
        ))
        .bind(&model.id)
        .bind(prefix)
        .bind(prefix)
        .fetch_all(self.storage.pool())
        .await?)
    }

    pub async fn rows_by_type(
        &self,
        name: &str,
        type_name: &str,
    ) -> Result<Vec<ModelResourceRow>, ModelError> {
        let model = self.get_model(name).await?;
        Ok(sqlx::query_as::<_, ModelResourceRow>(&format!(
            r#"
            SELECT {ROW_COLUMNS} FROM model_resource_row
            WHERE model_id = ? AND type = ?
            ORDER BY full_name
            "#
        ))
        .bind(&model.id)
        .bind(type_name)
        .fetch_all(self.storage.pool())
        .await?)
    }

    pub async fn row_count(&self, name: &str) -> Result<i64, ModelError> {
        let model = self.get_model(name).await?;
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM model_resource_row WHERE model_id = ?")
                .bind(&model.id)
                .fetch_one(self.storage.pool())
                .await?,
        )
    }
}
