//! Snapshot-to-model import.
//!
//! Reads every resource of one completed inventory index in dependency
//! order (parents before children, per the registry's topological order),
//! computes full hierarchical names, converts raw payloads to display
//! columns, and writes the model plus all of its rows in one transaction.
//! Any failure rolls the whole model back; no partial model survives.

use std::collections::HashMap;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::error::{ImportError, StorageError};
use crate::registry::Registry;
use crate::storage::{InventoryStorage, ResourceRow};

/// A fully prepared model row, ready to insert.
struct PreparedRow {
    full_name: String,
    type_name: String,
    parent_full_name: Option<String>,
    display_fields: String,
    raw_data: String,
}

pub struct ModelImporter<'a> {
    registry: &'a Registry,
    storage: &'a InventoryStorage,
}

impl<'a> ModelImporter<'a> {
    pub fn new(registry: &'a Registry, storage: &'a InventoryStorage) -> Self {
        Self { registry, storage }
    }

    /// Import one snapshot into a new model named `name`.
    ///
    /// Returns the new model id. The snapshot must have completed with
    /// `SUCCESS` or `PARTIAL_SUCCESS`; a resource type unknown to the
    /// registry aborts the import before anything is written.
    pub async fn import(&self, index_id: i64, name: &str) -> Result<String, ImportError> {
        let index = match self.storage.get_index(index_id).await {
            Ok(row) => row,
            Err(StorageError::IndexNotFound(_)) => {
                return Err(ImportError::IndexNotFound(index_id))
            }
            Err(e) => return Err(ImportError::Storage(e)),
        };
        if !index.status().map(|s| s.importable()).unwrap_or(false) {
            return Err(ImportError::IndexNotComplete {
                index_id,
                status: index.status.clone(),
            });
        }

        for type_name in self.storage.types_in_index(index_id).await? {
            if !self.registry.contains(&type_name) {
                return Err(ImportError::UnknownResourceType(type_name));
            }
        }

        // Read-and-prepare phase: everything is resolved before the write
        // transaction opens.
        let rows = self.prepare_rows(index_id).await?;

        let model_id = Uuid::new_v4().to_string();
        let mut tx = self.storage.pool().begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO model (id, name, index_id, created_at, status)
            VALUES (?, ?, ?, ?, 'BUILDING')
            "#,
        )
        .bind(&model_id)
        .bind(name)
        .bind(index_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await;
        match inserted {
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                return Err(ImportError::NameAlreadyInUse(name.to_string()));
            }
            Err(e) => return Err(e.into()),
            Ok(_) => {}
        }

        let row_count = rows.len();
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO model_resource_row
                    (model_id, full_name, type, parent_full_name, display_fields, raw_data)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&model_id)
            .bind(&row.full_name)
            .bind(&row.type_name)
            .bind(&row.parent_full_name)
            .bind(&row.display_fields)
            .bind(&row.raw_data)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE model SET status = 'READY' WHERE id = ?")
            .bind(&model_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(index_id, model = name, rows = row_count, "imported model");
        Ok(model_id)
    }

    /// Walk types in dependency order and compute each resource's full
    /// name from its parent's already-computed one.
    async fn prepare_rows(&self, index_id: i64) -> Result<Vec<PreparedRow>, ImportError> {
        let mut full_names: HashMap<String, String> = HashMap::new();
        let mut prepared = Vec::new();

        for type_name in self.registry.import_order() {
            let descriptor = self.registry.describe(type_name)?;
            for row in self.storage.resources_for_type(index_id, type_name).await? {
                let (full_name, parent_full_name) = qualify(&row, &full_names);
                let raw = row.raw()?;
                let display_fields = (descriptor.convert)(&raw).to_string();

                full_names.insert(
                    format!("{}/{}", row.type_name, row.key),
                    full_name.clone(),
                );
                prepared.push(PreparedRow {
                    full_name,
                    type_name: row.type_name,
                    parent_full_name,
                    display_fields,
                    raw_data: row.raw_data,
                });
            }
        }
        Ok(prepared)
    }
}

/// Full name and parent reference for one stored resource.
///
/// A parent that is present in the snapshot contributes its computed full
/// name; a parent that was only a crawl seed contributes a synthesized
/// `type/key` prefix and the row becomes a model root (no parent
/// reference).
fn qualify(row: &ResourceRow, known: &HashMap<String, String>) -> (String, Option<String>) {
    match (row.parent_type.as_deref(), row.parent_key.as_deref()) {
        (Some(parent_type), Some(parent_key)) => {
            let parent_ref = format!("{}/{}", parent_type, parent_key);
            match known.get(&parent_ref) {
                Some(parent_full) => (
                    format!("{}/{}/{}", parent_full, row.type_name, row.key),
                    Some(parent_full.clone()),
                ),
                None => (
                    format!("{}/{}/{}", parent_ref, row.type_name, row.key),
                    None,
                ),
            }
        }
        _ => (format!("{}/{}", row.type_name, row.key), None),
    }
}
