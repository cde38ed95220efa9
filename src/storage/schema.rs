//! Schema definitions for the inventory database.
//!
//! Plain `IF NOT EXISTS` DDL applied at connect time. Index ids ride on
//! `AUTOINCREMENT` so they are unique and monotonically increasing across
//! the lifetime of the database, including after deletes.

use sqlx::SqlitePool;

use crate::error::StorageError;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS inventory_index (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        started_at TEXT NOT NULL,
        completed_at TEXT,
        status TEXT NOT NULL,
        resource_count INTEGER NOT NULL DEFAULT 0,
        error_count INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS resource (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        index_id INTEGER NOT NULL REFERENCES inventory_index(id),
        key TEXT NOT NULL,
        type TEXT NOT NULL,
        parent_key TEXT,
        parent_type TEXT,
        display_name TEXT,
        raw_data TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_resource_index_type
        ON resource(index_id, type)",
    "CREATE TABLE IF NOT EXISTS model (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        index_id INTEGER NOT NULL REFERENCES inventory_index(id),
        created_at TEXT NOT NULL,
        status TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS model_resource_row (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        model_id TEXT NOT NULL REFERENCES model(id),
        full_name TEXT NOT NULL,
        type TEXT NOT NULL,
        parent_full_name TEXT,
        display_fields TEXT NOT NULL,
        raw_data TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_model_row_name
        ON model_resource_row(model_id, full_name)",
    "CREATE INDEX IF NOT EXISTS idx_model_row_type
        ON model_resource_row(model_id, type)",
];

/// Apply the schema, one statement at a time.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<(), StorageError> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
