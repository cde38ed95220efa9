//! Error taxonomy for the inventory pipeline.
//!
//! Each component has its own error enum; recoverable conditions
//! (enumeration failures, malformed payloads, isolated write failures) are
//! counted against the inventory index rather than propagated, while fatal
//! conditions abort the current operation and leave the index or model in a
//! well-defined state.

use thiserror::Error;

/// Errors raised by the resource type registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A type name was requested that no descriptor declares.
    #[error("unknown resource type '{0}'")]
    UnknownType(String),

    /// The static descriptor table is inconsistent (unresolved reference,
    /// duplicate name, or dependency cycle). Detected at startup.
    #[error("registry integrity error: {0}")]
    Integrity(String),
}

/// A raw payload that could not be turned into a resource.
///
/// Recoverable: the crawler logs it, counts it, and skips the item.
#[derive(Debug, Error)]
#[error("malformed '{type_name}' payload: {reason}")]
pub struct MalformedPayload {
    pub type_name: String,
    pub reason: String,
}

/// Errors surfaced by an API client adapter.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid enumeration URL: {0}")]
    Url(#[from] url::ParseError),

    /// Enumeration of one resource type under one parent failed.
    /// Recoverable: attributed to that (parent, type) pair and counted.
    #[error("enumeration of '{type_name}' under '{parent}' failed: {reason}")]
    Enumeration {
        type_name: String,
        parent: String,
        reason: String,
    },
}

/// Errors raised by the inventory storage layer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("inventory index {0} not found")]
    IndexNotFound(i64),

    /// `complete_index` was called twice for the same index.
    #[error("inventory index {0} is already completed")]
    AlreadyCompleted(i64),
}

/// A purge run that aborted partway through.
///
/// Purge is atomic per index, not globally: indexes removed before the
/// failure stay removed, and the counts report exactly how far it got.
#[derive(Debug, Error)]
#[error("purge aborted after {purged} of {attempted} indexes: {source}")]
pub struct PurgeError {
    pub purged: u64,
    pub attempted: u64,
    #[source]
    pub source: StorageError,
}

/// Fatal crawl failures. Recoverable per-item conditions never surface
/// here; they are counted on the index instead.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("invalid crawl root '{0}', expected 'type/key'")]
    InvalidRoot(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Fatal import failures. An import that fails leaves no partial model.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("inventory index {0} not found")]
    IndexNotFound(i64),

    #[error("inventory index {index_id} has status {status}, cannot import")]
    IndexNotComplete { index_id: i64, status: String },

    /// A type present in the snapshot is absent from the registry.
    #[error("resource type '{0}' is not known to the registry")]
    UnknownResourceType(String),

    #[error("model name '{0}' is already in use")]
    NameAlreadyInUse(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Model lifecycle errors.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model '{0}' not found")]
    ModelNotFound(String),

    /// The model is the process-wide active model; deletion is refused.
    #[error("model '{0}' is currently in use")]
    ModelInUse(String),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<sqlx::Error> for ImportError {
    fn from(e: sqlx::Error) -> Self {
        ImportError::Storage(StorageError::Database(e))
    }
}

impl From<sqlx::Error> for ModelError {
    fn from(e: sqlx::Error) -> Self {
        ModelError::Storage(StorageError::Database(e))
    }
}
