//! Inventory service facade.
//!
//! The surface the CLI, scheduler and tests consume: run a crawl into a
//! new snapshot, purge old snapshots, and manage models. The facade owns
//! the process-wide pieces: the registry, the storage handle, the API
//! client, and the model manager with its active-model pointer and
//! in-flight import bookkeeping.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::api::ApiClient;
use crate::crawler::{CancelHandle, CrawlStats, Crawler, ResourceSink};
use crate::error::{CrawlError, ModelError, PurgeError, StorageError};
use crate::model::{ModelManager, ModelResourceRow, ModelRow};
use crate::registry::Registry;
use crate::storage::{IndexStatus, InventoryIndexRow, InventoryStorage};

/// Outcome of one crawl run.
#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub index_id: i64,
    pub status: IndexStatus,
    pub stats: CrawlStats,
}

/// Sink writing crawl output into one inventory index.
struct IndexSink {
    storage: InventoryStorage,
    index_id: i64,
}

#[async_trait]
impl ResourceSink for IndexSink {
    async fn store(&self, resource: &crate::resource::Resource) -> Result<(), StorageError> {
        self.storage.store_resource(self.index_id, resource).await
    }
}

/// Final index status for a finished walk.
fn final_status(stats: &CrawlStats) -> IndexStatus {
    if stats.errors == 0 && !stats.cancelled {
        IndexStatus::Success
    } else if stats.stored > 0 {
        IndexStatus::PartialSuccess
    } else {
        IndexStatus::Failed
    }
}

pub struct InventoryService {
    registry: Arc<Registry>,
    storage: InventoryStorage,
    api: Arc<dyn ApiClient>,
    models: ModelManager,
    max_workers: usize,
}

impl InventoryService {
    pub fn new(
        storage: InventoryStorage,
        api: Arc<dyn ApiClient>,
        max_workers: usize,
    ) -> Result<Self, crate::error::RegistryError> {
        let registry = Arc::new(Registry::builtin()?);
        Ok(Self {
            models: ModelManager::new(registry.clone(), storage.clone()),
            registry,
            storage,
            api,
            max_workers,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn storage(&self) -> &InventoryStorage {
        &self.storage
    }

    /// Crawl the hierarchy under the given roots into a new snapshot.
    ///
    /// Blocks until the walk completes or is cancelled. The returned
    /// report carries the final status and counters; the index is always
    /// completed, never left `RUNNING`.
    pub async fn crawl(
        &self,
        roots: &[String],
        cancel: &CancelHandle,
    ) -> Result<CrawlReport, CrawlError> {
        let index_id = self.storage.begin_index().await?;
        info!(index_id, ?roots, "starting crawl");

        let crawler = Crawler::new(&self.registry, self.api.clone(), self.max_workers);
        let sink = IndexSink {
            storage: self.storage.clone(),
            index_id,
        };

        match crawler.run(roots, &sink, cancel).await {
            Ok(stats) => {
                let status = final_status(&stats);
                self.storage.complete_index(index_id, status, &stats).await?;
                Ok(CrawlReport {
                    index_id,
                    status,
                    stats,
                })
            }
            Err(fatal) => {
                // The walk never started; close the index out rather than
                // leaving it RUNNING.
                error!(index_id, error = %fatal, "crawl failed");
                if let Err(e) = self
                    .storage
                    .complete_index(index_id, IndexStatus::Failed, &CrawlStats::default())
                    .await
                {
                    error!(index_id, error = %e, "failed to mark index FAILED");
                }
                Err(fatal)
            }
        }
    }

    /// Purge completed snapshots older than `cutoff`, cascading to their
    /// resources and models. Snapshots feeding an in-flight import are
    /// skipped like `RUNNING` ones.
    pub async fn purge(&self, cutoff: DateTime<Utc>) -> Result<u64, PurgeError> {
        let protected: HashSet<i64> = self.models.imports_in_flight();
        self.storage.purge(cutoff, &protected).await
    }

    pub async fn get_index(&self, index_id: i64) -> Result<InventoryIndexRow, StorageError> {
        self.storage.get_index(index_id).await
    }

    pub async fn list_indexes(&self) -> Result<Vec<InventoryIndexRow>, StorageError> {
        self.storage.list_indexes().await
    }

    pub async fn create_model(&self, name: &str, index_id: i64) -> Result<String, ModelError> {
        self.models.create_model(name, index_id).await
    }

    pub async fn use_model(&self, name: &str) -> Result<(), ModelError> {
        self.models.use_model(name).await
    }

    pub async fn active_model(&self) -> Option<String> {
        self.models.active_model().await
    }

    pub async fn delete_model(&self, name: &str) -> Result<(), ModelError> {
        self.models.delete_model(name).await
    }

    pub async fn list_models(&self) -> Result<Vec<ModelRow>, ModelError> {
        self.models.list_models().await
    }

    pub async fn query_by_prefix(
        &self,
        model: &str,
        prefix: &str,
    ) -> Result<Vec<ModelResourceRow>, ModelError> {
        self.models.rows_by_prefix(model, prefix).await
    }

    pub async fn query_by_type(
        &self,
        model: &str,
        type_name: &str,
    ) -> Result<Vec<ModelResourceRow>, ModelError> {
        self.models.rows_by_type(model, type_name).await
    }

    pub async fn model_row_count(&self, model: &str) -> Result<i64, ModelError> {
        self.models.row_count(model).await
    }
}
