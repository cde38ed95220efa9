//! Hierarchy crawler.
//!
//! Walks the registry-declared hierarchy breadth-first from one or more
//! root seeds, enumerating each (parent, child type) work item through the
//! API client and handing every constructed resource to a sink. Work items
//! of a level run on a bounded number of concurrent workers; a child
//! enumeration is only enqueued once its parent resource was durably
//! stored, so stored rows never reference a parent that is not yet
//! committed.
//!
//! Error policy: enumeration failures, malformed payloads and isolated
//! storage write failures are recoverable. They are logged with the
//! (parent, type) context and counted, and the walk continues with sibling
//! items. Only unusable roots abort the crawl.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::error::{CrawlError, StorageError};
use crate::registry::{Registry, ResourceTypeDescriptor};
use crate::resource::Resource;

/// Receives every discovered resource, in storage order.
#[async_trait]
pub trait ResourceSink: Send + Sync {
    async fn store(&self, resource: &Resource) -> Result<(), StorageError>;
}

/// Cooperative cancellation handle for an in-flight crawl.
///
/// Cancelling stops new work from being enqueued and lets in-flight
/// enumerations wind down; the crawl returns with whatever was stored.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Counters for one crawl run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlStats {
    /// Resources durably stored.
    pub stored: u64,
    /// Recoverable errors (enumeration, construction, isolated writes).
    pub errors: u64,
    /// Whether the crawl was cut short by cancellation.
    pub cancelled: bool,
}

/// One (parent, child type) enumeration unit.
struct WorkItem<'r> {
    parent: Arc<Resource>,
    descriptor: &'r ResourceTypeDescriptor,
}

#[derive(Default)]
struct ItemOutcome<'r> {
    next: Vec<WorkItem<'r>>,
    stored: u64,
    errors: u64,
}

pub struct Crawler<'r> {
    registry: &'r Registry,
    api: Arc<dyn ApiClient>,
    max_workers: usize,
}

impl<'r> Crawler<'r> {
    pub fn new(registry: &'r Registry, api: Arc<dyn ApiClient>, max_workers: usize) -> Self {
        Self {
            registry,
            api,
            max_workers: max_workers.max(1),
        }
    }

    /// Walk the hierarchy from the given `type/key` root specs.
    ///
    /// Returns the run's counters; recoverable errors never abort the
    /// walk. Fails only when a root spec is unusable before any work
    /// starts.
    pub async fn run(
        &self,
        roots: &[String],
        sink: &dyn ResourceSink,
        cancel: &CancelHandle,
    ) -> Result<CrawlStats, CrawlError> {
        let mut level = self.seed_roots(roots)?;
        let mut stats = CrawlStats::default();
        let mut depth = 0usize;

        while !level.is_empty() {
            if cancel.is_cancelled() {
                stats.cancelled = true;
                break;
            }
            debug!(depth, items = level.len(), "crawling hierarchy level");

            let outcomes: Vec<ItemOutcome<'r>> = futures::stream::iter(
                level
                    .drain(..)
                    .map(|item| self.process_item(item, sink, cancel)),
            )
            .buffer_unordered(self.max_workers)
            .collect()
            .await;

            for outcome in outcomes {
                stats.stored += outcome.stored;
                stats.errors += outcome.errors;
                level.extend(outcome.next);
            }
            depth += 1;
        }

        if cancel.is_cancelled() {
            stats.cancelled = true;
        }
        info!(
            stored = stats.stored,
            errors = stats.errors,
            cancelled = stats.cancelled,
            "crawl finished"
        );
        Ok(stats)
    }

    /// Seed work items from the roots' declared child types. Roots anchor
    /// the walk but are not stored themselves.
    fn seed_roots(&self, roots: &[String]) -> Result<Vec<WorkItem<'r>>, CrawlError> {
        let mut seeds = Vec::new();
        for spec in roots {
            let (type_name, key) = spec
                .split_once('/')
                .filter(|(t, k)| !t.is_empty() && !k.is_empty())
                .ok_or_else(|| CrawlError::InvalidRoot(spec.clone()))?;
            // Unknown root types are fatal: nothing below them could be
            // attributed to a descriptor.
            self.registry.describe(type_name)?;
            let root = Arc::new(Resource::seed(type_name, key));
            for descriptor in self.registry.children_of(type_name)? {
                seeds.push(WorkItem {
                    parent: root.clone(),
                    descriptor,
                });
            }
        }
        Ok(seeds)
    }

    /// Enumerate one (parent, type) pair, store each constructed resource,
    /// and collect child work items for every stored resource.
    async fn process_item(
        &self,
        item: WorkItem<'r>,
        sink: &dyn ResourceSink,
        cancel: &CancelHandle,
    ) -> ItemOutcome<'r> {
        let WorkItem { parent, descriptor } = item;
        let mut outcome = ItemOutcome::default();

        if let Some(service) = descriptor.requires_service {
            if !parent.service_enabled(service) {
                // Conditionally enumerable and the condition is false:
                // skipped silently, not an error.
                debug!(
                    parent = %parent.reference(),
                    type_name = descriptor.name,
                    service,
                    "service not enabled on parent, skipping"
                );
                return outcome;
            }
        }

        let mut stream = match self.api.enumerate(descriptor.name, &parent).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(
                    parent = %parent.reference(),
                    type_name = descriptor.name,
                    error = %err,
                    "enumeration failed"
                );
                outcome.errors += 1;
                return outcome;
            }
        };

        while let Some(payload) = stream.next().await {
            if cancel.is_cancelled() {
                break;
            }
            let payload = match payload {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(
                        parent = %parent.reference(),
                        type_name = descriptor.name,
                        error = %err,
                        "enumeration failed mid-stream"
                    );
                    outcome.errors += 1;
                    // The rest of this pair's stream is not trustworthy.
                    break;
                }
            };

            let resource = match (descriptor.construct)(descriptor, &parent, payload) {
                Ok(resource) => resource,
                Err(err) => {
                    warn!(
                        parent = %parent.reference(),
                        type_name = descriptor.name,
                        error = %err,
                        "skipping malformed payload"
                    );
                    outcome.errors += 1;
                    continue;
                }
            };

            if let Err(err) = sink.store(&resource).await {
                warn!(
                    resource = %resource.reference(),
                    error = %err,
                    "failed to store resource"
                );
                outcome.errors += 1;
                continue;
            }
            outcome.stored += 1;

            if !descriptor.children.is_empty() {
                let stored = Arc::new(resource);
                if let Ok(children) = self.registry.children_of(descriptor.name) {
                    for child in children {
                        outcome.next.push(WorkItem {
                            parent: stored.clone(),
                            descriptor: child,
                        });
                    }
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::FixtureClient;
    use serde_json::json;
    use std::sync::Mutex;

    /// Sink that records stored resources in order.
    #[derive(Default)]
    struct MemorySink {
        stored: Mutex<Vec<Resource>>,
    }

    #[async_trait]
    impl ResourceSink for MemorySink {
        async fn store(&self, resource: &Resource) -> Result<(), StorageError> {
            self.stored
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(resource.clone());
            Ok(())
        }
    }

    impl MemorySink {
        fn snapshot(&self) -> Vec<Resource> {
            self.stored
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
        }
    }

    fn fixture_org() -> FixtureClient {
        FixtureClient::new()
            .with_payload(
                "1",
                "project",
                json!({
                    "projectId": "p1",
                    "name": "Project One",
                    "lifecycleState": "ACTIVE",
                    "enabledServices": ["compute"],
                }),
            )
            .with_payload("p1", "image", json!({ "id": "img1", "name": "img1" }))
            .with_payload("p1", "image", json!({ "id": "img2", "name": "img2" }))
    }

    #[tokio::test]
    async fn walks_hierarchy_breadth_first() {
        let registry = Registry::builtin().unwrap();
        let crawler = Crawler::new(&registry, Arc::new(fixture_org()), 4);
        let sink = MemorySink::default();

        let stats = crawler
            .run(
                &["organization/1".to_string()],
                &sink,
                &CancelHandle::new(),
            )
            .await
            .unwrap();

        assert_eq!(stats.stored, 3);
        assert_eq!(stats.errors, 0);
        assert!(!stats.cancelled);

        let stored = sink.snapshot();
        assert_eq!(stored[0].type_name, "project");
        let images: Vec<&str> = stored[1..].iter().map(|r| r.key.as_str()).collect();
        assert_eq!(images.len(), 2);
        assert!(images.contains(&"img1") && images.contains(&"img2"));
    }

    #[tokio::test]
    async fn parent_is_stored_before_children() {
        let registry = Registry::builtin().unwrap();
        let crawler = Crawler::new(&registry, Arc::new(fixture_org()), 4);
        let sink = MemorySink::default();

        crawler
            .run(
                &["organization/1".to_string()],
                &sink,
                &CancelHandle::new(),
            )
            .await
            .unwrap();

        let stored = sink.snapshot();
        for (i, res) in stored.iter().enumerate() {
            let Some((pt, pk)) = res.parent_type.as_deref().zip(res.parent_key.as_deref()) else {
                continue;
            };
            let parent_stored_earlier = stored[..i]
                .iter()
                .any(|p| p.type_name == pt && p.key == pk);
            let parent_is_seed = pt == "organization";
            assert!(
                parent_stored_earlier || parent_is_seed,
                "resource {} references parent {}/{} not stored before it",
                res.reference(),
                pt,
                pk
            );
        }
    }

    #[tokio::test]
    async fn disabled_service_skips_silently() {
        let registry = Registry::builtin().unwrap();
        let client = FixtureClient::new()
            .with_payload(
                "1",
                "project",
                json!({ "projectId": "p1", "name": "Project One" }),
            )
            .with_payload("p1", "image", json!({ "id": "img1", "name": "img1" }));
        let crawler = Crawler::new(&registry, Arc::new(client), 4);
        let sink = MemorySink::default();

        let stats = crawler
            .run(
                &["organization/1".to_string()],
                &sink,
                &CancelHandle::new(),
            )
            .await
            .unwrap();

        // Project stored; images skipped without counting an error.
        assert_eq!(stats.stored, 1);
        assert_eq!(stats.errors, 0);
    }

    #[tokio::test]
    async fn enumeration_failure_is_recoverable() {
        let registry = Registry::builtin().unwrap();
        let client = fixture_org().with_failure("p1", "image");
        let crawler = Crawler::new(&registry, Arc::new(client), 4);
        let sink = MemorySink::default();

        let stats = crawler
            .run(
                &["organization/1".to_string()],
                &sink,
                &CancelHandle::new(),
            )
            .await
            .unwrap();

        assert_eq!(stats.stored, 1, "project still stored");
        assert_eq!(stats.errors, 1, "one error for the failed pair");
    }

    #[tokio::test]
    async fn malformed_payload_skips_only_that_item() {
        let registry = Registry::builtin().unwrap();
        let client = fixture_org().with_payload("p1", "bucket", json!("not an object"));
        let crawler = Crawler::new(&registry, Arc::new(client), 4);
        let sink = MemorySink::default();

        let stats = crawler
            .run(
                &["organization/1".to_string()],
                &sink,
                &CancelHandle::new(),
            )
            .await
            .unwrap();

        assert_eq!(stats.stored, 3);
        assert_eq!(stats.errors, 1);
    }

    #[tokio::test]
    async fn invalid_root_spec_is_fatal() {
        let registry = Registry::builtin().unwrap();
        let crawler = Crawler::new(&registry, Arc::new(FixtureClient::new()), 4);
        let sink = MemorySink::default();

        let err = crawler
            .run(&["organization".to_string()], &sink, &CancelHandle::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::InvalidRoot(_)));

        let err = crawler
            .run(&["dataset/1".to_string()], &sink, &CancelHandle::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::Registry(_)));
    }

    #[tokio::test]
    async fn cancellation_stops_new_levels() {
        let registry = Registry::builtin().unwrap();
        let crawler = Crawler::new(&registry, Arc::new(fixture_org()), 4);
        let sink = MemorySink::default();
        let cancel = CancelHandle::new();
        cancel.cancel();

        let stats = crawler
            .run(&["organization/1".to_string()], &sink, &cancel)
            .await
            .unwrap();
        assert!(stats.cancelled);
        assert_eq!(stats.stored, 0);
    }
}
