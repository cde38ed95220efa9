//! End-to-end tests: crawl a fixture hierarchy into a snapshot, import it
//! into models, query, and purge.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use tempfile::TempDir;

use cloud_inventory::{
    CancelHandle, FixtureClient, IndexStatus, InventoryService, InventoryStorage,
};

async fn service_with(client: FixtureClient) -> (InventoryService, TempDir) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let db_path = dir.path().join("inventory.db");
    let url = format!("sqlite://{}", db_path.display());
    let storage = InventoryStorage::connect(&url)
        .await
        .expect("failed to open test database");
    let service =
        InventoryService::new(storage, Arc::new(client), 4).expect("failed to build service");
    (service, dir)
}

/// org(1) → project(p1) → image(img1), image(img2)
fn fixture_hierarchy() -> FixtureClient {
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
        .with_payload(
            "p1",
            "image",
            json!({ "id": "img1", "name": "img1", "status": "READY" }),
        )
        .with_payload(
            "p1",
            "image",
            json!({ "id": "img2", "name": "img2", "status": "READY" }),
        )
}

const ROOTS: &[&str] = &["organization/1"];

fn roots() -> Vec<String> {
    ROOTS.iter().map(|r| r.to_string()).collect()
}

#[tokio::test]
async fn crawl_and_import_fixture_hierarchy() {
    let (service, _dir) = service_with(fixture_hierarchy()).await;

    let report = service
        .crawl(&roots(), &CancelHandle::new())
        .await
        .expect("crawl failed");
    assert_eq!(report.status, IndexStatus::Success);
    assert_eq!(report.stats.stored, 3, "project + 2 images");
    assert_eq!(report.stats.errors, 0);

    let index = service.get_index(report.index_id).await.unwrap();
    assert_eq!(index.status(), Some(IndexStatus::Success));
    assert_eq!(index.resource_count, 3);

    service.create_model("m1", report.index_id).await.unwrap();

    let full_names: HashSet<String> = service
        .query_by_prefix("m1", "organization/1")
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.full_name)
        .collect();
    assert!(full_names.contains("organization/1/project/p1"));
    assert!(full_names.contains("organization/1/project/p1/image/img1"));
    assert!(full_names.contains("organization/1/project/p1/image/img2"));
    assert_eq!(full_names.len(), 3);

    // Subtree query below the project sees only the images.
    let subtree = service
        .query_by_prefix("m1", "organization/1/project/p1/image/img1")
        .await
        .unwrap();
    assert_eq!(subtree.len(), 1);

    let images = service.query_by_type("m1", "image").await.unwrap();
    assert_eq!(images.len(), 2);
    assert!(images
        .iter()
        .all(|r| r.parent_full_name.as_deref() == Some("organization/1/project/p1")));
}

#[tokio::test]
async fn enumeration_failure_yields_partial_success() {
    let client = fixture_hierarchy().with_failure("p1", "image");
    let (service, _dir) = service_with(client).await;

    let report = service
        .crawl(&roots(), &CancelHandle::new())
        .await
        .expect("crawl should survive a recoverable failure");
    assert_eq!(report.status, IndexStatus::PartialSuccess);
    assert_eq!(report.stats.stored, 1, "the project is still stored");
    assert_eq!(report.stats.errors, 1);

    let index = service.get_index(report.index_id).await.unwrap();
    assert_eq!(index.status(), Some(IndexStatus::PartialSuccess));
    assert_eq!(index.error_count, 1);

    let images = service
        .storage()
        .resources_for_type(report.index_id, "image")
        .await
        .unwrap();
    assert!(images.is_empty(), "no images for the failed enumeration");

    // Partial snapshots are importable.
    service.create_model("partial", report.index_id).await.unwrap();
    assert_eq!(service.model_row_count("partial").await.unwrap(), 1);
}

#[tokio::test]
async fn stored_resources_never_reference_unstored_parents() {
    let client = fixture_hierarchy()
        .with_payload(
            "p1",
            "bucket",
            json!({ "id": "b1", "name": "logs", "location": "EU" }),
        )
        .with_payload(
            "p1",
            "service_account",
            json!({ "uniqueId": "sa-1", "email": "svc@p1.example" }),
        );
    let (service, _dir) = service_with(client).await;

    let report = service.crawl(&roots(), &CancelHandle::new()).await.unwrap();
    assert_eq!(report.stats.stored, 5);

    let mut all = Vec::new();
    for type_name in service.storage().types_in_index(report.index_id).await.unwrap() {
        all.extend(
            service
                .storage()
                .resources_for_type(report.index_id, &type_name)
                .await
                .unwrap(),
        );
    }

    for row in &all {
        let Some((pt, pk)) = row.parent_type.as_deref().zip(row.parent_key.as_deref()) else {
            continue;
        };
        if pt == "organization" {
            continue; // crawl seed, never stored
        }
        let parent = all
            .iter()
            .find(|p| p.type_name == pt && p.key == pk)
            .unwrap_or_else(|| panic!("parent {pt}/{pk} of {} missing", row.key));
        assert!(
            parent.id < row.id,
            "parent {pt}/{pk} stored after child {}",
            row.key
        );
    }
}

#[tokio::test]
async fn purge_cascades_and_isolates() {
    let (service, _dir) = service_with(fixture_hierarchy()).await;

    let old = service.crawl(&roots(), &CancelHandle::new()).await.unwrap();
    service.create_model("old-model", old.index_id).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let boundary = Utc::now();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let recent = service.crawl(&roots(), &CancelHandle::new()).await.unwrap();
    service
        .create_model("recent-model", recent.index_id)
        .await
        .unwrap();

    let purged = service.purge(boundary).await.unwrap();
    assert_eq!(purged, 1, "only the old snapshot is past the cutoff");

    // The old snapshot, its resources, and its model are gone.
    assert!(service.get_index(old.index_id).await.is_err());
    assert_eq!(
        service
            .storage()
            .resource_count(old.index_id)
            .await
            .unwrap(),
        0
    );
    let names: Vec<String> = service
        .list_models()
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.name)
        .collect();
    assert_eq!(names, vec!["recent-model"]);

    // The recent snapshot is untouched.
    assert_eq!(
        service
            .storage()
            .resource_count(recent.index_id)
            .await
            .unwrap(),
        3
    );
    assert_eq!(service.model_row_count("recent-model").await.unwrap(), 3);
}

#[tokio::test]
async fn purge_everything_spares_running_indexes() {
    let (service, _dir) = service_with(fixture_hierarchy()).await;

    service.crawl(&roots(), &CancelHandle::new()).await.unwrap();
    service.crawl(&roots(), &CancelHandle::new()).await.unwrap();

    // A crawl still in flight: index begun but never completed.
    let running = service.storage().begin_index().await.unwrap();

    let purged = service
        .purge(Utc::now() + Duration::seconds(5))
        .await
        .unwrap();
    assert_eq!(purged, 2);

    let remaining = service.list_indexes().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, running);
    assert_eq!(remaining[0].status(), Some(IndexStatus::Running));
    assert_eq!(service.storage().total_resource_count().await.unwrap(), 0);
}

#[tokio::test]
async fn importing_twice_yields_identical_models() {
    let (service, _dir) = service_with(fixture_hierarchy()).await;
    let report = service.crawl(&roots(), &CancelHandle::new()).await.unwrap();

    service.create_model("m1", report.index_id).await.unwrap();
    service.create_model("m2", report.index_id).await.unwrap();

    assert_eq!(
        service.model_row_count("m1").await.unwrap(),
        service.model_row_count("m2").await.unwrap()
    );

    let names = |rows: Vec<cloud_inventory::ModelResourceRow>| -> HashSet<String> {
        rows.into_iter().map(|r| r.full_name).collect()
    };
    let m1 = names(service.query_by_prefix("m1", "organization/1").await.unwrap());
    let m2 = names(service.query_by_prefix("m2", "organization/1").await.unwrap());
    assert_eq!(m1, m2);
}

#[tokio::test]
async fn deleted_model_leaves_no_rows_behind() {
    let (service, _dir) = service_with(fixture_hierarchy()).await;
    let report = service.crawl(&roots(), &CancelHandle::new()).await.unwrap();

    let model_id = service.create_model("m1", report.index_id).await.unwrap();
    service.delete_model("m1").await.unwrap();

    let remaining: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM model_resource_row WHERE model_id = ?")
            .bind(&model_id)
            .fetch_one(service.storage().pool())
            .await
            .unwrap();
    assert_eq!(remaining, 0);

    // The snapshot itself is untouched by model deletion.
    assert!(service.get_index(report.index_id).await.is_ok());
}
