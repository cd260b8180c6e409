//! Integration tests for CatalogRepository.

use geoharvest_core::{AppError, MetadataStore, RecordWrite, SourceRegistry};
use geoharvest_db::{CatalogRepository, run_migrations};

use crate::integration::common::{iso_write, setup_test_db};

#[tokio::test]
async fn test_create_and_find_by_remote_id() {
    let (pool, _container) = setup_test_db().await;
    let repo = CatalogRepository::new(pool);

    let local_id = repo
        .create(&iso_write("r-1", "source-a", "<md>1</md>"))
        .await
        .expect("create should succeed");

    let found = repo
        .find_by_remote_id("r-1")
        .await
        .unwrap()
        .expect("record should exist");
    assert_eq!(found.local_id, local_id);
    assert_eq!(found.source_id, "source-a");
    assert_eq!(
        repo.get_payload(&local_id).await.unwrap().as_deref(),
        Some("<md>1</md>")
    );
    assert!(repo.find_by_remote_id("r-2").await.unwrap().is_none());
}

#[tokio::test]
async fn test_update_replaces_payload_and_owner() {
    let (pool, _container) = setup_test_db().await;
    let repo = CatalogRepository::new(pool);
    let local_id = repo
        .create(&iso_write("r-1", "source-a", "<md>old</md>"))
        .await
        .unwrap();

    repo.update(&local_id, &iso_write("r-1", "source-b", "<md>new</md>"))
        .await
        .expect("update should succeed");

    let found = repo.find_by_remote_id("r-1").await.unwrap().unwrap();
    assert_eq!(found.source_id, "source-b", "takeover moves ownership");
    assert_eq!(
        repo.get_payload(&local_id).await.unwrap().as_deref(),
        Some("<md>new</md>")
    );
    assert_eq!(repo.count_for_source("source-a").await.unwrap(), 0);
    assert_eq!(repo.count_for_source("source-b").await.unwrap(), 1);
}

#[tokio::test]
async fn test_update_missing_record_is_store_error() {
    let (pool, _container) = setup_test_db().await;
    let repo = CatalogRepository::new(pool);

    let err = repo
        .update(
            "00000000-0000-0000-0000-000000000000",
            &iso_write("r-1", "s", "<md/>"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::StoreError(_)));
}

#[tokio::test]
async fn test_remove_deletes_record() {
    let (pool, _container) = setup_test_db().await;
    let repo = CatalogRepository::new(pool);
    let local_id = repo.create(&iso_write("r-1", "s", "<md/>")).await.unwrap();

    repo.remove(&local_id).await.unwrap();

    assert!(repo.find_by_remote_id("r-1").await.unwrap().is_none());
    repo.remove(&local_id)
        .await
        .expect("removing twice is harmless");
}

#[tokio::test]
async fn test_unknown_schema_and_duplicate_remote_id() {
    let (pool, _container) = setup_test_db().await;
    let repo = CatalogRepository::with_schemas(pool, ["iso19139"]);

    let dc = RecordWrite {
        schema: "dublin-core",
        ..iso_write("r-dc", "s", "<csw:Record/>")
    };
    assert!(matches!(
        repo.create(&dc).await,
        Err(AppError::UnknownSchema(_))
    ));

    repo.create(&iso_write("r-1", "s", "<md/>")).await.unwrap();
    assert!(matches!(
        repo.create(&iso_write("r-1", "other", "<md/>")).await,
        Err(AppError::StoreError(_))
    ));
}

#[tokio::test]
async fn test_register_or_update_source() {
    let (pool, _container) = setup_test_db().await;
    let repo = CatalogRepository::new(pool.clone());

    repo.register_or_update_source("s-1", "Geo", Some("geo.png"))
        .await
        .unwrap();
    repo.register_or_update_source("s-1", "Geo portal", None)
        .await
        .unwrap();

    assert_eq!(
        repo.get_source("s-1").await.unwrap(),
        Some(("Geo portal".to_string(), None))
    );
    assert!(repo.get_source("s-2").await.unwrap().is_none());

    run_migrations(&pool)
        .await
        .expect("migrations are idempotent");
}
