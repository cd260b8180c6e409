//! Cancellation tests for the harvest run.

use geoharvest_core::{
    HarvestService, HarvestSettings, HarvestStats, LocalRecordIndex, RunStatus, SilentReporter,
};
use tokio_util::sync::CancellationToken;

use super::common::{
    EndpointScript, MockCatalog, MockMetadataStore, ROOT, record, records, register, seed_known,
    water_draft,
};

#[tokio::test]
async fn test_cancel_after_four_of_ten_records() {
    // Arrange: the store cancels the run right after its 4th create.
    let cancel = CancellationToken::new();
    let catalog = MockCatalog::new().with_endpoint(ROOT, EndpointScript::serving(records("r", 10)));
    let store = MockMetadataStore::cancelling_after(4, cancel.clone());
    let config = register(water_draft("cancel")).await;
    let mut index = LocalRecordIndex::new();
    seed_known(&store, &mut index, &config.source_id, &record("stale", "<md/>"));

    let service = HarvestService::with_settings(
        catalog.factory(),
        store.clone(),
        HarvestSettings::default().with_page_size(3),
    );

    // Act
    let result = service
        .run_node(config, &mut index, &cancel, &SilentReporter)
        .await;

    // Assert
    assert_eq!(result.status, RunStatus::Cancelled);
    assert_eq!(result.stats.added, 4, "counters reflect exactly the processed records");
    assert_eq!(result.stats.processed(), 4);
    assert_eq!(result.stats.removed, 0, "a cancelled run never removes");
    for i in 4..10 {
        assert!(
            store.get(&format!("r-{}", i)).is_none(),
            "record r-{} must be untouched",
            i
        );
    }
    assert!(store.get("stale").is_some());
    assert_eq!(index.len(), 5, "4 new entries plus the untouched stale one");
    assert!(
        catalog.requests().iter().all(|r| r.start_position <= 4),
        "no page requested after cancellation"
    );
}

#[tokio::test]
async fn test_cancel_before_start() {
    let catalog = MockCatalog::new().with_endpoint(ROOT, EndpointScript::serving(records("r", 3)));
    let store = MockMetadataStore::new();
    let config = register(water_draft("early")).await;
    let mut index = LocalRecordIndex::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = HarvestService::new(catalog.factory(), store.clone())
        .run_node(config, &mut index, &cancel, &SilentReporter)
        .await;

    assert!(result.is_cancelled());
    assert_eq!(result.stats, HarvestStats::default());
    assert_eq!(result.endpoints_visited, 0);
    assert!(catalog.requests().is_empty());
    assert_eq!(store.write_count(), 0);
}
