//! Integration tests for HarvestService.
//!
//! These tests verify the harvest run using mock implementations, checking
//! reconciliation outcomes, duplicate policy, removal detection and failure
//! handling without network or database access.

use geoharvest_core::{
    HarvestService, HarvestSettings, HarvestStats, HarvesterDraft, LocalRecordIndex, QueryScope,
    RemoteRecord, RunStatus, SearchCriteria, SilentReporter,
};
use tokio_util::sync::CancellationToken;

use super::common::{
    EndpointScript, MockCatalog, MockCatalogFactory, MockMetadataStore, ROOT, record, records,
    register, seed_known, water_draft,
};

fn service(
    catalog: &MockCatalog,
    store: &MockMetadataStore,
) -> HarvestService<MockCatalogFactory, MockMetadataStore> {
    HarvestService::with_settings(
        catalog.factory(),
        store.clone(),
        HarvestSettings::default().with_page_size(3),
    )
}

// =============================================================================
// Reconciliation
// =============================================================================

#[tokio::test]
async fn test_water_scenario_counts() {
    // Arrange: 10 matching records; 3 known and unchanged, 2 known with new
    // content, 5 never seen.
    let remote = records("water", 10);
    let catalog = MockCatalog::new().with_endpoint(ROOT, EndpointScript::serving(remote.clone()));
    let store = MockMetadataStore::new();
    let config = register(water_draft("water")).await;

    let mut index = LocalRecordIndex::new();
    for known in &remote[0..3] {
        seed_known(&store, &mut index, &config.source_id, known);
    }
    for changed in &remote[3..5] {
        let old = record(&changed.remote_id, "<md>outdated</md>");
        seed_known(&store, &mut index, &config.source_id, &old);
    }

    // Act
    let result = service(&catalog, &store)
        .run_node(config, &mut index, &CancellationToken::new(), &SilentReporter)
        .await;

    // Assert
    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.stats.added, 5, "unseen records should be added");
    assert_eq!(result.stats.updated, 2, "changed records should be updated");
    assert_eq!(result.stats.unchanged, 3);
    assert_eq!(result.stats.removed, 0);
    assert_eq!(result.stats.errors, 0);
    assert_eq!(result.endpoints_visited, 1);
    assert_eq!(index.len(), 10);
    assert_eq!(store.len(), 10);
    assert_eq!(store.get("water-3").unwrap().payload, remote[3].payload);

    let requests = catalog.requests();
    assert!(
        requests
            .iter()
            .all(|r| r.criteria.free_text.as_deref() == Some("water")),
        "every page should carry the configured search"
    );
    assert_eq!(
        requests.iter().map(|r| r.start_position).collect::<Vec<_>>(),
        vec![1, 4, 7, 10]
    );
}

#[tokio::test]
async fn test_second_run_changes_nothing() {
    let catalog = MockCatalog::new().with_endpoint(ROOT, EndpointScript::serving(records("r", 7)));
    let store = MockMetadataStore::new();
    let config = register(water_draft("idem")).await;
    let service = service(&catalog, &store);
    let mut index = LocalRecordIndex::new();

    let first = service
        .run_node(config.clone(), &mut index, &CancellationToken::new(), &SilentReporter)
        .await;
    let writes_after_first = store.write_count();
    let second = service
        .run_node(config, &mut index, &CancellationToken::new(), &SilentReporter)
        .await;

    assert_eq!(first.stats.added, 7);
    assert_eq!(second.stats.added, 0);
    assert_eq!(second.stats.updated, 0);
    assert_eq!(second.stats.removed, 0);
    assert_eq!(second.stats.unchanged, 7);
    assert_eq!(store.write_count(), writes_after_first, "no store writes on a rerun");
}

#[tokio::test]
async fn test_every_delivered_record_is_counted_once() {
    let mut remote = records("ok", 4);
    remote.push(RemoteRecord::new("no-schema", None, None, "<unknown/>"));
    remote.push(record("", "<md>no identifier</md>"));
    remote.push(record("foreign", "<md>foreign</md>"));
    let delivered = remote.len();

    let catalog = MockCatalog::new().with_endpoint(ROOT, EndpointScript::serving(remote));
    let store = MockMetadataStore::new();
    store.seed("foreign", "another-source", "<md>foreign</md>");
    let config = register(water_draft("count")).await;
    let mut index = LocalRecordIndex::new();

    let result = service(&catalog, &store)
        .run_node(config, &mut index, &CancellationToken::new(), &SilentReporter)
        .await;

    let stats = &result.stats;
    assert_eq!(stats.added, 4);
    assert_eq!(stats.unknown_schema, 1);
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.duplicates_skipped, 1);
    assert_eq!(stats.processed(), delivered);
    assert!(result.is_completed(), "record failures never fail the run");
}

#[tokio::test]
async fn test_empty_search_list_runs_one_unrestricted_search() {
    let catalog = MockCatalog::new().with_endpoint(ROOT, EndpointScript::serving(records("all", 2)));
    let store = MockMetadataStore::new();
    let config = register(HarvesterDraft::new("all", "Everything", ROOT)).await;
    let mut index = LocalRecordIndex::new();

    let result = service(&catalog, &store)
        .run_node(config, &mut index, &CancellationToken::new(), &SilentReporter)
        .await;

    assert_eq!(result.stats.added, 2);
    let requests = catalog.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].criteria.is_unrestricted());
}

#[tokio::test]
async fn test_record_matched_by_two_searches_is_processed_once() {
    let catalog = MockCatalog::new().with_endpoint(ROOT, EndpointScript::serving(records("m", 3)));
    let store = MockMetadataStore::new();
    let config = register(
        water_draft("multi").with_search(SearchCriteria {
            title: Some("river".to_string()),
            ..Default::default()
        }),
    )
    .await;
    let mut index = LocalRecordIndex::new();

    let result = service(&catalog, &store)
        .run_node(config, &mut index, &CancellationToken::new(), &SilentReporter)
        .await;

    assert_eq!(result.stats.added, 3);
    assert_eq!(result.stats.unchanged, 3, "second sighting counts as unchanged");
    assert_eq!(store.write_count(), 3);
}

// =============================================================================
// Duplicate policy
// =============================================================================

#[tokio::test]
async fn test_duplicate_rejected_when_policy_set() {
    let catalog = MockCatalog::new()
        .with_endpoint(ROOT, EndpointScript::serving(vec![record("shared", "<md>b</md>")]));
    let store = MockMetadataStore::new();
    store.seed("shared", "source-a", "<md>a</md>");
    let config = register(water_draft("b").with_reject_duplicates(true)).await;
    let mut index = LocalRecordIndex::new();

    let result = service(&catalog, &store)
        .run_node(config, &mut index, &CancellationToken::new(), &SilentReporter)
        .await;

    assert_eq!(result.stats.duplicates_skipped, 1);
    assert_eq!(store.write_count(), 0, "no store mutation for a rejected duplicate");
    let stored = store.get("shared").unwrap();
    assert_eq!(stored.source_id, "source-a");
    assert_eq!(stored.payload, "<md>a</md>");
    assert!(index.is_empty());
}

#[tokio::test]
async fn test_duplicate_taken_over_when_policy_unset() {
    let catalog = MockCatalog::new()
        .with_endpoint(ROOT, EndpointScript::serving(vec![record("shared", "<md>b</md>")]));
    let store = MockMetadataStore::new();
    let local_id = store.seed("shared", "source-a", "<md>a</md>");
    let config = register(water_draft("b").with_reject_duplicates(false)).await;
    let mut index = LocalRecordIndex::new();

    let result = service(&catalog, &store)
        .run_node(config.clone(), &mut index, &CancellationToken::new(), &SilentReporter)
        .await;

    assert_eq!(result.stats.updated, 1);
    let stored = store.get("shared").unwrap();
    assert_eq!(stored.source_id, config.source_id, "ownership moves to the new source");
    assert_eq!(stored.local_id, local_id);
    assert_eq!(index.get("shared").unwrap().local_id, local_id);
}

#[tokio::test]
async fn test_reject_policy_keeps_record_taken_over_by_other_node() {
    const OTHER: &str = "https://other.example.com/csw";
    let catalog = MockCatalog::new()
        .with_endpoint(ROOT, EndpointScript::serving(vec![record("shared", "<md>a1</md>")]))
        .with_endpoint(OTHER, EndpointScript::serving(vec![record("shared", "<md>b</md>")]));
    let store = MockMetadataStore::new();
    let strict = register(water_draft("a").with_reject_duplicates(true)).await;
    let lenient = register(
        HarvesterDraft::new("b", "Node b", OTHER)
            .with_search(SearchCriteria::free_text("water"))
            .with_reject_duplicates(false),
    )
    .await;
    let mut strict_index = LocalRecordIndex::new();
    let mut lenient_index = LocalRecordIndex::new();
    let cancel = CancellationToken::new();

    let first = service(&catalog, &store)
        .run_node(strict.clone(), &mut strict_index, &cancel, &SilentReporter)
        .await;
    assert_eq!(first.stats.added, 1);

    let takeover = service(&catalog, &store)
        .run_node(lenient.clone(), &mut lenient_index, &cancel, &SilentReporter)
        .await;
    assert_eq!(takeover.stats.updated, 1);

    // The record changes upstream; the strict node still has it indexed.
    catalog.set_endpoint(ROOT, EndpointScript::serving(vec![record("shared", "<md>a2</md>")]));
    let second = service(&catalog, &store)
        .run_node(strict, &mut strict_index, &cancel, &SilentReporter)
        .await;

    assert_eq!(second.stats.duplicates_skipped, 1);
    assert_eq!(second.stats.updated, 0);
    let stored = store.get("shared").unwrap();
    assert_eq!(stored.source_id, lenient.source_id, "ownership is not moved back");
    assert_eq!(stored.payload, "<md>b</md>");
    assert!(strict_index.get("shared").is_none());
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_capabilities_failure_fails_run_with_zero_counters() {
    let catalog = MockCatalog::new().with_endpoint(
        ROOT,
        EndpointScript {
            records: records("r", 3),
            capabilities_fail: true,
            ..Default::default()
        },
    );
    let store = MockMetadataStore::new();
    let config = register(water_draft("down")).await;
    let mut index = LocalRecordIndex::new();

    let result = service(&catalog, &store)
        .run_node(config, &mut index, &CancellationToken::new(), &SilentReporter)
        .await;

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.stats, HarvestStats::default());
    assert!(result.error.is_some());
    assert!(catalog.requests().is_empty(), "no search after failed discovery");
}

#[tokio::test]
async fn test_first_page_failure_fails_run() {
    let catalog = MockCatalog::new().with_endpoint(
        ROOT,
        EndpointScript {
            records: records("r", 3),
            fail_at: Some(1),
            ..Default::default()
        },
    );
    let store = MockMetadataStore::new();
    let config = register(water_draft("flaky")).await;
    let mut index = LocalRecordIndex::new();

    let result = service(&catalog, &store)
        .run_node(config, &mut index, &CancellationToken::new(), &SilentReporter)
        .await;

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.stats.processed(), 0);
}

#[tokio::test]
async fn test_later_page_failure_truncates_search() {
    let catalog = MockCatalog::new().with_endpoint(
        ROOT,
        EndpointScript {
            records: records("r", 9),
            fail_at: Some(4),
            ..Default::default()
        },
    );
    let store = MockMetadataStore::new();
    let config = register(water_draft("truncated")).await;
    let mut index = LocalRecordIndex::new();

    let result = service(&catalog, &store)
        .run_node(config, &mut index, &CancellationToken::new(), &SilentReporter)
        .await;

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.stats.added, 3, "records before the failed page are kept");
    assert_eq!(result.searches_truncated, 1);
    assert!(result.error.as_deref().unwrap().contains("dropped the connection"));
}

// =============================================================================
// Removal
// =============================================================================

#[tokio::test]
async fn test_record_missing_from_full_pass_is_removed() {
    let catalog = MockCatalog::new().with_endpoint(ROOT, EndpointScript::serving(records("r", 2)));
    let store = MockMetadataStore::new();
    let config = register(water_draft("removal")).await;
    let mut index = LocalRecordIndex::new();
    seed_known(&store, &mut index, &config.source_id, &record("gone", "<md>gone</md>"));

    let result = service(&catalog, &store)
        .run_node(config, &mut index, &CancellationToken::new(), &SilentReporter)
        .await;

    assert!(result.is_completed());
    assert_eq!(result.stats.removed, 1);
    assert!(store.get("gone").is_none());
    assert!(index.get("gone").is_none());
    assert_eq!(index.len(), 2);
}

#[tokio::test]
async fn test_removal_skips_records_taken_over_by_other_source() {
    let catalog = MockCatalog::new().with_endpoint(ROOT, EndpointScript::serving(records("r", 1)));
    let store = MockMetadataStore::new();
    let config = register(water_draft("guard")).await;
    let mut index = LocalRecordIndex::new();
    let moved = record("moved", "<md>moved</md>");
    seed_known(&store, &mut index, &config.source_id, &moved);
    // Another source has since taken the record over.
    store.seed("moved", "other-source", "<md>moved</md>");

    let result = service(&catalog, &store)
        .run_node(config, &mut index, &CancellationToken::new(), &SilentReporter)
        .await;

    assert_eq!(result.stats.removed, 0);
    assert!(store.get("moved").is_some(), "foreign record must survive");
    assert!(index.get("moved").is_none(), "entry dropped from the index");
}

#[tokio::test]
async fn test_no_removal_after_truncated_search() {
    let catalog = MockCatalog::new().with_endpoint(
        ROOT,
        EndpointScript {
            records: records("r", 6),
            fail_at: Some(4),
            ..Default::default()
        },
    );
    let store = MockMetadataStore::new();
    let config = register(water_draft("partial")).await;
    let mut index = LocalRecordIndex::new();
    seed_known(&store, &mut index, &config.source_id, &record("stale", "<md/>"));

    let result = service(&catalog, &store)
        .run_node(config, &mut index, &CancellationToken::new(), &SilentReporter)
        .await;

    assert_eq!(result.searches_truncated, 1);
    assert_eq!(result.stats.removed, 0);
    assert!(store.get("stale").is_some());
    assert!(index.get("stale").is_some());
}

#[tokio::test]
async fn test_no_removal_for_hierarchy_scope() {
    let catalog = MockCatalog::new().with_endpoint(ROOT, EndpointScript::serving(records("r", 2)));
    let store = MockMetadataStore::new();
    let config = register(water_draft("fed").with_query_scope(QueryScope::Hierarchy, 0)).await;
    let mut index = LocalRecordIndex::new();
    seed_known(&store, &mut index, &config.source_id, &record("stale", "<md/>"));

    let result = service(&catalog, &store)
        .run_node(config, &mut index, &CancellationToken::new(), &SilentReporter)
        .await;

    assert!(result.is_completed());
    assert_eq!(result.stats.removed, 0);
    assert!(store.get("stale").is_some());
}

#[tokio::test]
async fn test_no_removal_when_disabled() {
    let catalog = MockCatalog::new().with_endpoint(ROOT, EndpointScript::serving(records("r", 1)));
    let store = MockMetadataStore::new();
    let config = register(water_draft("keep")).await;
    let mut index = LocalRecordIndex::new();
    seed_known(&store, &mut index, &config.source_id, &record("stale", "<md/>"));

    let service = HarvestService::with_settings(
        catalog.factory(),
        store.clone(),
        HarvestSettings::default().without_removal(),
    );
    let result = service
        .run_node(config, &mut index, &CancellationToken::new(), &SilentReporter)
        .await;

    assert_eq!(result.stats.removed, 0);
    assert!(store.get("stale").is_some());
}
