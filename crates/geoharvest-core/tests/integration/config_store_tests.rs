//! Integration tests for ConfigStore copy-on-write updates.

use geoharvest_core::{
    AppError, ConfigStore, HarvestService, HarvesterDraft, LocalRecordIndex, QueryScope,
    SearchCriteria, SilentReporter,
};
use tokio_util::sync::CancellationToken;

use super::common::{
    EndpointScript, MockCatalog, MockMetadataStore, MockSourceRegistry, ROOT, records,
};

const MOVED: &str = "https://moved.example.com/csw";

#[tokio::test]
async fn test_registry_refreshed_on_every_commit() {
    let registry = MockSourceRegistry::default();
    let store = ConfigStore::new(registry.clone());
    let created = store
        .create(HarvesterDraft::new("geo", "Geo", ROOT).with_icon("geo.png"))
        .await
        .unwrap();

    let mut draft = store.copy_for_update("geo").unwrap();
    draft.name = "Geo portal".to_string();
    draft.icon = None;
    store.commit(draft).await.unwrap();

    assert_eq!(
        registry.calls(),
        vec![
            (
                created.source_id.clone(),
                "Geo".to_string(),
                Some("geo.png".to_string())
            ),
            (created.source_id.clone(), "Geo portal".to_string(), None),
        ]
    );
}

#[tokio::test]
async fn test_running_harvest_keeps_its_snapshot() {
    let catalog = MockCatalog::new()
        .with_endpoint(ROOT, EndpointScript::serving(records("old", 2)))
        .with_endpoint(MOVED, EndpointScript::serving(records("new", 2)));
    let nodes = ConfigStore::new(MockSourceRegistry::default());
    nodes
        .create(HarvesterDraft::new("geo", "Geo", ROOT))
        .await
        .unwrap();

    // A run picks up the current snapshot, then the node is edited.
    let snapshot = nodes.get("geo").unwrap();
    let mut draft = nodes.copy_for_update("geo").unwrap();
    draft.endpoint = MOVED.to_string();
    nodes.commit(draft).await.unwrap();

    let mut index = LocalRecordIndex::new();
    let result = HarvestService::new(catalog.factory(), MockMetadataStore::new())
        .run_node(snapshot, &mut index, &CancellationToken::new(), &SilentReporter)
        .await;

    assert_eq!(result.stats.added, 2);
    assert_eq!(catalog.requested_endpoints(), vec![ROOT]);
    assert_eq!(nodes.get("geo").unwrap().endpoint.as_str(), MOVED);
    assert_eq!(nodes.get("geo").unwrap().version, 2);
}

#[tokio::test]
async fn test_rejected_edits_leave_node_untouched() {
    let nodes = ConfigStore::new(MockSourceRegistry::default());
    nodes
        .create(HarvesterDraft::new("geo", "Geo", ROOT))
        .await
        .unwrap();

    let mut bad_scale = nodes.copy_for_update("geo").unwrap();
    bad_scale.searches.push(SearchCriteria {
        min_scale: Some(50_000),
        max_scale: Some(1_000),
        ..Default::default()
    });
    let mut bad_hops = nodes.copy_for_update("geo").unwrap();
    bad_hops.query_scope = QueryScope::Hierarchy;
    bad_hops.hop_count = -1;
    let mut bad_source = nodes.copy_for_update("geo").unwrap();
    bad_source.source_id = Some("someone-else".to_string());

    for draft in [bad_scale, bad_hops, bad_source] {
        let err = nodes.commit(draft).await.unwrap_err();
        assert!(matches!(err, AppError::ConfigValidation(_)), "got {:?}", err);
    }

    let live = nodes.get("geo").unwrap();
    assert_eq!(live.version, 1);
    assert!(live.searches.is_empty());
    assert_eq!(live.query_scope, QueryScope::Local);
}
