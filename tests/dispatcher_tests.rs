//! Integration tests for event dispatching and the cleanup flows

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_test::{assert_err, assert_ok};

use common::{cluster_object, config_map, config_map_kind, fast_settings, FakeApi};
use object_cloner_operator::controllers::{ClusterEvent, Dispatcher};
use object_cloner_operator::crd::ClusterObject;
use object_cloner_operator::metrics::SYNCED_NAMESPACES;
use object_cloner_operator::reconcilers::{NamespaceRoster, ObjectIndex, ObjectKey, ResourceId};
use object_cloner_operator::Error;

// ============================================================================
// Test Helpers
// ============================================================================

struct Harness {
    api: Arc<FakeApi>,
    dispatcher: Dispatcher,
}

impl Harness {
    fn new(roster: &[&str]) -> Self {
        let api = Arc::new(FakeApi::new());
        let namespaces = Arc::new(NamespaceRoster::new());
        namespaces.replace(roster.iter().map(|s| s.to_string()));
        let dispatcher = Dispatcher::new(
            api.clone(),
            Arc::new(ObjectIndex::new()),
            namespaces,
            fast_settings(),
        );
        Self { api, dispatcher }
    }

    /// Store a ClusterObject and its source, then apply it
    async fn apply(&self, cleanup_events: &[&str]) -> ClusterObject {
        let resource = cluster_object(
            "ns-src",
            "cm1",
            json!({
                "sourceObject": {"version": "v1", "kind": "ConfigMap"},
                "cleanupEvents": cleanup_events
            }),
        );
        self.api.insert_cluster_object(&resource);
        self.api
            .insert(&config_map_kind(), "ns-src", config_map("cm1", json!({"k": "1"})));
        assert_ok!(
            self.dispatcher
                .dispatch(ClusterEvent::ClusterObjectApplied(resource.clone()))
                .await
        );
        resource
    }

    fn clone_exists(&self, namespace: &str) -> bool {
        self.api
            .object(&config_map_kind(), namespace, "cm1")
            .is_some()
    }
}

fn source_key() -> ObjectKey {
    ObjectKey::new(&config_map_kind(), "ns-src", "cm1")
}

// ============================================================================
// ClusterObject Lifecycle
// ============================================================================

#[tokio::test]
async fn applied_cluster_object_is_indexed_and_synced() {
    let harness = Harness::new(&["ns-src", "a", "b"]);
    harness.apply(&[]).await;

    assert_eq!(harness.dispatcher.index().lookup(&source_key()).len(), 1);
    assert!(harness.clone_exists("a"));
    assert!(harness.clone_exists("b"));
    assert_eq!(harness.api.synced("ns-src", "cm1"), vec!["a", "b"]);
}

#[tokio::test]
async fn invalid_cluster_object_is_rejected_and_not_indexed() {
    let harness = Harness::new(&["ns-src", "a"]);
    harness.apply(&[]).await;

    let invalid = cluster_object(
        "ns-src",
        "cm1",
        json!({
            "sourceObject": {"version": "v1", "kind": "ConfigMap"},
            "namespacesToInclude": ["(unclosed"]
        }),
    );
    let err = assert_err!(
        harness
            .dispatcher
            .dispatch(ClusterEvent::ClusterObjectApplied(invalid))
            .await
    );

    assert!(matches!(err, Error::ValidationError(_)));
    assert!(harness.dispatcher.index().is_empty());
}

#[tokio::test]
async fn apply_waits_for_namespace_roster() {
    let api = Arc::new(FakeApi::new());
    let roster = Arc::new(NamespaceRoster::new());
    let dispatcher = Arc::new(Dispatcher::new(
        api.clone(),
        Arc::new(ObjectIndex::new()),
        roster.clone(),
        fast_settings(),
    ));
    let resource = cluster_object(
        "ns-src",
        "cm1",
        json!({"sourceObject": {"version": "v1", "kind": "ConfigMap"}}),
    );
    api.insert_cluster_object(&resource);
    api.insert(&config_map_kind(), "ns-src", config_map("cm1", json!({"k": "1"})));

    let task = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            dispatcher
                .dispatch(ClusterEvent::ClusterObjectApplied(resource))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!task.is_finished());
    assert!(dispatcher.index().is_empty());

    roster.replace(vec!["ns-src".to_string(), "a".to_string()]);
    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();

    assert_ok!(result);
    assert!(api.object(&config_map_kind(), "a", "cm1").is_some());
}

#[tokio::test]
async fn deleting_cluster_object_removes_clones_when_asked() {
    let harness = Harness::new(&["ns-src", "a", "b"]);
    let resource = harness.apply(&["OnClusterObjectDelete"]).await;
    harness.api.clear_calls();

    assert_ok!(
        harness
            .dispatcher
            .dispatch(ClusterEvent::ClusterObjectDeleted(resource))
            .await
    );

    assert!(harness.dispatcher.index().is_empty());
    assert!(!harness.clone_exists("a"));
    assert!(!harness.clone_exists("b"));
    assert!(harness.api.calls_of("patch_status").is_empty());
}

#[tokio::test]
async fn deleting_cluster_object_keeps_clones_by_default() {
    let harness = Harness::new(&["ns-src", "a"]);
    let resource = harness.apply(&[]).await;

    assert_ok!(
        harness
            .dispatcher
            .dispatch(ClusterEvent::ClusterObjectDeleted(resource))
            .await
    );

    assert!(harness.dispatcher.index().is_empty());
    assert!(harness.clone_exists("a"));
}

#[tokio::test]
async fn cleanup_skips_clones_that_are_already_gone() {
    let harness = Harness::new(&["ns-src", "a", "b"]);
    let resource = harness.apply(&["OnClusterObjectDelete"]).await;
    harness.api.delete_object(&config_map_kind(), "a", "cm1");

    assert_ok!(
        harness
            .dispatcher
            .dispatch(ClusterEvent::ClusterObjectDeleted(resource))
            .await
    );

    assert!(!harness.clone_exists("b"));
}

#[tokio::test]
async fn deleting_cluster_object_drops_its_synced_namespaces_series() {
    let harness = Harness::new(&["ns-metrics", "a", "b"]);
    let resource = cluster_object(
        "ns-metrics",
        "cm-metrics",
        json!({"sourceObject": {"version": "v1", "kind": "ConfigMap"}}),
    );
    harness.api.insert_cluster_object(&resource);
    harness.api.insert(
        &config_map_kind(),
        "ns-metrics",
        config_map("cm-metrics", json!({"k": "1"})),
    );
    assert_ok!(
        harness
            .dispatcher
            .dispatch(ClusterEvent::ClusterObjectApplied(resource.clone()))
            .await
    );
    let labels = ["ns-metrics", "cm-metrics"];
    assert_eq!(SYNCED_NAMESPACES.with_label_values(&labels).get(), 2.0);

    assert_ok!(
        harness
            .dispatcher
            .dispatch(ClusterEvent::ClusterObjectDeleted(resource))
            .await
    );

    assert!(SYNCED_NAMESPACES.remove_label_values(&labels).is_err());
}

// ============================================================================
// Namespace Events
// ============================================================================

#[tokio::test]
async fn deleted_namespace_is_dropped_from_status() {
    let harness = Harness::new(&["ns-src", "a", "b"]);
    harness.apply(&[]).await;
    assert_eq!(harness.api.synced("ns-src", "cm1"), vec!["a", "b"]);

    harness.dispatcher.roster().remove("a");
    harness.api.delete_object(&config_map_kind(), "a", "cm1");
    assert_ok!(
        harness
            .dispatcher
            .dispatch(ClusterEvent::NamespaceDeleted("a".to_string()))
            .await
    );

    assert_eq!(harness.api.synced("ns-src", "cm1"), vec!["b"]);
}

#[tokio::test]
async fn created_namespace_receives_a_clone() {
    let harness = Harness::new(&["ns-src", "a"]);
    harness.apply(&[]).await;
    harness.api.clear_calls();

    harness.dispatcher.roster().insert("d");
    assert_ok!(
        harness
            .dispatcher
            .dispatch(ClusterEvent::NamespaceCreated("d".to_string()))
            .await
    );

    assert_eq!(harness.api.calls_of("create"), vec!["create d/cm1"]);
    assert_eq!(harness.api.synced("ns-src", "cm1"), vec!["a", "d"]);
}

// ============================================================================
// Source Object Events
// ============================================================================

#[tokio::test]
async fn source_change_is_propagated() {
    let harness = Harness::new(&["ns-src", "a"]);
    harness.apply(&[]).await;

    let mut source = harness
        .api
        .object(&config_map_kind(), "ns-src", "cm1")
        .unwrap();
    source["data"] = json!({"k": "changed"});
    harness.api.insert(&config_map_kind(), "ns-src", source);
    assert_ok!(
        harness
            .dispatcher
            .dispatch(ClusterEvent::SourceApplied(source_key()))
            .await
    );

    let clone = harness.api.object(&config_map_kind(), "a", "cm1").unwrap();
    assert_eq!(clone["data"], json!({"k": "changed"}));
}

#[tokio::test]
async fn unindexed_source_event_is_ignored() {
    let harness = Harness::new(&["ns-src", "a"]);
    let other = ObjectKey::new(&config_map_kind(), "ns-src", "other");

    assert_ok!(
        harness
            .dispatcher
            .dispatch(ClusterEvent::SourceApplied(other))
            .await
    );
    assert!(harness.api.calls().is_empty());
}

#[tokio::test]
async fn deleting_source_removes_clones_and_status_when_asked() {
    let harness = Harness::new(&["ns-src", "a", "b"]);
    harness.apply(&["OnSourceObjectDelete"]).await;

    harness.api.delete_object(&config_map_kind(), "ns-src", "cm1");
    assert_ok!(
        harness
            .dispatcher
            .dispatch(ClusterEvent::SourceDeleted(source_key()))
            .await
    );

    assert!(!harness.clone_exists("a"));
    assert!(!harness.clone_exists("b"));
    assert!(harness.api.synced("ns-src", "cm1").is_empty());
    // The ClusterObject stays indexed for when the source comes back
    assert!(harness
        .dispatcher
        .index()
        .get(&ResourceId::new("ns-src", "cm1"))
        .is_some());
}

#[tokio::test]
async fn deleting_source_keeps_clones_by_default() {
    let harness = Harness::new(&["ns-src", "a"]);
    harness.apply(&["OnClusterObjectDelete"]).await;

    harness.api.delete_object(&config_map_kind(), "ns-src", "cm1");
    assert_ok!(
        harness
            .dispatcher
            .dispatch(ClusterEvent::SourceDeleted(source_key()))
            .await
    );

    assert!(harness.clone_exists("a"));
    assert_eq!(harness.api.synced("ns-src", "cm1"), vec!["a"]);
}
