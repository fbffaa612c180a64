//! In-memory Kubernetes API used by the integration tests

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::{json, Value};

use object_cloner_operator::adapters::object_api::{cluster_object_kind, ObjectApi};
use object_cloner_operator::config::{RetryPolicy, SyncSettings};
use object_cloner_operator::crd::{ClusterObject, ClusterObjectSpec, SourceObjectRef};
use object_cloner_operator::{Error, Result};

/// A failure the fake returns instead of performing a write
#[derive(Clone, Copy, Debug)]
pub enum Failure {
    Conflict,
    Invalid,
    Other,
}

impl Failure {
    fn to_error(self, what: &str) -> Error {
        match self {
            Failure::Conflict => Error::Conflict(format!("{} was modified", what)),
            Failure::Invalid => Error::Invalid(format!("{} has an immutable field", what)),
            Failure::Other => Error::KubeError(format!("{} failed", what)),
        }
    }
}

#[derive(Default)]
struct FailurePlan {
    queued: VecDeque<Failure>,
    always: Option<Failure>,
}

impl FailurePlan {
    fn next(&mut self) -> Option<Failure> {
        self.queued.pop_front().or(self.always)
    }
}

type ObjectId = (SourceObjectRef, String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectId, Value>,
    calls: Vec<String>,
    update_failures: HashMap<String, FailurePlan>,
    status_failures: FailurePlan,
    revision: u64,
}

impl State {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }
}

/// Records every write and lets tests inject failures per namespace
#[derive(Default)]
pub struct FakeApi {
    state: Mutex<State>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object as the API server would, returning the stored copy
    pub fn insert(&self, kind: &SourceObjectRef, namespace: &str, object: Value) -> Value {
        let mut state = self.state.lock().unwrap();
        let mut object = object;
        let revision = state.next_revision();
        let metadata = object["metadata"].as_object_mut().unwrap();
        metadata.insert("namespace".into(), json!(namespace));
        metadata.insert("resourceVersion".into(), json!(revision));
        metadata
            .entry("uid")
            .or_insert_with(|| json!(format!("uid-{}", revision)));
        metadata
            .entry("creationTimestamp")
            .or_insert_with(|| json!("2024-01-01T00:00:00Z"));
        let name = metadata["name"].as_str().unwrap().to_string();
        state
            .objects
            .insert((kind.clone(), namespace.to_string(), name), object.clone());
        object
    }

    /// Remove an object behind the operator's back
    pub fn delete_object(&self, kind: &SourceObjectRef, namespace: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .objects
            .remove(&(kind.clone(), namespace.to_string(), name.to_string()));
    }

    pub fn insert_cluster_object(&self, resource: &ClusterObject) {
        let namespace = resource.metadata.namespace.clone().unwrap();
        self.insert(
            &cluster_object_kind(),
            &namespace,
            serde_json::to_value(resource).unwrap(),
        );
    }

    pub fn object(&self, kind: &SourceObjectRef, namespace: &str, name: &str) -> Option<Value> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(&(kind.clone(), namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// The stored ClusterObject, as the operator would read it back
    pub fn cluster_object(&self, namespace: &str, name: &str) -> ClusterObject {
        let value = self
            .object(&cluster_object_kind(), namespace, name)
            .unwrap();
        serde_json::from_value(value).unwrap()
    }

    /// Synced namespace names recorded in a ClusterObject status, sorted
    pub fn synced(&self, namespace: &str, name: &str) -> Vec<String> {
        let mut names = self.cluster_object(namespace, name).synced_namespace_names();
        names.sort();
        names
    }

    pub fn fail_updates_in(&self, namespace: &str, failures: &[Failure]) {
        let mut state = self.state.lock().unwrap();
        let plan = state.update_failures.entry(namespace.to_string()).or_default();
        plan.queued.extend(failures.iter().copied());
    }

    pub fn always_fail_updates_in(&self, namespace: &str, failure: Failure) {
        let mut state = self.state.lock().unwrap();
        state
            .update_failures
            .entry(namespace.to_string())
            .or_default()
            .always = Some(failure);
    }

    pub fn fail_status_writes(&self, failures: &[Failure]) {
        let mut state = self.state.lock().unwrap();
        state.status_failures.queued.extend(failures.iter().copied());
    }

    pub fn always_fail_status_writes(&self, failure: Failure) {
        self.state.lock().unwrap().status_failures.always = Some(failure);
    }

    /// Writes performed so far, e.g. `create a/cm1`
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Writes of one verb, e.g. every `update` call
    pub fn calls_of(&self, verb: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.split(' ').next() == Some(verb))
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    fn record(&self, state: &mut State, verb: &str, namespace: &str, name: &str) {
        state.calls.push(format!("{} {}/{}", verb, namespace, name));
    }
}

fn name_of(object: &Value) -> String {
    object["metadata"]["name"].as_str().unwrap_or_default().to_string()
}

#[async_trait]
impl ObjectApi for FakeApi {
    async fn get(&self, kind: &SourceObjectRef, namespace: &str, name: &str) -> Result<Option<Value>> {
        Ok(self.object(kind, namespace, name))
    }

    async fn create(&self, kind: &SourceObjectRef, namespace: &str, object: &Value) -> Result<Value> {
        let name = name_of(object);
        {
            let mut state = self.state.lock().unwrap();
            self.record(&mut state, "create", namespace, &name);
            let id = (kind.clone(), namespace.to_string(), name.clone());
            if state.objects.contains_key(&id) {
                return Err(Error::Conflict(format!("{}/{} already exists", namespace, name)));
            }
        }
        Ok(self.insert(kind, namespace, object.clone()))
    }

    async fn update(&self, kind: &SourceObjectRef, namespace: &str, object: &Value) -> Result<Value> {
        let name = name_of(object);
        {
            let mut state = self.state.lock().unwrap();
            self.record(&mut state, "update", namespace, &name);
            let failure = state
                .update_failures
                .get_mut(namespace)
                .and_then(FailurePlan::next);
            if let Some(failure) = failure {
                return Err(failure.to_error(&format!("{}/{}", namespace, name)));
            }
            let id = (kind.clone(), namespace.to_string(), name.clone());
            let Some(stored) = state.objects.get(&id) else {
                return Err(Error::KubeError(format!("{}/{} not found", namespace, name)));
            };
            if stored["metadata"]["resourceVersion"] != object["metadata"]["resourceVersion"] {
                return Err(Error::Conflict(format!("{}/{} is stale", namespace, name)));
            }
        }
        Ok(self.insert(kind, namespace, object.clone()))
    }

    async fn patch_status(
        &self,
        kind: &SourceObjectRef,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<Value> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, "patch_status", namespace, name);
        if let Some(failure) = state.status_failures.next() {
            return Err(failure.to_error(&format!("status of {}/{}", namespace, name)));
        }
        let revision = state.next_revision();
        let id = (kind.clone(), namespace.to_string(), name.to_string());
        let Some(stored) = state.objects.get_mut(&id) else {
            return Err(Error::KubeError(format!("{}/{} not found", namespace, name)));
        };
        if let Some(expected) = patch.pointer("/metadata/resourceVersion") {
            if stored["metadata"]["resourceVersion"] != *expected {
                return Err(Error::Conflict(format!("{}/{} is stale", namespace, name)));
            }
        }
        stored["status"] = patch["status"].clone();
        stored["metadata"]["resourceVersion"] = json!(revision);
        Ok(stored.clone())
    }

    async fn delete(&self, kind: &SourceObjectRef, namespace: &str, name: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        self.record(&mut state, "delete", namespace, name);
        let id = (kind.clone(), namespace.to_string(), name.to_string());
        Ok(state.objects.remove(&id).is_some())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn config_map_kind() -> SourceObjectRef {
    SourceObjectRef::new("", "v1", "ConfigMap")
}

pub fn config_map(name: &str, data: Value) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {"name": name},
        "data": data
    })
}

/// A ClusterObject in `namespace` built from a camelCase spec
pub fn cluster_object(namespace: &str, name: &str, spec: Value) -> ClusterObject {
    let spec: ClusterObjectSpec = serde_json::from_value(spec).unwrap();
    let mut resource = ClusterObject::new(name, spec);
    resource.metadata = ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..ObjectMeta::default()
    };
    resource
}

/// Settings with the production attempt count and no delay
pub fn fast_settings() -> SyncSettings {
    SyncSettings {
        retry: RetryPolicy {
            attempts: 10,
            delay: Duration::ZERO,
        },
        ..SyncSettings::default()
    }
}

pub fn namespaces(names: &[&str]) -> std::collections::BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}
