//! Untyped access to namespaced Kubernetes objects
//!
//! The sync engine only ever needs get/create/update/delete on arbitrary kinds
//! plus a status write on its own resource. [`ObjectApi`] is that surface;
//! [`KubeObjectApi`] implements it over `Api<DynamicObject>`.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use kube::api::{DeleteParams, Patch, PatchParams, PostParams};
use kube::core::{DynamicObject, GroupVersionKind};
use kube::discovery::{pinned_kind, ApiResource, Scope};
use kube::{Api, Client, ResourceExt};
use serde_json::Value;
use tracing::debug;

use crate::crd::{ClusterObject, SourceObjectRef};
use crate::{Error, Result};

/// Kubernetes API operations on untyped objects
#[async_trait]
pub trait ObjectApi: Send + Sync {
    /// Fetch an object, `None` when it does not exist
    async fn get(&self, kind: &SourceObjectRef, namespace: &str, name: &str)
        -> Result<Option<Value>>;

    /// Create an object in `namespace`
    async fn create(&self, kind: &SourceObjectRef, namespace: &str, object: &Value)
        -> Result<Value>;

    /// Replace an object. The object's `metadata.resourceVersion` is the
    /// concurrency precondition; a stale one yields [`Error::Conflict`].
    async fn update(&self, kind: &SourceObjectRef, namespace: &str, object: &Value)
        -> Result<Value>;

    /// Merge-patch the status subresource
    async fn patch_status(
        &self,
        kind: &SourceObjectRef,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<Value>;

    /// Delete an object, `false` when it was already gone
    async fn delete(&self, kind: &SourceObjectRef, namespace: &str, name: &str) -> Result<bool>;
}

/// Group/version/kind of the ClusterObject resource itself
pub fn cluster_object_kind() -> SourceObjectRef {
    SourceObjectRef::new("object-cloner.ideamix.es", "v1", "ClusterObject")
}

/// `metadata.name` of an untyped object
pub fn object_name(object: &Value) -> Option<&str> {
    object.pointer("/metadata/name").and_then(Value::as_str)
}

/// Set `metadata.namespace` on an untyped object
pub fn set_namespace(object: &mut Value, namespace: &str) {
    if let Some(metadata) = object.get_mut("metadata").and_then(Value::as_object_mut) {
        metadata.insert("namespace".to_string(), Value::String(namespace.to_string()));
    }
}

/// [`ObjectApi`] backed by the Kubernetes API server
pub struct KubeObjectApi {
    client: Client,
    resources: RwLock<HashMap<SourceObjectRef, ApiResource>>,
}

impl KubeObjectApi {
    /// Create a new API adapter
    pub fn new(client: Client) -> Self {
        let mut resources = HashMap::new();
        resources.insert(cluster_object_kind(), ApiResource::erase::<ClusterObject>(&()));
        Self {
            client,
            resources: RwLock::new(resources),
        }
    }

    /// Resolve a kind through API discovery, rejecting cluster-scoped kinds
    pub async fn resolve(&self, kind: &SourceObjectRef) -> Result<ApiResource> {
        let cached = self
            .resources
            .read()
            .ok()
            .and_then(|cache| cache.get(kind).cloned());
        if let Some(resource) = cached {
            return Ok(resource);
        }

        let gvk = GroupVersionKind::gvk(&kind.group, &kind.version, &kind.kind);
        let (resource, capabilities) = pinned_kind(&self.client, &gvk).await?;
        if matches!(capabilities.scope, Scope::Cluster) {
            return Err(Error::ValidationError(format!(
                "{} is cluster-scoped and cannot be cloned into namespaces",
                kind
            )));
        }
        debug!("Resolved {} to resource {}", kind, resource.plural);

        if let Ok(mut cache) = self.resources.write() {
            cache.insert(kind.clone(), resource.clone());
        }
        Ok(resource)
    }

    /// Kubernetes client
    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn namespaced(&self, kind: &SourceObjectRef, namespace: &str) -> Result<Api<DynamicObject>> {
        let resource = self.resolve(kind).await?;
        Ok(Api::namespaced_with(self.client.clone(), namespace, &resource))
    }
}

#[async_trait]
impl ObjectApi for KubeObjectApi {
    async fn get(
        &self,
        kind: &SourceObjectRef,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Value>> {
        let api = self.namespaced(kind, namespace).await?;
        match api.get_opt(name).await? {
            Some(object) => Ok(Some(serde_json::to_value(object)?)),
            None => Ok(None),
        }
    }

    async fn create(
        &self,
        kind: &SourceObjectRef,
        namespace: &str,
        object: &Value,
    ) -> Result<Value> {
        let api = self.namespaced(kind, namespace).await?;
        let object: DynamicObject = serde_json::from_value(object.clone())?;
        let created = api.create(&PostParams::default(), &object).await?;
        Ok(serde_json::to_value(created)?)
    }

    async fn update(
        &self,
        kind: &SourceObjectRef,
        namespace: &str,
        object: &Value,
    ) -> Result<Value> {
        let api = self.namespaced(kind, namespace).await?;
        let object: DynamicObject = serde_json::from_value(object.clone())?;
        let updated = api
            .replace(&object.name_any(), &PostParams::default(), &object)
            .await?;
        Ok(serde_json::to_value(updated)?)
    }

    async fn patch_status(
        &self,
        kind: &SourceObjectRef,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<Value> {
        let api = self.namespaced(kind, namespace).await?;
        let patched = api
            .patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?;
        Ok(serde_json::to_value(patched)?)
    }

    async fn delete(&self, kind: &SourceObjectRef, namespace: &str, name: &str) -> Result<bool> {
        let api = self.namespaced(kind, namespace).await?;
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
