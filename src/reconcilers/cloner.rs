//! A ClusterObject with its patterns compiled, ready to be synced

use std::collections::BTreeSet;
use std::fmt;

use kube::ResourceExt;
use serde_json::Value;

use crate::crd::{CleanupEvent, ClusterObject, SourceObjectRef, UpdateStrategy};
use crate::reconcilers::fields::{builtin_field_paths, strip_fields, FieldPath};
use crate::reconcilers::index::ObjectKey;
use crate::reconcilers::namespaces::NamespaceFilter;
use crate::{Error, Result};

/// Namespace and name of a ClusterObject.
/// The source object it clones has the same namespace and name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    pub namespace: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Identity of a ClusterObject; it must be namespaced and named
    pub fn of(resource: &ClusterObject) -> Result<Self> {
        let namespace = resource
            .namespace()
            .ok_or_else(|| Error::ValidationError("ClusterObject has no namespace".to_string()))?;
        let name = resource
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::ValidationError("ClusterObject has no name".to_string()))?;
        Ok(Self { namespace, name })
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Validated, compiled form of a ClusterObject
#[derive(Clone, Debug)]
pub struct Cloner {
    pub id: ResourceId,
    pub source: SourceObjectRef,
    pub update_strategy: UpdateStrategy,
    filter: NamespaceFilter,
    field_paths: Vec<FieldPath>,
    resource: ClusterObject,
}

impl Cloner {
    /// Validate a ClusterObject and compile its patterns
    pub fn new(resource: &ClusterObject, default_strategy: UpdateStrategy) -> Result<Self> {
        let id = ResourceId::of(resource)?;
        let spec = &resource.spec;

        if spec.source_object.version.trim().is_empty() {
            return Err(Error::ValidationError(
                "sourceObject.version cannot be empty".to_string(),
            ));
        }
        if spec.source_object.kind.trim().is_empty() {
            return Err(Error::ValidationError(
                "sourceObject.kind cannot be empty".to_string(),
            ));
        }

        let filter = NamespaceFilter::compile(
            spec.namespaces_to_include.as_slice(),
            spec.namespaces_to_exclude.as_slice(),
        )?;

        let mut field_paths = spec
            .fields_to_exclude
            .iter()
            .map(|path| FieldPath::compile(path.as_slice()))
            .collect::<Result<Vec<_>>>()?;
        field_paths.extend(builtin_field_paths());

        Ok(Self {
            id,
            source: spec.source_object.clone(),
            update_strategy: spec.update_strategy.unwrap_or(default_strategy),
            filter,
            field_paths,
            resource: resource.clone(),
        })
    }

    /// Index key of the source object
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.source, &self.id.namespace, &self.id.name)
    }

    /// Namespaces this resource clones into, out of `namespaces`
    pub fn target_namespaces<'a, I>(&self, namespaces: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.filter.select(namespaces, &self.id.namespace)
    }

    /// Strip the fields that are never compared or copied
    pub fn normalize(&self, object: &mut Value) {
        strip_fields(object, &self.field_paths);
    }

    pub fn cleans_up_on(&self, event: CleanupEvent) -> bool {
        self.resource.cleans_up_on(event)
    }

    /// The ClusterObject this was compiled from
    pub fn resource(&self) -> &ClusterObject {
        &self.resource
    }
}
