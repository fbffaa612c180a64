//! ClusterObject Custom Resource Definition

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// ClusterObject resource specification
///
/// A ClusterObject clones the object that shares its namespace and name
/// (addressed by `sourceObject`) into every namespace selected by the
/// include/exclude filters.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "object-cloner.ideamix.es",
    version = "v1",
    kind = "ClusterObject",
    plural = "clusterobjects",
    singular = "clusterobject",
    shortname = "co",
    namespaced,
    status = "ClusterObjectStatus",
    printcolumn = r#"{"name": "Kind", "type": "string", "jsonPath": ".spec.sourceObject.kind"}"#,
    printcolumn = r#"{"name": "Strategy", "type": "string", "jsonPath": ".spec.updateStrategy"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterObjectSpec {
    /// Group, version and kind of the object to clone
    pub source_object: SourceObjectRef,

    /// Regex patterns of namespaces to clone into
    #[serde(default = "default_namespaces_to_include")]
    pub namespaces_to_include: Vec<String>,

    /// Regex patterns of namespaces to leave alone
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces_to_exclude: Vec<String>,

    /// Field paths (one regex per nesting level) ignored when comparing and
    /// never written to clones
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields_to_exclude: Vec<Vec<String>>,

    /// How a differing clone is brought back in sync.
    /// Falls back to the operator-wide default when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_strategy: Option<UpdateStrategy>,

    /// Events that delete the clones
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cleanup_events: Vec<CleanupEvent>,
}

fn default_namespaces_to_include() -> Vec<String> {
    vec![".*".to_string()]
}

/// Group/version/kind of a source object.
/// The core API group is the empty string.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, JsonSchema)]
pub struct SourceObjectRef {
    /// API group (empty for the core group)
    #[serde(default)]
    pub group: String,
    /// API version
    pub version: String,
    /// Kind
    pub kind: String,
}

impl SourceObjectRef {
    pub fn new(group: &str, version: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        }
    }

    /// `apiVersion` as it appears on objects of this kind
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for SourceObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.kind)
    }
}

/// Update strategy for clones that differ from the source
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum UpdateStrategy {
    /// Patch in place, recreate when an immutable field blocks the patch
    #[default]
    Auto,
    /// Always delete and create
    AlwaysRecreate,
    /// Patch in place, skip the namespace when the patch is rejected
    NeverRecreate,
}

impl FromStr for UpdateStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Auto" => Ok(UpdateStrategy::Auto),
            "AlwaysRecreate" => Ok(UpdateStrategy::AlwaysRecreate),
            "NeverRecreate" => Ok(UpdateStrategy::NeverRecreate),
            other => Err(Error::ConfigError(format!(
                "unknown update strategy '{}', expected one of Auto, AlwaysRecreate, NeverRecreate",
                other
            ))),
        }
    }
}

/// Lifecycle events that tear clones down
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum CleanupEvent {
    /// The ClusterObject itself is deleted
    OnClusterObjectDelete,
    /// The source object is deleted
    OnSourceObjectDelete,
}

/// ClusterObject status
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterObjectStatus {
    /// Namespaces currently holding a synced clone
    #[serde(default)]
    pub synced_namespaces: Vec<SyncedNamespace>,
}

/// A namespace holding a synced clone
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct SyncedNamespace {
    /// Namespace name
    pub name: String,
    /// Last time the clone was written
    pub timestamp: DateTime<Utc>,
}

impl ClusterObject {
    /// Whether the given cleanup event is enabled
    pub fn cleans_up_on(&self, event: CleanupEvent) -> bool {
        self.spec.cleanup_events.contains(&event)
    }

    /// Names of the namespaces listed in status
    pub fn synced_namespace_names(&self) -> Vec<String> {
        self.status
            .as_ref()
            .map(|s| s.synced_namespaces.iter().map(|n| n.name.clone()).collect())
            .unwrap_or_default()
    }
}
