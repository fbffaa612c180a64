//! Removal of clones when their ClusterObject or source object goes away

use tracing::{info, warn};

use crate::adapters::object_api::ObjectApi;
use crate::crd::SourceObjectRef;
use crate::metrics::prometheus::CLONE_OPERATIONS;
use crate::Result;

/// Delete the clone named `name` in every namespace of `namespaces`.
///
/// Clones that are already gone are skipped. Returns the namespaces where a
/// clone was actually deleted; the first API failure aborts the sweep.
pub async fn delete_clones(
    api: &dyn ObjectApi,
    kind: &SourceObjectRef,
    name: &str,
    namespaces: &[String],
) -> Result<Vec<String>> {
    let mut deleted = Vec::with_capacity(namespaces.len());
    for namespace in namespaces {
        if api.delete(kind, namespace, name).await? {
            CLONE_OPERATIONS.with_label_values(&["delete"]).inc();
            info!("Deleted clone {} {}/{}", kind, namespace, name);
            deleted.push(namespace.clone());
        } else {
            warn!(
                "Clone {} {}/{} was not found, nothing to delete",
                kind, namespace, name
            );
        }
    }
    Ok(deleted)
}
