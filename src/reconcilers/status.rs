//! Bookkeeping of synced namespaces in the ClusterObject status

use chrono::{DateTime, SubsecRound, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::adapters::object_api::{cluster_object_kind, ObjectApi};
use crate::config::RetryPolicy;
use crate::crd::{ClusterObject, ClusterObjectStatus, SyncedNamespace};
use crate::metrics::prometheus::SYNCED_NAMESPACES;
use crate::reconcilers::cloner::ResourceId;
use crate::{Error, Result};

/// Refresh or add an entry for each namespace. Returns whether anything changed.
pub fn mark_synced(
    status: &mut ClusterObjectStatus,
    namespaces: &[String],
    now: DateTime<Utc>,
) -> bool {
    for namespace in namespaces {
        match status
            .synced_namespaces
            .iter_mut()
            .find(|entry| entry.name == *namespace)
        {
            Some(entry) => entry.timestamp = now,
            None => status.synced_namespaces.push(SyncedNamespace {
                name: namespace.clone(),
                timestamp: now,
            }),
        }
    }
    !namespaces.is_empty()
}

/// Drop the entries of the given namespaces. Returns whether anything changed.
pub fn mark_removed(status: &mut ClusterObjectStatus, namespaces: &[String]) -> bool {
    let before = status.synced_namespaces.len();
    status
        .synced_namespaces
        .retain(|entry| !namespaces.contains(&entry.name));
    status.synced_namespaces.len() != before
}

/// Persists synced namespaces through the status subresource.
///
/// Each write reads the latest resource, applies the change and patches the
/// status with the observed resourceVersion, retrying on conflicts.
pub struct StatusRecorder<'a> {
    api: &'a dyn ObjectApi,
    retry: RetryPolicy,
}

impl<'a> StatusRecorder<'a> {
    pub fn new(api: &'a dyn ObjectApi, retry: RetryPolicy) -> Self {
        Self { api, retry }
    }

    /// Record fresh syncs of `namespaces`
    pub async fn record_synced(&self, id: &ResourceId, namespaces: &[String]) -> Result<()> {
        let namespaces: Vec<String> = namespaces
            .iter()
            .filter(|ns| **ns != id.namespace)
            .cloned()
            .collect();
        if namespaces.is_empty() {
            return Ok(());
        }
        let now = Utc::now().trunc_subsecs(0);
        self.record(id, |status| mark_synced(status, &namespaces, now))
            .await
    }

    /// Forget `namespaces`; absent entries are ignored
    pub async fn record_removed(&self, id: &ResourceId, namespaces: &[String]) -> Result<()> {
        if namespaces.is_empty() {
            return Ok(());
        }
        self.record(id, |status| mark_removed(status, namespaces))
            .await
    }

    async fn record<F>(&self, id: &ResourceId, change: F) -> Result<()>
    where
        F: Fn(&mut ClusterObjectStatus) -> bool + Send + Sync,
    {
        let kind = cluster_object_kind();
        let attempts = self.retry.attempts;

        for attempt in 1..=attempts {
            let Some(current) = self.api.get(&kind, &id.namespace, &id.name).await? else {
                debug!("ClusterObject {} is gone, skipping status update", id);
                return Ok(());
            };
            let resource: ClusterObject = serde_json::from_value(current)?;
            let mut status = resource.status.clone().unwrap_or_default();
            if !change(&mut status) {
                return Ok(());
            }

            let patch = json!({
                "metadata": {"resourceVersion": resource.metadata.resource_version},
                "status": status,
            });
            match self
                .api
                .patch_status(&kind, &id.namespace, &id.name, &patch)
                .await
            {
                Ok(_) => {
                    SYNCED_NAMESPACES
                        .with_label_values(&[id.namespace.as_str(), id.name.as_str()])
                        .set(status.synced_namespaces.len() as f64);
                    info!(
                        "Updated status for {}: {} synced namespaces",
                        id,
                        status.synced_namespaces.len()
                    );
                    return Ok(());
                }
                Err(e) if e.is_conflict() => {
                    warn!(
                        "Status update conflict for {} (attempt {}/{}): {}",
                        id, attempt, attempts, e
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.retry.delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::RetriesExhausted {
            target: format!("status of ClusterObject {}", id),
            attempts,
        })
    }
}
