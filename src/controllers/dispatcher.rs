//! Event dispatcher
//!
//! Every cluster event is first resolved to the ClusterObjects it affects and
//! the work to do for them. That work then runs once per ClusterObject under
//! a per-resource lock, so sync, status and cleanup for the same
//! ClusterObject never overlap inside the process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error, info, instrument, warn};

use crate::adapters::object_api::{cluster_object_kind, ObjectApi};
use crate::config::SyncSettings;
use crate::crd::{CleanupEvent, ClusterObject};
use crate::metrics::prometheus::{DISPATCHED_EVENTS, MANAGED_RESOURCES, SYNCED_NAMESPACES};
use crate::reconcilers::cleanup::delete_clones;
use crate::reconcilers::{
    Cloner, NamespaceRoster, ObjectIndex, ObjectKey, ResourceId, StatusRecorder, SyncEngine,
};
use crate::Result;

/// A change observed in the cluster
#[derive(Clone, Debug)]
pub enum ClusterEvent {
    /// A ClusterObject was created or updated
    ClusterObjectApplied(ClusterObject),
    /// A ClusterObject is being deleted
    ClusterObjectDeleted(ClusterObject),
    /// A namespace appeared
    NamespaceCreated(String),
    /// A namespace was deleted
    NamespaceDeleted(String),
    /// An object was created or updated
    SourceApplied(ObjectKey),
    /// An object was deleted
    SourceDeleted(ObjectKey),
}

impl ClusterEvent {
    fn label(&self) -> &'static str {
        match self {
            ClusterEvent::ClusterObjectApplied(_) => "cluster_object_applied",
            ClusterEvent::ClusterObjectDeleted(_) => "cluster_object_deleted",
            ClusterEvent::NamespaceCreated(_) => "namespace_created",
            ClusterEvent::NamespaceDeleted(_) => "namespace_deleted",
            ClusterEvent::SourceApplied(_) => "source_applied",
            ClusterEvent::SourceDeleted(_) => "source_deleted",
        }
    }
}

/// What to do for each affected ClusterObject
#[derive(Clone, Debug, PartialEq, Eq)]
enum Work {
    /// Sync into every target namespace, or only into the given one
    Sync { target: Option<String> },
    /// Drop a namespace from the synced status
    Forget { namespace: String },
    /// Delete the clones if the ClusterObject asks for it on this event
    Teardown { event: CleanupEvent },
}

/// Async mutex per ClusterObject
#[derive(Default)]
struct KeyedLocks {
    locks: Mutex<HashMap<ResourceId, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    fn get(&self, id: &ResourceId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.clone())
            .or_default()
            .clone()
    }

    /// Drop the entry for `id` unless a task other than the caller, which
    /// holds `lock`, still waits on or holds it
    fn forget(&self, id: &ResourceId, lock: &Arc<tokio::sync::Mutex<()>>) -> bool {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let idle = locks
            .get(id)
            .is_some_and(|entry| Arc::ptr_eq(entry, lock) && Arc::strong_count(lock) == 2);
        if idle {
            locks.remove(id);
        }
        idle
    }
}

/// Routes cluster events to the sync engine and cleanup flows
pub struct Dispatcher {
    api: Arc<dyn ObjectApi>,
    index: Arc<ObjectIndex>,
    roster: Arc<NamespaceRoster>,
    settings: SyncSettings,
    locks: KeyedLocks,
}

impl Dispatcher {
    pub fn new(
        api: Arc<dyn ObjectApi>,
        index: Arc<ObjectIndex>,
        roster: Arc<NamespaceRoster>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            api,
            index,
            roster,
            settings,
            locks: KeyedLocks::default(),
        }
    }

    pub fn index(&self) -> &Arc<ObjectIndex> {
        &self.index
    }

    pub fn roster(&self) -> &Arc<NamespaceRoster> {
        &self.roster
    }

    /// Handle one event. Every affected ClusterObject is processed even when
    /// an earlier one fails; the first failure is returned.
    #[instrument(skip(self, event), fields(event = event.label()))]
    pub async fn dispatch(&self, event: ClusterEvent) -> Result<()> {
        let label = event.label();
        let (cloners, work) = self.resolve(event).await?;
        if cloners.is_empty() {
            return Ok(());
        }
        DISPATCHED_EVENTS.with_label_values(&[label]).inc();
        debug!("{} affects {} ClusterObjects: {:?}", label, cloners.len(), work);

        let mut first_error = None;
        for cloner in cloners {
            if let Err(e) = self.run(&cloner, &work).await {
                error!("Failed to handle {} for {}: {}", label, cloner.id, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Resolve an event to the affected ClusterObjects, updating the index
    /// for ClusterObject lifecycle events
    async fn resolve(&self, event: ClusterEvent) -> Result<(Vec<Arc<Cloner>>, Work)> {
        match event {
            ClusterEvent::ClusterObjectApplied(resource) => {
                // The roster must be complete before any target set is computed
                self.roster.wait_until_ready().await;
                let cloner = match Cloner::new(&resource, self.settings.default_update_strategy) {
                    Ok(cloner) => cloner,
                    Err(e) => {
                        // An invalid update must not leave the previous version indexed
                        if let Ok(id) = ResourceId::of(&resource) {
                            self.index.remove(&id);
                            self.update_gauge();
                        }
                        return Err(e);
                    }
                };
                let key = self.index.upsert(Arc::new(cloner));
                self.update_gauge();
                Ok((self.index.lookup(&key), Work::Sync { target: None }))
            }
            ClusterEvent::ClusterObjectDeleted(resource) => {
                let id = ResourceId::of(&resource)?;
                let indexed = self.index.remove(&id);
                self.update_gauge();
                let cloner = match Cloner::new(&resource, self.settings.default_update_strategy) {
                    Ok(cloner) => Some(Arc::new(cloner)),
                    Err(e) => {
                        warn!("Deleted ClusterObject {} does not compile ({}), using indexed copy", id, e);
                        indexed
                    }
                };
                let work = Work::Teardown {
                    event: CleanupEvent::OnClusterObjectDelete,
                };
                Ok((cloner.into_iter().collect(), work))
            }
            ClusterEvent::NamespaceCreated(namespace) => Ok((
                self.index.all(),
                Work::Sync {
                    target: Some(namespace),
                },
            )),
            ClusterEvent::NamespaceDeleted(namespace) => {
                Ok((self.index.all(), Work::Forget { namespace }))
            }
            ClusterEvent::SourceApplied(key) => {
                Ok((self.index.lookup(&key), Work::Sync { target: None }))
            }
            ClusterEvent::SourceDeleted(key) => Ok((
                self.index.lookup(&key),
                Work::Teardown {
                    event: CleanupEvent::OnSourceObjectDelete,
                },
            )),
        }
    }

    async fn run(&self, cloner: &Cloner, work: &Work) -> Result<()> {
        let lock = self.locks.get(&cloner.id);
        let guard = lock.lock().await;
        let result = self.execute(cloner, work).await;
        drop(guard);

        if matches!(work, Work::Teardown { event: CleanupEvent::OnClusterObjectDelete }) {
            if !self.locks.forget(&cloner.id, &lock) {
                debug!("Lock of {} is still in use, keeping it", cloner.id);
            }
            let labels = [cloner.id.namespace.as_str(), cloner.id.name.as_str()];
            if SYNCED_NAMESPACES.remove_label_values(&labels).is_err() {
                debug!("No synced namespaces series for {}", cloner.id);
            }
        }
        result
    }

    async fn execute(&self, cloner: &Cloner, work: &Work) -> Result<()> {
        match work {
            Work::Sync { target } => {
                let namespaces = self.roster.names();
                let synced = SyncEngine::new(self.api.as_ref(), self.settings)
                    .sync(cloner, &namespaces, target.as_deref())
                    .await?;
                debug!("Sync of {} done, activity: {}", cloner.id, synced);
                Ok(())
            }
            Work::Forget { namespace } => {
                self.recorder()
                    .record_removed(&cloner.id, std::slice::from_ref(namespace))
                    .await
            }
            Work::Teardown { event } => self.teardown(cloner, *event).await,
        }
    }

    async fn teardown(&self, cloner: &Cloner, event: CleanupEvent) -> Result<()> {
        if !cloner.cleans_up_on(event) {
            debug!("{} does not clean up on {:?}", cloner.id, event);
            return Ok(());
        }

        let namespaces = self.synced_namespaces(cloner).await?;
        info!(
            "Cleaning up clones of {} on {:?} in {:?}",
            cloner.id, event, namespaces
        );
        let deleted =
            delete_clones(self.api.as_ref(), &cloner.source, &cloner.id.name, &namespaces).await?;
        info!("Deleted {} of {} clones of {}", deleted.len(), namespaces.len(), cloner.id);

        if event == CleanupEvent::OnSourceObjectDelete {
            self.recorder().record_removed(&cloner.id, &namespaces).await?;
        }
        Ok(())
    }

    /// Synced namespaces from the live ClusterObject, or from the indexed
    /// copy when the live one is already gone
    async fn synced_namespaces(&self, cloner: &Cloner) -> Result<Vec<String>> {
        let live = self
            .api
            .get(&cluster_object_kind(), &cloner.id.namespace, &cloner.id.name)
            .await?;
        match live {
            Some(value) => {
                let resource: ClusterObject = serde_json::from_value(value)?;
                Ok(resource.synced_namespace_names())
            }
            None => Ok(cloner.resource().synced_namespace_names()),
        }
    }

    fn recorder(&self) -> StatusRecorder<'_> {
        StatusRecorder::new(self.api.as_ref(), self.settings.retry)
    }

    fn update_gauge(&self) {
        MANAGED_RESOURCES
            .with_label_values(&["ClusterObject"])
            .set(self.index.len() as f64);
    }
}
