//! Watchers on the kinds that ClusterObjects clone
//!
//! One watcher runs per source kind, started the first time a ClusterObject
//! references that kind. Kinds outside the allow-list are never watched.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use futures::StreamExt;
use kube::core::DynamicObject;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adapters::KubeObjectApi;
use crate::config::OperatorConfig;
use crate::controllers::dispatcher::{ClusterEvent, Dispatcher};
use crate::crd::SourceObjectRef;
use crate::reconcilers::ObjectKey;
use crate::Result;

/// Translate a watch event on an object of `kind` into a dispatcher event
pub fn source_event(kind: &SourceObjectRef, event: watcher::Event<DynamicObject>) -> Option<ClusterEvent> {
    let key = |object: &DynamicObject| {
        ObjectKey::new(kind, &object.namespace().unwrap_or_default(), &object.name_any())
    };
    match event {
        watcher::Event::Apply(object) | watcher::Event::InitApply(object) => {
            Some(ClusterEvent::SourceApplied(key(&object)))
        }
        watcher::Event::Delete(object) => Some(ClusterEvent::SourceDeleted(key(&object))),
        watcher::Event::Init | watcher::Event::InitDone => None,
    }
}

/// Registry of running source watchers
pub struct SourceWatchers {
    api: Arc<KubeObjectApi>,
    dispatcher: Arc<Dispatcher>,
    config: OperatorConfig,
    running: Mutex<HashSet<SourceObjectRef>>,
    shutdown: CancellationToken,
}

impl SourceWatchers {
    pub fn new(
        api: Arc<KubeObjectApi>,
        dispatcher: Arc<Dispatcher>,
        config: OperatorConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            api,
            dispatcher,
            config,
            running: Mutex::new(HashSet::new()),
            shutdown,
        }
    }

    /// Start a watcher for `kind` unless one runs already.
    /// Returns whether a new watcher was started.
    pub async fn ensure(&self, kind: &SourceObjectRef) -> Result<bool> {
        if !self.config.is_kind_allowed(kind) {
            warn!(
                "{} is not in the allowed object kinds, changes to its objects are not watched",
                kind
            );
            return Ok(false);
        }
        let already_running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(kind);
        if already_running {
            return Ok(false);
        }

        let resource = self.api.resolve(kind).await?;
        if !self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind.clone())
        {
            return Ok(false);
        }

        let objects: Api<DynamicObject> = Api::all_with(self.api.client().clone(), &resource);
        tokio::spawn(watch(
            kind.clone(),
            objects,
            self.dispatcher.clone(),
            self.shutdown.clone(),
        ));
        info!("Started watcher for {}", kind);
        Ok(true)
    }
}

async fn watch(
    kind: SourceObjectRef,
    objects: Api<DynamicObject>,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) {
    let mut stream = watcher(objects, watcher::Config::default())
        .default_backoff()
        .boxed();

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = stream.next() => event,
        };
        match event {
            Some(Ok(event)) => {
                let Some(cluster_event) = source_event(&kind, event) else {
                    continue;
                };
                let key = match &cluster_event {
                    ClusterEvent::SourceApplied(key) | ClusterEvent::SourceDeleted(key) => key,
                    _ => continue,
                };
                if dispatcher.index().lookup(key).is_empty() {
                    continue;
                }
                debug!("Source event for {}", key);
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    if let Err(e) = dispatcher.dispatch(cluster_event).await {
                        error!("Source event handling failed: {}", e);
                    }
                });
            }
            Some(Err(e)) => warn!("Watch error for {}: {}", kind, e),
            None => break,
        }
    }

    info!("Watcher for {} stopped", kind);
}
