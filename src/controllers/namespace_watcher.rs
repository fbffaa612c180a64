//! Watcher keeping the namespace roster current

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Namespace;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::controllers::dispatcher::{ClusterEvent, Dispatcher};
use crate::metrics::prometheus::ROSTER_READY;
use crate::reconcilers::NamespaceRoster;

/// Folds namespace watch events into the roster.
///
/// A (re)listing is buffered until it completes and then replaces the roster
/// as a whole. Namespaces that appear or disappear after the first listing
/// become [`ClusterEvent`]s.
#[derive(Debug, Default)]
pub struct NamespaceTracker {
    listing: Option<Vec<String>>,
}

impl NamespaceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one watch event, returning the events to dispatch
    pub fn handle(
        &mut self,
        roster: &NamespaceRoster,
        event: watcher::Event<Namespace>,
    ) -> Vec<ClusterEvent> {
        match event {
            watcher::Event::Init => {
                self.listing = Some(Vec::new());
                Vec::new()
            }
            watcher::Event::InitApply(namespace) => {
                self.listing
                    .get_or_insert_with(Vec::new)
                    .push(namespace.name_any());
                Vec::new()
            }
            watcher::Event::InitDone => {
                let was_ready = roster.is_ready();
                let changes = roster.replace(self.listing.take().unwrap_or_default());
                ROSTER_READY.set(1.0);
                if !was_ready {
                    info!("Namespace roster populated with {} namespaces", roster.names().len());
                    return Vec::new();
                }
                changes
                    .added
                    .into_iter()
                    .map(ClusterEvent::NamespaceCreated)
                    .chain(changes.removed.into_iter().map(ClusterEvent::NamespaceDeleted))
                    .collect()
            }
            watcher::Event::Apply(namespace) => {
                let name = namespace.name_any();
                if roster.insert(&name) && roster.is_ready() {
                    vec![ClusterEvent::NamespaceCreated(name)]
                } else {
                    Vec::new()
                }
            }
            watcher::Event::Delete(namespace) => {
                let name = namespace.name_any();
                roster.remove(&name);
                vec![ClusterEvent::NamespaceDeleted(name)]
            }
        }
    }
}

/// Watch namespaces until `shutdown` is cancelled
pub async fn run(client: Client, dispatcher: Arc<Dispatcher>, shutdown: CancellationToken) {
    let namespaces: Api<Namespace> = Api::all(client);
    let roster = dispatcher.roster().clone();
    let mut tracker = NamespaceTracker::new();
    let mut stream = watcher(namespaces, watcher::Config::default())
        .default_backoff()
        .boxed();

    info!("Starting namespace watcher");

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = stream.next() => event,
        };
        match event {
            Some(Ok(event)) => {
                for cluster_event in tracker.handle(&roster, event) {
                    let dispatcher = dispatcher.clone();
                    tokio::spawn(async move {
                        if let Err(e) = dispatcher.dispatch(cluster_event).await {
                            error!("Namespace event handling failed: {}", e);
                        }
                    });
                }
            }
            Some(Err(e)) => warn!("Namespace watch error: {}", e),
            None => break,
        }
    }

    info!("Namespace watcher stopped");
}
