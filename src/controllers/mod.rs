//! Controllers and watchers feeding cluster events to the dispatcher

pub mod cluster_object_controller;
pub mod dispatcher;
pub mod namespace_watcher;
pub mod source_watcher;

use kube::Client;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::adapters::KubeObjectApi;
use crate::config::OperatorConfig;
use crate::reconcilers::{NamespaceRoster, ObjectIndex};

pub use dispatcher::{ClusterEvent, Dispatcher};
pub use source_watcher::SourceWatchers;

/// Shared context for controllers
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Routes events to the sync engine
    pub dispatcher: Arc<Dispatcher>,
    /// Watchers on source kinds
    pub source_watchers: SourceWatchers,
}

impl Context {
    /// Create a new context
    pub fn new(client: Client, config: &OperatorConfig, shutdown: CancellationToken) -> Arc<Self> {
        let api = Arc::new(KubeObjectApi::new(client.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            api.clone(),
            Arc::new(ObjectIndex::new()),
            Arc::new(NamespaceRoster::new()),
            config.sync,
        ));
        let source_watchers = SourceWatchers::new(
            api,
            dispatcher.clone(),
            config.clone(),
            shutdown,
        );
        Arc::new(Self {
            client,
            dispatcher,
            source_watchers,
        })
    }
}
