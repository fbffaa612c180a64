//! Controller for ClusterObject resources

use futures::StreamExt;
use kube::{
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event},
        watcher::Config,
    },
    Api, ResourceExt,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

use crate::controllers::dispatcher::ClusterEvent;
use crate::controllers::Context;
use crate::crd::ClusterObject;
use crate::metrics::prometheus::{RECONCILE_DURATION, RECONCILIATIONS, RECONCILIATION_ERRORS};
use crate::Error;

/// Finalizer guarding clone cleanup
pub const FINALIZER: &str = "object-cloner.ideamix.es/finalizer";

/// Run the ClusterObject controller
pub async fn run(ctx: Arc<Context>) {
    let client = ctx.client.clone();
    let cluster_objects: Api<ClusterObject> = Api::all(client);

    info!("Starting ClusterObject controller");

    Controller::new(cluster_objects, Config::default().any_semantic())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok(o) => info!("Reconciled {:?}", o),
                Err(e) => error!("Reconcile failed: {:?}", e),
            }
        })
        .await;

    info!("ClusterObject controller stopped");
}

/// Reconcile a ClusterObject
#[instrument(skip(resource, ctx), fields(name = %resource.name_any(), namespace = resource.namespace().unwrap_or_default()))]
async fn reconcile(resource: Arc<ClusterObject>, ctx: Arc<Context>) -> Result<Action, Error> {
    let start = std::time::Instant::now();
    let ns = resource.namespace().unwrap_or_default();
    let name = resource.name_any();

    RECONCILIATIONS.with_label_values(&["ClusterObject"]).inc();

    let cluster_objects: Api<ClusterObject> = Api::namespaced(ctx.client.clone(), &ns);

    let result = finalizer(&cluster_objects, FINALIZER, resource, |event| async {
        match event {
            Event::Apply(resource) => apply(&resource, &ctx).await,
            Event::Cleanup(resource) => cleanup(&resource, &ctx).await,
        }
    })
    .await;

    let duration = start.elapsed().as_secs_f64();
    RECONCILE_DURATION
        .with_label_values(&["ClusterObject"])
        .observe(duration);

    match &result {
        Ok(_) => info!("Successfully reconciled {}/{} in {:.2}s", ns, name, duration),
        Err(e) => {
            RECONCILIATION_ERRORS
                .with_label_values(&["ClusterObject"])
                .inc();
            error!("Failed to reconcile {}/{}: {:?}", ns, name, e);
        }
    }

    Ok(result?)
}

/// Index the ClusterObject, sync it and make sure its source kind is watched
async fn apply(resource: &ClusterObject, ctx: &Context) -> Result<Action, Error> {
    info!(
        "Applying ClusterObject {}/{}",
        resource.namespace().unwrap_or_default(),
        resource.name_any()
    );

    ctx.dispatcher
        .dispatch(ClusterEvent::ClusterObjectApplied(resource.clone()))
        .await?;
    ctx.source_watchers
        .ensure(&resource.spec.source_object)
        .await?;

    // Source and namespace changes arrive through the watchers
    Ok(Action::await_change())
}

/// Unindex the ClusterObject and delete its clones if it asks for that
async fn cleanup(resource: &ClusterObject, ctx: &Context) -> Result<Action, Error> {
    info!(
        "Cleaning up ClusterObject {}/{}",
        resource.namespace().unwrap_or_default(),
        resource.name_any()
    );

    if let Err(e) = ctx
        .dispatcher
        .dispatch(ClusterEvent::ClusterObjectDeleted(resource.clone()))
        .await
    {
        // Validation errors are permanent and must not block the deletion
        match e {
            Error::ValidationError(_) => warn!("Skipping clone cleanup: {}", e),
            e => return Err(e),
        }
    }

    Ok(Action::await_change())
}

/// Error policy for the controller
fn error_policy(resource: Arc<ClusterObject>, err: &Error, _ctx: Arc<Context>) -> Action {
    let ns = resource.namespace().unwrap_or_default();
    let name = resource.name_any();

    error!("Reconciliation error for {}/{}: {:?}", ns, name, err);

    match err {
        Error::KubeError(_) | Error::Conflict(_) | Error::RetriesExhausted { .. } => {
            Action::requeue(Duration::from_secs(30))
        }
        Error::ConfigError(_) | Error::ValidationError(_) => {
            Action::requeue(Duration::from_secs(300))
        }
        _ => Action::requeue(Duration::from_secs(60)),
    }
}
