//! Sync engine: clones a source object into its target namespaces
//!
//! A sync runs in two passes. The diff pass reads the source and every
//! target and classifies each namespace; the mutation pass then creates,
//! patches or recreates clones. No write happens before every read is done.

use std::collections::BTreeSet;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::adapters::object_api::{object_name, set_namespace, ObjectApi};
use crate::config::SyncSettings;
use crate::crd::UpdateStrategy;
use crate::metrics::prometheus::CLONE_OPERATIONS;
use crate::reconcilers::cloner::Cloner;
use crate::reconcilers::fields::{deep_merge, diff_paths};
use crate::reconcilers::status::StatusRecorder;
use crate::{Error, Result};

/// What the diff pass decided for one namespace
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Classification {
    /// No clone exists yet
    Create,
    /// The clone differs from the source
    Update,
    /// The clone matches the source
    InSync,
}

/// Classify a namespace given the normalized source and the normalized clone found there
pub fn classify(normalized_source: &Value, normalized_target: Option<&Value>) -> Classification {
    match normalized_target {
        None => Classification::Create,
        Some(target) if target == normalized_source => Classification::InSync,
        Some(_) => Classification::Update,
    }
}

/// Result of bringing one differing clone in sync
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchOutcome {
    /// Merged and written in place
    Patched,
    /// The merge left the clone as it was, nothing written
    Unchanged,
    /// Deleted and created again
    Recreated,
    /// Clone disappeared before the patch and was created
    Created,
    /// The patch was rejected and recreation is disabled
    Skipped,
}

/// Namespaces to mutate, as decided by the diff pass
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub create: Vec<String>,
    pub update: Vec<String>,
}

/// Drives clone creation, update and recreation for one ClusterObject at a time
pub struct SyncEngine<'a> {
    api: &'a dyn ObjectApi,
    settings: SyncSettings,
}

impl<'a> SyncEngine<'a> {
    pub fn new(api: &'a dyn ObjectApi, settings: SyncSettings) -> Self {
        Self { api, settings }
    }

    /// Sync `cloner` into the namespaces it selects out of `namespaces`, or only
    /// into `target` when given. Returns whether any sync activity took place.
    pub async fn sync(
        &self,
        cloner: &Cloner,
        namespaces: &BTreeSet<String>,
        target: Option<&str>,
    ) -> Result<bool> {
        let mut targets = cloner.target_namespaces(namespaces.iter().map(String::as_str));
        if let Some(namespace) = target {
            if !targets.contains(namespace) {
                debug!("Namespace {} is not a target of {}", namespace, cloner.id);
                return Ok(false);
            }
            targets = BTreeSet::from([namespace.to_string()]);
        }

        let Some(mut source) = self
            .api
            .get(&cloner.source, &cloner.id.namespace, &cloner.id.name)
            .await?
        else {
            info!(
                "Cannot sync {}: source object {} {} is not found",
                cloner.id, cloner.source, cloner.id
            );
            return Ok(false);
        };
        cloner.normalize(&mut source);

        let plan = self.plan(cloner, &source, &targets).await?;
        debug!(
            "Sync plan for {}: create {:?}, update {:?}",
            cloner.id, plan.create, plan.update
        );

        let mut updated = Vec::new();
        let applied = self.apply(cloner, &source, &plan, &mut updated).await;
        let recorded = StatusRecorder::new(self.api, self.settings.retry)
            .record_synced(&cloner.id, &updated)
            .await;
        applied?;
        recorded?;
        Ok(true)
    }

    /// Diff pass: classify every target namespace
    pub async fn plan(
        &self,
        cloner: &Cloner,
        normalized_source: &Value,
        targets: &BTreeSet<String>,
    ) -> Result<SyncPlan> {
        let mut plan = SyncPlan::default();
        for namespace in targets {
            let mut existing = self
                .api
                .get(&cloner.source, namespace, &cloner.id.name)
                .await?;
            if let Some(target) = existing.as_mut() {
                cloner.normalize(target);
                let differences = diff_paths(normalized_source, target);
                if !differences.is_empty() {
                    info!(
                        "{} in {} and {} differ at {:?}",
                        cloner.id.name, cloner.id.namespace, namespace, differences
                    );
                }
            }
            match classify(normalized_source, existing.as_ref()) {
                Classification::Create => plan.create.push(namespace.clone()),
                Classification::Update => plan.update.push(namespace.clone()),
                Classification::InSync => {}
            }
        }
        Ok(plan)
    }

    /// Mutation pass. Namespaces completed before any failure are pushed to `updated`.
    async fn apply(
        &self,
        cloner: &Cloner,
        source: &Value,
        plan: &SyncPlan,
        updated: &mut Vec<String>,
    ) -> Result<()> {
        for namespace in &plan.create {
            self.create_clone(cloner, namespace, source).await?;
            updated.push(namespace.clone());
        }

        for namespace in &plan.update {
            let outcome = if cloner.update_strategy == UpdateStrategy::AlwaysRecreate {
                self.recreate_clone(cloner, namespace, &cloner.id.name, source)
                    .await?;
                PatchOutcome::Recreated
            } else {
                self.patch_clone(cloner, namespace, source).await?
            };
            if !matches!(outcome, PatchOutcome::Skipped | PatchOutcome::Unchanged) {
                updated.push(namespace.clone());
            }
        }
        Ok(())
    }

    async fn create_clone(&self, cloner: &Cloner, namespace: &str, source: &Value) -> Result<()> {
        let mut object = source.clone();
        set_namespace(&mut object, namespace);
        self.api.create(&cloner.source, namespace, &object).await?;
        CLONE_OPERATIONS.with_label_values(&["create"]).inc();
        info!("Created {} {}/{}", cloner.source, namespace, cloner.id.name);
        Ok(())
    }

    async fn recreate_clone(
        &self,
        cloner: &Cloner,
        namespace: &str,
        name: &str,
        source: &Value,
    ) -> Result<()> {
        if !self.api.delete(&cloner.source, namespace, name).await? {
            debug!(
                "{} {}/{} was already gone before recreation",
                cloner.source, namespace, name
            );
        }
        CLONE_OPERATIONS.with_label_values(&["delete"]).inc();
        self.create_clone(cloner, namespace, source).await?;
        CLONE_OPERATIONS.with_label_values(&["recreate"]).inc();
        Ok(())
    }

    /// Merge the source into the live clone and write it back, retrying on conflicts
    async fn patch_clone(
        &self,
        cloner: &Cloner,
        namespace: &str,
        source: &Value,
    ) -> Result<PatchOutcome> {
        let attempts = self.settings.retry.attempts;

        for attempt in 1..=attempts {
            let Some(live) = self
                .api
                .get(&cloner.source, namespace, &cloner.id.name)
                .await?
            else {
                info!(
                    "{} {}/{} disappeared before patching, creating it",
                    cloner.source, namespace, cloner.id.name
                );
                self.create_clone(cloner, namespace, source).await?;
                return Ok(PatchOutcome::Created);
            };
            let mut merged = live.clone();
            deep_merge(&mut merged, source);
            set_namespace(&mut merged, namespace);
            if merged == live {
                // Only fields the source lacks differ; writing would change nothing
                debug!(
                    "{} {}/{} already carries every source field",
                    cloner.source, namespace, cloner.id.name
                );
                return Ok(PatchOutcome::Unchanged);
            }

            match self.api.update(&cloner.source, namespace, &merged).await {
                Ok(_) => {
                    CLONE_OPERATIONS.with_label_values(&["patch"]).inc();
                    info!("Patched {} {}/{}", cloner.source, namespace, cloner.id.name);
                    return Ok(PatchOutcome::Patched);
                }
                Err(e) if e.is_conflict() => {
                    warn!(
                        "Update conflict for {} {}/{} (attempt {}/{}): {}. Retrying...",
                        cloner.source, namespace, cloner.id.name, attempt, attempts, e
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.settings.retry.delay).await;
                    }
                }
                Err(e) if e.is_invalid() => {
                    if cloner.update_strategy == UpdateStrategy::NeverRecreate {
                        info!(
                            "Cannot update {} {}/{} and recreation is disabled: {}",
                            cloner.source, namespace, cloner.id.name, e
                        );
                        return Ok(PatchOutcome::Skipped);
                    }
                    info!(
                        "Update of {} {}/{} was rejected ({}), recreating it",
                        cloner.source, namespace, cloner.id.name, e
                    );
                    let name = object_name(&merged).unwrap_or(&cloner.id.name);
                    self.recreate_clone(cloner, namespace, name, source).await?;
                    return Ok(PatchOutcome::Recreated);
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::RetriesExhausted {
            target: format!("{} {}/{}", cloner.source, namespace, cloner.id.name),
            attempts,
        })
    }
}
