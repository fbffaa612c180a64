//! Target namespace selection and the live namespace roster

use std::collections::BTreeSet;
use std::sync::RwLock;
use std::time::Duration;

use regex::Regex;
use tokio::sync::watch;
use tracing::info;

use crate::{Error, Result};

/// How often a roster wait logs that it is still waiting
const ROSTER_WAIT_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Compiled include/exclude namespace patterns.
///
/// Patterns match from the start of the namespace name but need not match
/// all of it, so `prod` selects `prod-a`.
#[derive(Clone, Debug)]
pub struct NamespaceFilter {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl NamespaceFilter {
    /// Compile include and exclude patterns
    pub fn compile<S: AsRef<str>>(include: &[S], exclude: &[S]) -> Result<Self> {
        Ok(Self {
            include: compile_patterns(include)?,
            exclude: compile_patterns(exclude)?,
        })
    }

    /// Whether `namespace` is a target for a resource living in `own_namespace`
    pub fn selects(&self, namespace: &str, own_namespace: &str) -> bool {
        namespace != own_namespace
            && self.include.iter().any(|p| p.is_match(namespace))
            && !self.exclude.iter().any(|p| p.is_match(namespace))
    }

    /// The subset of `namespaces` targeted by a resource living in `own_namespace`
    pub fn select<'a, I>(&self, namespaces: I, own_namespace: &str) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        namespaces
            .into_iter()
            .filter(|ns| self.selects(ns, own_namespace))
            .map(str::to_string)
            .collect()
    }
}

fn compile_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(&format!("^(?:{})", p.as_ref())).map_err(|e| {
                Error::ValidationError(format!("invalid namespace pattern '{}': {}", p.as_ref(), e))
            })
        })
        .collect()
}

/// Namespaces that appeared or disappeared when the roster was replaced
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RosterChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Live set of cluster namespace names.
///
/// The roster is not ready until the first full listing has been applied.
#[derive(Debug)]
pub struct NamespaceRoster {
    names: RwLock<BTreeSet<String>>,
    ready: watch::Sender<bool>,
}

impl Default for NamespaceRoster {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceRoster {
    pub fn new() -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            names: RwLock::new(BTreeSet::new()),
            ready,
        }
    }

    /// Replace the whole roster with a fresh listing and mark it ready
    pub fn replace<I>(&self, names: I) -> RosterChanges
    where
        I: IntoIterator<Item = String>,
    {
        let fresh: BTreeSet<String> = names.into_iter().collect();
        let changes = match self.names.write() {
            Ok(mut current) => {
                let changes = RosterChanges {
                    added: fresh.difference(&current).cloned().collect(),
                    removed: current.difference(&fresh).cloned().collect(),
                };
                *current = fresh;
                changes
            }
            Err(_) => RosterChanges::default(),
        };
        self.ready.send_replace(true);
        changes
    }

    /// Add a namespace, returning whether it was not known before
    pub fn insert(&self, name: &str) -> bool {
        self.names
            .write()
            .map(|mut names| names.insert(name.to_string()))
            .unwrap_or(false)
    }

    /// Remove a namespace, returning whether it was known
    pub fn remove(&self, name: &str) -> bool {
        self.names
            .write()
            .map(|mut names| names.remove(name))
            .unwrap_or(false)
    }

    /// Snapshot of the current namespace names
    pub fn names(&self) -> BTreeSet<String> {
        self.names
            .read()
            .map(|names| names.clone())
            .unwrap_or_default()
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Wait until the first full listing has been applied
    pub async fn wait_until_ready(&self) {
        let mut ready = self.ready.subscribe();
        loop {
            match tokio::time::timeout(ROSTER_WAIT_LOG_INTERVAL, ready.wait_for(|r| *r)).await {
                Ok(_) => return,
                Err(_) => info!("Namespace roster has not been populated yet, waiting"),
            }
        }
    }
}
