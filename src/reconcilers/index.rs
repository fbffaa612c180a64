//! Index from source object identity to the ClusterObjects that clone it

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::crd::SourceObjectRef;
use crate::reconcilers::cloner::{Cloner, ResourceId};

/// Full identity of a namespaced object
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(kind: &SourceObjectRef, namespace: &str, name: &str) -> Self {
        Self {
            group: kind.group.clone(),
            version: kind.version.clone(),
            kind: kind.kind.clone(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Group/version/kind part of the key
    pub fn kind_ref(&self) -> SourceObjectRef {
        SourceObjectRef::new(&self.group, &self.version, &self.kind)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind_ref(), self.namespace, self.name)
    }
}

#[derive(Debug, Default)]
struct IndexState {
    by_key: HashMap<ObjectKey, Vec<Arc<Cloner>>>,
    keys: HashMap<ResourceId, ObjectKey>,
}

impl IndexState {
    fn detach(&mut self, id: &ResourceId) -> Option<Arc<Cloner>> {
        let key = self.keys.remove(id)?;
        let entries = self.by_key.get_mut(&key)?;
        let position = entries.iter().position(|c| &c.id == id)?;
        let removed = entries.remove(position);
        if entries.is_empty() {
            self.by_key.remove(&key);
        }
        Some(removed)
    }
}

/// Shared index of ClusterObjects keyed by their source object.
///
/// Every ClusterObject is indexed under exactly one key; several
/// ClusterObjects may share a key. Updates replace an entry atomically.
#[derive(Debug, Default)]
pub struct ObjectIndex {
    state: RwLock<IndexState>,
}

impl ObjectIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for a ClusterObject, returning its key
    pub fn upsert(&self, cloner: Arc<Cloner>) -> ObjectKey {
        let key = cloner.key();
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.detach(&cloner.id);
        state.keys.insert(cloner.id.clone(), key.clone());
        state.by_key.entry(key.clone()).or_default().push(cloner);
        key
    }

    /// Drop a ClusterObject from the index
    pub fn remove(&self, id: &ResourceId) -> Option<Arc<Cloner>> {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .detach(id)
    }

    /// ClusterObjects whose source object is `key`
    pub fn lookup(&self, key: &ObjectKey) -> Vec<Arc<Cloner>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_key
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// The indexed entry of a ClusterObject
    pub fn get(&self, id: &ResourceId) -> Option<Arc<Cloner>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let key = state.keys.get(id)?;
        state
            .by_key
            .get(key)?
            .iter()
            .find(|c| &c.id == id)
            .cloned()
    }

    /// Every indexed ClusterObject
    pub fn all(&self) -> Vec<Arc<Cloner>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_key
            .values()
            .flatten()
            .cloned()
            .collect()
    }

    /// Number of indexed ClusterObjects
    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
