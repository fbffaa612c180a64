//! Cloning logic, independent of how events reach it

pub mod cleanup;
pub mod cloner;
pub mod fields;
pub mod index;
pub mod namespaces;
pub mod status;
pub mod sync;

pub use cloner::{Cloner, ResourceId};
pub use index::{ObjectIndex, ObjectKey};
pub use namespaces::{NamespaceFilter, NamespaceRoster};
pub use status::StatusRecorder;
pub use sync::SyncEngine;
