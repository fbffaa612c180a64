//! Object Cloner Kubernetes Operator
//!
//! Clones a source object into every selected namespace and keeps the clones
//! in sync, driven by `ClusterObject` custom resources.

pub mod adapters;
pub mod config;
pub mod controllers;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod reconcilers;

pub use error::{Error, Result};
