//! Adapters between the operator core and the Kubernetes API

pub mod object_api;

pub use object_api::{KubeObjectApi, ObjectApi};
