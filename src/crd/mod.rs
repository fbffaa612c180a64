//! Custom Resource Definitions for the Object Cloner Operator

mod cluster_object;

pub use cluster_object::*;

use kube::CustomResourceExt;

/// Generate CRD YAML manifests for all custom resources
pub fn generate_crds() -> Vec<String> {
    vec![serde_yaml::to_string(&ClusterObject::crd()).unwrap()]
}
