//! CRD YAML Generator
//!
//! This binary generates the Kubernetes CRD manifest for the ClusterObject
//! resource managed by the object-cloner-operator.
//!
//! Usage: cargo run --bin crdgen > deploy/crds/all.yaml

use object_cloner_operator::crd::generate_crds;

fn main() {
    for crd in generate_crds() {
        println!("---");
        print!("{}", crd);
    }
}
