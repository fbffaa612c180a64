//! Prometheus metrics for the object cloner operator
//!
//! Exposes reconcile, clone and readiness metrics over HTTP.

pub mod prometheus;

pub use self::prometheus::*;
