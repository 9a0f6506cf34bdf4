#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod config;
mod controller;
mod key;
mod metrics;
pub mod network_policy;
mod queue;
mod store;


pub use self::{
    config::ConfigReconciler,
    controller::{enqueue, Controller, Reconcile},
    key::{KeyError, ObjectKey},
    metrics::ControllerMetrics,
    network_policy::{NetworkPolicyReconciler, SelectorError, Templates},
    queue::{Backoff, WorkQueue},
    store::{Cache, ClusterScoped, Namespaced, Writer},
};
