#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use podguard_policy_controller_admission as admission;
pub use podguard_policy_controller_core as core;
pub use podguard_policy_controller_k8s_api as k8s;
pub use podguard_policy_controller_k8s_reconcile as reconcile;

mod args;
mod bootstrap;
mod templates;
mod webhook;

pub use self::{args::Args, webhook::AdmissionService};
