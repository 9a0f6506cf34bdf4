#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod annotations;
pub mod global_policy;

pub use self::global_policy::{AutomountMode, GlobalPolicy, GlobalPolicySpec, InvalidAutomountMode};
pub use k8s_openapi::api::{
    self,
    core::v1::{
        Container, Namespace, Pod, PodSecurityContext, PodSpec, SecurityContext, ServiceAccount,
    },
    networking::v1::{NetworkPolicy, NetworkPolicySpec},
};
pub use kube::{
    api::{Api, ObjectMeta, PostParams, ResourceExt},
    core::NamespaceResourceScope,
    runtime::{reflector, watcher},
    Client, Error, Resource,
};

/// The field manager recorded on every object this controller writes.
pub const FIELD_MANAGER: &str = "podguard.io/policy-controller";

/// Label set on objects created by the reconcilers.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "podguard";
