//! Checks admitted objects against the effective policy.
//!
//! Each check returns human-readable violations; an empty list means the
//! object complies.

use podguard_policy_controller_core::{Effective, SecurityContextPreset};
use podguard_policy_controller_k8s_api::{
    annotations, AutomountMode, Container, ObjectMeta, Pod, ServiceAccount,
};

pub fn seccomp(meta: &ObjectMeta, profile: &Effective<String>) -> Vec<String> {
    if profile.value.is_empty() {
        return vec![];
    }

    let current = meta
        .annotations
        .as_ref()
        .and_then(|a| a.get(annotations::POD_SECCOMP));
    if current == Some(&profile.value) {
        return vec![];
    }

    vec![format!(
        "annotation {} must be set to {:?} (required by {} policy)",
        annotations::POD_SECCOMP,
        profile.value,
        profile.source,
    )]
}

/// Only an undefined automount field violates policy. An explicit value,
/// even `true`, is a deliberate choice and is admitted.
pub fn automount(sa: &ServiceAccount, mode: &Effective<AutomountMode>) -> Vec<String> {
    let name = sa.metadata.name.as_deref().unwrap_or_default();
    if sa.automount_service_account_token.is_some() || !mode.value.applies_to(name) {
        return vec![];
    }

    vec![format!(
        "service account {name:?} must set automountServiceAccountToken \
         (automount mode {} from {} policy)",
        mode.value, mode.source,
    )]
}

pub fn pod_security_context(pod: &Pod, preset: SecurityContextPreset) -> Vec<String> {
    let spec = match (preset, pod.spec.as_ref()) {
        (SecurityContextPreset::Nobody, Some(spec)) => spec,
        _ => return vec![],
    };

    let mut violations = Vec::new();
    let sc = spec.security_context.as_ref();
    if sc.and_then(|sc| sc.run_as_user).is_none() {
        violations.push("spec.securityContext.runAsUser must be set".to_string());
    }
    if sc.and_then(|sc| sc.run_as_group).is_none() {
        violations.push("spec.securityContext.runAsGroup must be set".to_string());
    }
    if sc.and_then(|sc| sc.run_as_non_root).is_none() {
        violations.push("spec.securityContext.runAsNonRoot must be set".to_string());
    }

    let containers = spec
        .init_containers
        .iter()
        .flatten()
        .chain(spec.containers.iter());
    violations.extend(containers.filter(escalation_undefined).map(|c| {
        format!(
            "container {:?} must set securityContext.allowPrivilegeEscalation",
            c.name
        )
    }));

    violations
}

fn escalation_undefined(container: &&Container) -> bool {
    container
        .security_context
        .as_ref()
        .and_then(|sc| sc.allow_privilege_escalation)
        .is_none()
}
