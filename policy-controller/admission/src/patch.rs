//! Builds the JSON patches applied by the mutating webhook.
//!
//! Patches only ever add values that are missing. Values already present on
//! an object, even when they disagree with policy, are left to the
//! validating webhook.

use json_patch::{AddOperation, PatchOperation};
use jsonptr::PointerBuf;
use podguard_policy_controller_core::{preset::NOBODY, Effective, SecurityContextPreset};
use podguard_policy_controller_k8s_api::{
    annotations, AutomountMode, Container, ObjectMeta, Pod, ServiceAccount,
};
use serde_json::{json, Value};
use tracing::debug;

/// Adds the seccomp annotation when a profile is required and the pod does
/// not carry one.
pub fn seccomp(meta: &ObjectMeta, profile: &Effective<String>) -> Vec<PatchOperation> {
    if profile.value.is_empty() || has_annotation(meta, annotations::POD_SECCOMP) {
        return vec![];
    }

    debug!(profile = %profile.value, source = %profile.source, "Adding seccomp annotation");
    let op = add_annotation(meta, annotations::POD_SECCOMP, &profile.value);
    vec![op]
}

/// Disables token automounting on service accounts that leave it undefined.
///
/// The field patch is followed by an annotation recording which policy
/// caused it.
pub fn automount(sa: &ServiceAccount, mode: &Effective<AutomountMode>) -> Vec<PatchOperation> {
    let name = sa.metadata.name.as_deref().unwrap_or_default();
    if sa.automount_service_account_token.is_some() || !mode.value.applies_to(name) {
        return vec![];
    }

    debug!(mode = %mode.value, source = %mode.source, "Disabling token automount");
    let provenance = format!("{}/{}", mode.source, mode.value);
    vec![
        add(&["automountServiceAccountToken"], Value::Bool(false)),
        add_annotation(&sa.metadata, annotations::AUTOMOUNT_PROVENANCE, &provenance),
    ]
}

/// Fills in the pod and container security context fields the preset
/// requires.
pub fn pod_security_context(pod: &Pod, preset: SecurityContextPreset) -> Vec<PatchOperation> {
    let spec = match (preset, pod.spec.as_ref()) {
        (SecurityContextPreset::Nobody, Some(spec)) => spec,
        _ => return vec![],
    };

    let mut ops = Vec::new();
    match spec.security_context.as_ref() {
        None => ops.push(add(
            &["spec", "securityContext"],
            json!({
                "runAsUser": NOBODY,
                "runAsGroup": NOBODY,
                "runAsNonRoot": true,
            }),
        )),
        Some(sc) => {
            let mut set = |field: &str, value: Value| {
                ops.push(add(&["spec", "securityContext", field], value));
            };
            if sc.run_as_user.is_none() {
                set("runAsUser", json!(NOBODY));
            }
            if sc.run_as_group.is_none() {
                set("runAsGroup", json!(NOBODY));
            }
            if sc.run_as_non_root.is_none() {
                set("runAsNonRoot", Value::Bool(true));
            }
        }
    }

    if let Some(init) = spec.init_containers.as_ref() {
        disallow_privilege_escalation(&mut ops, "initContainers", init);
    }
    disallow_privilege_escalation(&mut ops, "containers", &spec.containers);

    ops
}

fn disallow_privilege_escalation(
    ops: &mut Vec<PatchOperation>,
    field: &str,
    containers: &[Container],
) {
    for (i, container) in containers.iter().enumerate() {
        let idx = i.to_string();
        match container.security_context.as_ref() {
            None => ops.push(add(
                &["spec", field, &idx, "securityContext"],
                json!({ "allowPrivilegeEscalation": false }),
            )),
            Some(sc) if sc.allow_privilege_escalation.is_none() => ops.push(add(
                &["spec", field, &idx, "securityContext", "allowPrivilegeEscalation"],
                Value::Bool(false),
            )),
            Some(_) => {}
        }
    }
}

fn has_annotation(meta: &ObjectMeta, key: &str) -> bool {
    meta.annotations
        .as_ref()
        .is_some_and(|annotations| annotations.contains_key(key))
}

/// Adds a single annotation. When the object has no annotations the whole map
/// is added, since a JSON patch cannot add a key to a missing parent.
fn add_annotation(meta: &ObjectMeta, key: &str, value: &str) -> PatchOperation {
    let value = Value::String(value.to_string());
    match meta.annotations.as_ref() {
        Some(annotations) if !annotations.is_empty() => {
            add(&["metadata", "annotations", key], value)
        }
        _ => add(
            &["metadata", "annotations"],
            Value::Object([(key.to_string(), value)].into_iter().collect()),
        ),
    }
}

fn add(path: &[&str], value: Value) -> PatchOperation {
    PatchOperation::Add(AddOperation {
        path: PointerBuf::from_tokens(path.iter().copied()),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use podguard_policy_controller_core::Source;
    use pretty_assertions::assert_eq;

    fn to_json(ops: Vec<PatchOperation>) -> Value {
        serde_json::to_value(json_patch::Patch(ops)).unwrap()
    }

    fn namespace<T>(value: T) -> Effective<T> {
        Effective {
            value,
            source: Source::Namespace,
        }
    }

    fn meta(annotations: Option<Vec<(&str, &str)>>) -> ObjectMeta {
        ObjectMeta {
            name: Some("pod-0".to_string()),
            annotations: annotations.map(|a| {
                a.into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn seccomp_creates_annotations_map() {
        let ops = seccomp(&meta(None), &namespace("runtime/default".to_string()));
        assert_eq!(
            to_json(ops),
            json!([{
                "op": "add",
                "path": "/metadata/annotations",
                "value": { "seccomp.security.alpha.kubernetes.io/pod": "runtime/default" },
            }])
        );

        // An empty map is treated the same as a missing one.
        let profile = namespace("runtime/default".to_string());
        let ops = seccomp(&meta(Some(vec![])), &profile);
        assert_eq!(to_json(ops)[0]["path"], "/metadata/annotations");
    }

    #[test]
    fn seccomp_escapes_annotation_key() {
        let ops = seccomp(
            &meta(Some(vec![("app", "web")])),
            &namespace("runtime/default".to_string()),
        );
        assert_eq!(
            to_json(ops),
            json!([{
                "op": "add",
                "path": "/metadata/annotations/seccomp.security.alpha.kubernetes.io~1pod",
                "value": "runtime/default",
            }])
        );
    }

    #[test]
    fn seccomp_never_rewrites_existing_annotation() {
        let ops = seccomp(
            &meta(Some(vec![(annotations::POD_SECCOMP, "unconfined")])),
            &namespace("runtime/default".to_string()),
        );
        assert!(ops.is_empty());
    }

    #[test]
    fn seccomp_empty_profile_is_noop() {
        assert!(seccomp(&meta(None), &namespace(String::new())).is_empty());
    }

    fn service_account(name: &str, automount: Option<bool>) -> ServiceAccount {
        ServiceAccount {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            automount_service_account_token: automount,
            ..Default::default()
        }
    }

    #[test]
    fn automount_change_all_patches_field_then_annotation() {
        let ops = automount(
            &service_account("special-service-account", None),
            &namespace(AutomountMode::ChangeAll),
        );
        assert_eq!(
            to_json(ops),
            json!([
                {
                    "op": "add",
                    "path": "/automountServiceAccountToken",
                    "value": false,
                },
                {
                    "op": "add",
                    "path": "/metadata/annotations",
                    "value": { "podguard.io/automount": "namespace/change-all" },
                },
            ])
        );
    }

    #[test]
    fn automount_change_default_only_patches_default() {
        let mode = Effective {
            value: AutomountMode::ChangeDefault,
            source: Source::ClusterDefault,
        };
        let ops = automount(&service_account("builder", None), &mode);
        assert!(ops.is_empty());

        let ops = automount(&service_account("default", None), &mode);
        assert_eq!(
            to_json(ops)[1]["value"],
            json!({ "podguard.io/automount": "cluster-default/change-default" })
        );
    }

    #[test]
    fn automount_respects_explicit_values() {
        for explicit in [true, false] {
            let ops = automount(
                &service_account("default", Some(explicit)),
                &namespace(AutomountMode::ChangeAll),
            );
            assert!(ops.is_empty());
        }
    }

    #[test]
    fn automount_no_change_is_noop() {
        let ops = automount(
            &service_account("default", None),
            &namespace(AutomountMode::NoChange),
        );
        assert!(ops.is_empty());
    }

    fn pod(value: Value) -> Pod {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn nobody_preset_fills_missing_contexts() {
        let pod = pod(json!({
            "metadata": { "name": "pod-0" },
            "spec": {
                "initContainers": [{ "name": "init" }],
                "containers": [
                    { "name": "app" },
                    { "name": "sidecar", "securityContext": { "privileged": false } },
                    { "name": "pinned", "securityContext": { "allowPrivilegeEscalation": true } },
                ],
            },
        }));
        assert_eq!(
            to_json(pod_security_context(&pod, SecurityContextPreset::Nobody)),
            json!([
                {
                    "op": "add",
                    "path": "/spec/securityContext",
                    "value": { "runAsUser": 65534, "runAsGroup": 65534, "runAsNonRoot": true },
                },
                {
                    "op": "add",
                    "path": "/spec/initContainers/0/securityContext",
                    "value": { "allowPrivilegeEscalation": false },
                },
                {
                    "op": "add",
                    "path": "/spec/containers/0/securityContext",
                    "value": { "allowPrivilegeEscalation": false },
                },
                {
                    "op": "add",
                    "path": "/spec/containers/1/securityContext/allowPrivilegeEscalation",
                    "value": false,
                },
            ])
        );
    }

    #[test]
    fn nobody_preset_keeps_explicit_pod_fields() {
        let pod = pod(json!({
            "metadata": { "name": "pod-0" },
            "spec": {
                "securityContext": { "runAsUser": 1000 },
                "containers": [
                    { "name": "app", "securityContext": { "allowPrivilegeEscalation": false } },
                ],
            },
        }));
        assert_eq!(
            to_json(pod_security_context(&pod, SecurityContextPreset::Nobody)),
            json!([
                {
                    "op": "add",
                    "path": "/spec/securityContext/runAsGroup",
                    "value": 65534,
                },
                {
                    "op": "add",
                    "path": "/spec/securityContext/runAsNonRoot",
                    "value": true,
                },
            ])
        );
    }

    #[test]
    fn no_preset_is_noop() {
        let pod = pod(json!({
            "metadata": { "name": "pod-0" },
            "spec": { "containers": [{ "name": "app" }] },
        }));
        let ops = pod_security_context(&pod, SecurityContextPreset::None);
        assert!(ops.is_empty());
    }
}
