use super::{FakeCache, FakeWriter, Write};
use crate::{Cache, NetworkPolicyReconciler, ObjectKey, SelectorError, Templates, WorkQueue};
use podguard_policy_controller_core::{InvalidTemplateRef, TemplateRef, UpdateConfig};
use podguard_policy_controller_k8s_api::{
    annotations, GlobalPolicySpec, Namespace, NetworkPolicy, ObjectMeta,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

struct Fixture {
    namespaces: Arc<FakeCache<Namespace>>,
    policies: Arc<FakeCache<NetworkPolicy>>,
    writer: Arc<FakeWriter<NetworkPolicy>>,
}

impl Fixture {
    fn new() -> Self {
        let policies = Arc::new(FakeCache::default());
        Self {
            namespaces: Arc::new(FakeCache::default()),
            writer: Arc::new(FakeWriter::new(policies.clone())),
            policies,
        }
    }

    fn reconciler(&self, selector: &str) -> NetworkPolicyReconciler {
        let reconciler = NetworkPolicyReconciler::new(
            self.namespaces.clone(),
            self.policies.clone(),
            self.writer.clone(),
            templates(),
            vec!["kube-system".to_string()],
        );
        reconciler
            .set_selector(selector)
            .expect("selector must be valid");
        reconciler
    }
}

fn template(ns: &str, name: &str, policy_types: &[&str]) -> NetworkPolicy {
    serde_json::from_value(json!({
        "metadata": {
            "name": name,
            "namespace": ns,
            "labels": { "tier": "base" },
            "resourceVersion": "7",
            "uid": "d9607e19-f88f-11e6-a518-42010a800195",
        },
        "spec": {
            "podSelector": {},
            "policyTypes": policy_types,
        },
    }))
    .expect("template must decode")
}

fn templates() -> Templates {
    [
        (
            TemplateRef::new("podguard", "default-deny"),
            template("podguard", "default-deny", &["Ingress", "Egress"]),
        ),
        (
            TemplateRef::new("podguard", "deny-ingress"),
            template("podguard", "deny-ingress", &["Ingress"]),
        ),
        (
            TemplateRef::new("other", "default-deny"),
            template("other", "default-deny", &["Ingress"]),
        ),
    ]
    .into_iter()
    .collect()
}

fn namespace(name: &str, template: Option<&str>) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            annotations: template.map(|t| {
                [(annotations::NETWORK_POLICY.to_string(), t.to_string())]
                    .into_iter()
                    .collect()
            }),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// The object expected to be written for a template in a namespace.
fn copy(name: &str, ns: &str, policy_types: &[&str]) -> NetworkPolicy {
    serde_json::from_value(json!({
        "metadata": {
            "name": name,
            "namespace": ns,
            "labels": {
                "tier": "base",
                "app.kubernetes.io/managed-by": "podguard",
            },
        },
        "spec": {
            "podSelector": {},
            "policyTypes": policy_types,
        },
    }))
    .expect("policy must decode")
}

#[tokio::test]
async fn namespace_sync_creates_copy_once() {
    let fixture = Fixture::new();
    let reconciler = fixture.reconciler("podguard:default-deny");
    fixture.namespaces.insert(namespace("app", None));

    let key = ObjectKey::cluster("app");
    reconciler
        .sync_namespace(&key)
        .await
        .expect("sync must succeed");
    assert_eq!(
        fixture.writer.take(),
        vec![Write::Create(copy("default-deny", "app", &["Ingress", "Egress"]))]
    );

    reconciler
        .sync_namespace(&key)
        .await
        .expect("sync must succeed");
    assert_eq!(fixture.writer.take(), vec![]);
}

#[tokio::test]
async fn namespace_annotation_selects_template() {
    let fixture = Fixture::new();
    let reconciler = fixture.reconciler("podguard:default-deny");
    fixture
        .namespaces
        .insert(namespace("app", Some("podguard:deny-ingress")));

    reconciler
        .sync_namespace(&ObjectKey::cluster("app"))
        .await
        .expect("sync must succeed");
    assert_eq!(
        fixture.writer.take(),
        vec![Write::Create(copy("deny-ingress", "app", &["Ingress"]))]
    );
}

#[tokio::test]
async fn namespace_sync_skips() {
    let fixture = Fixture::new();
    let reconciler = fixture.reconciler("podguard:default-deny");

    let terminating = serde_json::from_value(json!({
        "metadata": {
            "name": "leaving",
            "deletionTimestamp": "2024-05-01T00:00:00Z",
        },
    }))
    .expect("namespace must decode");
    for ns in [
        namespace("kube-system", None),
        namespace("malformed", Some("deny-ingress")),
        namespace("unknown", Some("podguard:allow-all")),
        terminating,
    ] {
        fixture.namespaces.insert(ns);
    }

    for name in ["kube-system", "malformed", "unknown", "leaving", "missing"] {
        reconciler
            .sync_namespace(&ObjectKey::cluster(name))
            .await
            .expect("skipped namespaces are not errors");
    }
    assert_eq!(fixture.writer.take(), vec![]);
}

#[tokio::test]
async fn no_default_selector() {
    let fixture = Fixture::new();
    let reconciler = fixture.reconciler("");
    fixture.namespaces.insert(namespace("app", None));

    reconciler
        .sync_namespace(&ObjectKey::cluster("app"))
        .await
        .expect("sync must succeed");
    assert_eq!(fixture.writer.take(), vec![]);
}

#[tokio::test]
async fn policy_sync_recreates_deleted_copy() {
    let fixture = Fixture::new();
    let reconciler = fixture.reconciler("podguard:default-deny");
    fixture.namespaces.insert(namespace("app", None));

    let key = ObjectKey::namespaced("app", "default-deny");
    reconciler
        .sync_policy(&key)
        .await
        .expect("sync must succeed");
    assert_eq!(
        fixture.writer.take(),
        vec![Write::Create(copy("default-deny", "app", &["Ingress", "Egress"]))]
    );

    fixture.policies.remove(&key);
    reconciler
        .sync_policy(&key)
        .await
        .expect("sync must succeed");
    assert_eq!(fixture.writer.take().len(), 1);
}

#[tokio::test]
async fn policy_sync_restores_drifted_spec() {
    let fixture = Fixture::new();
    let reconciler = fixture.reconciler("podguard:default-deny");
    fixture.namespaces.insert(namespace("app", None));

    let mut drifted = copy("default-deny", "app", &["Ingress"]);
    drifted.metadata.resource_version = Some("3".to_string());
    fixture.policies.insert(drifted);

    let key = ObjectKey::namespaced("app", "default-deny");
    reconciler
        .sync_policy(&key)
        .await
        .expect("sync must succeed");

    let mut expected = copy("default-deny", "app", &["Ingress", "Egress"]);
    expected.metadata.resource_version = Some("3".to_string());
    assert_eq!(fixture.writer.take(), vec![Write::Replace(expected)]);

    // The restored copy matches its template.
    reconciler
        .sync_policy(&key)
        .await
        .expect("sync must succeed");
    assert_eq!(fixture.writer.take(), vec![]);
}

#[tokio::test]
async fn policy_sync_ignores_unrelated_policies() {
    let fixture = Fixture::new();
    let reconciler = fixture.reconciler("podguard:default-deny");
    fixture.namespaces.insert(namespace("app", None));
    fixture.policies.insert(copy("custom", "app", &["Egress"]));

    reconciler
        .sync_policy(&ObjectKey::namespaced("app", "custom"))
        .await
        .expect("sync must succeed");
    reconciler
        .sync_policy(&ObjectKey::cluster("default-deny"))
        .await
        .expect("sync must succeed");
    assert_eq!(fixture.writer.take(), vec![]);
}

#[tokio::test]
async fn write_failures_are_returned() {
    let fixture = Fixture::new();
    let reconciler = fixture.reconciler("podguard:default-deny");
    fixture.namespaces.insert(namespace("app", None));

    fixture.writer.fail(true);
    let key = ObjectKey::cluster("app");
    assert!(reconciler.sync_namespace(&key).await.is_err());

    fixture.writer.fail(false);
    reconciler
        .sync_namespace(&key)
        .await
        .expect("retry must succeed");
    assert_eq!(fixture.writer.take().len(), 1);
}

#[test]
fn selector_validation() {
    let fixture = Fixture::new();
    let reconciler = fixture.reconciler("podguard:default-deny");
    let default_deny = Some(TemplateRef::new("podguard", "default-deny"));

    assert_eq!(
        reconciler.set_selector("default-deny"),
        Err(SelectorError::Invalid(InvalidTemplateRef(
            "default-deny".to_string()
        )))
    );
    assert_eq!(reconciler.selector(), default_deny);

    assert_eq!(
        reconciler.set_selector("podguard:allow-all"),
        Err(SelectorError::Unknown(TemplateRef::new("podguard", "allow-all")))
    );
    assert_eq!(reconciler.selector(), default_deny);

    reconciler
        .update_config(&GlobalPolicySpec {
            network_policy_selector: "podguard:deny-ingress".to_string(),
            ..Default::default()
        })
        .expect("known template must be accepted");
    assert_eq!(
        reconciler.selector(),
        Some(TemplateRef::new("podguard", "deny-ingress"))
    );

    assert!(reconciler
        .update_config(&GlobalPolicySpec {
            network_policy_selector: "a:b:c".to_string(),
            ..Default::default()
        })
        .is_err());
    assert_eq!(
        reconciler.selector(),
        Some(TemplateRef::new("podguard", "deny-ingress"))
    );
}

#[test]
fn empty_selector_is_the_only_unqualified_selector_accepted() {
    let fixture = Fixture::new();
    let reconciler = fixture.reconciler("podguard:default-deny");

    reconciler.set_selector("").expect("empty selector clears");
    assert_eq!(reconciler.selector(), None);

    for selector in [":", "podguard:", ":default-deny", " "] {
        assert!(
            reconciler.set_selector(selector).is_err(),
            "{selector:?} must be rejected"
        );
        assert_eq!(reconciler.selector(), None);
    }
}

#[test]
fn selector_change_resyncs_namespaces() {
    let fixture = Fixture::new();
    fixture.namespaces.insert(namespace("app", None));
    fixture.namespaces.insert(namespace("web", None));

    let queue = Arc::new(WorkQueue::default());
    let reconciler = NetworkPolicyReconciler::new(
        fixture.namespaces.clone(),
        fixture.policies.clone(),
        fixture.writer.clone(),
        templates(),
        Vec::new(),
    )
    .with_resync(queue.clone());

    reconciler.set_selector("podguard:default-deny").unwrap();
    assert_eq!(queue.len(), 2);

    // Setting the same selector again does not enqueue anything new.
    reconciler.set_selector("podguard:default-deny").unwrap();
    assert_eq!(queue.len(), 2);
}

#[tokio::test]
async fn selector_switch_replaces_copy_with_same_name() {
    let fixture = Fixture::new();
    fixture.namespaces.insert(namespace("app", None));

    let queue = Arc::new(WorkQueue::default());
    let reconciler = NetworkPolicyReconciler::new(
        fixture.namespaces.clone(),
        fixture.policies.clone(),
        fixture.writer.clone(),
        templates(),
        Vec::new(),
    )
    .with_resync(queue.clone());
    let key = ObjectKey::cluster("app");

    reconciler.set_selector("podguard:default-deny").unwrap();
    reconciler
        .sync_namespace(&key)
        .await
        .expect("sync must succeed");
    assert_eq!(
        fixture.writer.take(),
        vec![Write::Create(copy("default-deny", "app", &["Ingress", "Egress"]))]
    );
    let ns = queue.get().await.expect("namespace must be queued");
    queue.done(&ns);

    // The new template has the same name, so only the spec changes.
    reconciler.set_selector("other:default-deny").unwrap();
    let ns = queue.get().await.expect("namespace must be requeued");
    reconciler
        .sync_namespace(&ns.parse().expect("key must parse"))
        .await
        .expect("sync must succeed");
    queue.done(&ns);

    let mut expected = copy("default-deny", "app", &["Ingress"]);
    expected.metadata.resource_version = Some("1".to_string());
    assert_eq!(fixture.writer.take(), vec![Write::Replace(expected)]);

    let live = fixture
        .policies
        .get(&ObjectKey::namespaced("app", "default-deny"))
        .expect("copy must exist");
    let spec = live.spec.as_ref().expect("copy must have a spec");
    assert_eq!(spec.policy_types, Some(vec!["Ingress".to_string()]));
}
