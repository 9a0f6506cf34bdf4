//! Maintains a default network policy in each namespace.
//!
//! Each namespace receives a copy of a named template, chosen by the
//! namespace's `podguard.io/network-policy` annotation or, failing that, by
//! the global policy's selector. Copies that are deleted or drift from their
//! template are restored.

use crate::{Cache, ObjectKey, Reconcile, WorkQueue, Writer};
use anyhow::Result;
use podguard_policy_controller_core::{InvalidTemplateRef, Shared, TemplateRef, UpdateConfig};
use podguard_policy_controller_k8s_api::{
    annotations, GlobalPolicySpec, Namespace, NetworkPolicy, ObjectMeta, ResourceExt,
    MANAGED_BY, MANAGED_BY_LABEL,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};
use tracing::{debug, info, warn};

/// Network policy templates, keyed by `<namespace>:<name>`.
pub type Templates = BTreeMap<TemplateRef, NetworkPolicy>;

pub struct NetworkPolicyReconciler {
    namespaces: Arc<dyn Cache<Namespace>>,
    policies: Arc<dyn Cache<NetworkPolicy>>,
    writer: Arc<dyn Writer<NetworkPolicy>>,
    templates: Arc<Templates>,
    excluded: BTreeSet<String>,
    selector: Shared<Option<TemplateRef>>,
    resync: Option<Arc<WorkQueue<String>>>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error(transparent)]
    Invalid(#[from] InvalidTemplateRef),

    #[error("network policy template {0} is not loaded")]
    Unknown(TemplateRef),
}

/// Reconciles namespace keys.
pub struct NamespaceSync(pub Arc<NetworkPolicyReconciler>);

/// Reconciles network policy keys.
pub struct PolicySync(pub Arc<NetworkPolicyReconciler>);

// === impl NetworkPolicyReconciler ===

impl NetworkPolicyReconciler {
    pub fn new(
        namespaces: Arc<dyn Cache<Namespace>>,
        policies: Arc<dyn Cache<NetworkPolicy>>,
        writer: Arc<dyn Writer<NetworkPolicy>>,
        templates: Templates,
        excluded: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            namespaces,
            policies,
            writer,
            templates: Arc::new(templates),
            excluded: excluded.into_iter().collect(),
            selector: Shared::new(None),
            resync: None,
        }
    }

    /// Namespaces are enqueued on this queue whenever the default selector
    /// changes.
    pub fn with_resync(mut self, queue: Arc<WorkQueue<String>>) -> Self {
        self.resync = Some(queue);
        self
    }

    pub fn selector(&self) -> Option<TemplateRef> {
        (*self.selector.get()).clone()
    }

    /// Sets the default template.
    ///
    /// A non-empty selector must be `<namespace>:<name>` and name a loaded
    /// template. The empty string is the one exception: it clears the
    /// default, so that a global policy without a selector disables default
    /// network policies.
    pub fn set_selector(&self, selector: &str) -> Result<(), SelectorError> {
        let selector = if selector.is_empty() {
            None
        } else {
            let tref = selector.parse::<TemplateRef>()?;
            if !self.templates.contains_key(&tref) {
                return Err(SelectorError::Unknown(tref));
            }
            Some(tref)
        };

        let prior = self.selector.replace(selector.clone());
        if *prior != selector {
            info!(
                selector = ?selector.as_ref().map(ToString::to_string),
                "Updated default network policy"
            );
            if let Some(queue) = self.resync.as_ref() {
                for ns in self.namespaces.list() {
                    queue.add(ns.name_any());
                }
            }
        }
        Ok(())
    }

    /// Ensures the namespace has its copy of the selected template.
    pub async fn sync_namespace(&self, key: &ObjectKey) -> Result<()> {
        let ns = match self.namespace(&key.name) {
            Some(ns) => ns,
            None => return Ok(()),
        };
        let (tref, template) = match self.template_for(&ns) {
            Some(template) => template,
            None => return Ok(()),
        };

        let policy_key = ObjectKey::namespaced(&key.name, &tref.name);
        self.ensure_copy(&policy_key, &tref, template).await
    }

    /// Restores a namespace's copy of its template if it was deleted or
    /// modified. Policies that are not copies of the namespace's template are
    /// ignored.
    pub async fn sync_policy(&self, key: &ObjectKey) -> Result<()> {
        let ns_name = match key.namespace.as_deref() {
            Some(ns) => ns,
            None => return Ok(()),
        };
        let ns = match self.namespace(ns_name) {
            Some(ns) => ns,
            None => return Ok(()),
        };
        let (tref, template) = match self.template_for(&ns) {
            Some(template) => template,
            None => return Ok(()),
        };
        if key.name != tref.name {
            return Ok(());
        }

        self.ensure_copy(key, &tref, template).await
    }

    /// Creates the namespace's copy of `template` if it is missing, or
    /// replaces it if its spec differs from the template's.
    async fn ensure_copy(
        &self,
        key: &ObjectKey,
        tref: &TemplateRef,
        template: &NetworkPolicy,
    ) -> Result<()> {
        let ns = match key.namespace.as_deref() {
            Some(ns) => ns,
            None => return Ok(()),
        };

        let live = match self.policies.get(key) {
            Some(live) => live,
            None => {
                info!(%key, template = %tref, "Creating network policy");
                self.writer.create(&instantiate(template, ns)).await?;
                return Ok(());
            }
        };

        if serde_json::to_vec(&live.spec)? == serde_json::to_vec(&template.spec)? {
            return Ok(());
        }

        info!(%key, template = %tref, "Restoring modified network policy");
        let mut desired = instantiate(template, ns);
        desired.metadata.resource_version = live.resource_version();
        self.writer.replace(&desired).await?;
        Ok(())
    }

    /// Returns the namespace if it is cached, not excluded, and not being
    /// deleted.
    fn namespace(&self, name: &str) -> Option<Arc<Namespace>> {
        if self.excluded.contains(name) {
            debug!(ns = %name, "Namespace excluded");
            return None;
        }
        let ns = self.namespaces.get(&ObjectKey::cluster(name))?;
        if ns.metadata.deletion_timestamp.is_some() {
            debug!(ns = %name, "Namespace terminating");
            return None;
        }
        Some(ns)
    }

    fn template_for(&self, ns: &Namespace) -> Option<(TemplateRef, &NetworkPolicy)> {
        let tref = match ns.annotations().get(annotations::NETWORK_POLICY) {
            Some(value) => match value.parse::<TemplateRef>() {
                Ok(tref) => tref,
                Err(error) => {
                    warn!(ns = %ns.name_any(), %error, "Ignoring network policy annotation");
                    return None;
                }
            },
            None => self.selector()?,
        };

        match self.templates.get(&tref) {
            Some(template) => Some((tref, template)),
            None => {
                warn!(ns = %ns.name_any(), template = %tref, "Unknown network policy template");
                None
            }
        }
    }
}

impl UpdateConfig for NetworkPolicyReconciler {
    fn update_config(&self, policy: &GlobalPolicySpec) -> Result<()> {
        self.set_selector(&policy.network_policy_selector)?;
        Ok(())
    }
}

/// Copies a template into a namespace, dropping all server-assigned metadata.
fn instantiate(template: &NetworkPolicy, namespace: &str) -> NetworkPolicy {
    let mut labels = template.labels().clone();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
    NetworkPolicy {
        metadata: ObjectMeta {
            name: template.metadata.name.clone(),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            annotations: template.metadata.annotations.clone(),
            ..Default::default()
        },
        spec: template.spec.clone(),
        ..Default::default()
    }
}

// === impl NamespaceSync ===

#[async_trait::async_trait]
impl Reconcile for NamespaceSync {
    async fn reconcile(&self, key: &ObjectKey) -> Result<()> {
        self.0.sync_namespace(key).await
    }
}

// === impl PolicySync ===

#[async_trait::async_trait]
impl Reconcile for PolicySync {
    async fn reconcile(&self, key: &ObjectKey) -> Result<()> {
        self.0.sync_policy(key).await
    }
}
