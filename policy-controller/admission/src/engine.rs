use crate::{
    lookup::NamespaceLookup,
    patch,
    request::{Decision, Kind, Mode, Request},
    validate,
};
use podguard_policy_controller_core::{InvalidPreset, Shared, Strategy, UpdateConfig};
use podguard_policy_controller_k8s_api::{
    GlobalPolicySpec, Namespace, Pod, ResourceExt, ServiceAccount,
};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tokio::time;
use tracing::{debug, info, trace};

/// Decides whether pods and service accounts are admitted, and how they are
/// rewritten, according to the global policy and namespace overrides.
pub struct Admission<L> {
    namespaces: L,
    policy: Shared<GlobalPolicySpec>,
    strategy: Strategy,
    lookup_timeout: Duration,
}

/// Reasons a request is denied before policy is evaluated.
#[derive(Debug, Error)]
pub enum Error {
    #[error("admission request missing 'object'")]
    MissingObject,

    #[error("failed to decode {kind}: {source}")]
    Decode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("admission request has no namespace")]
    NamespaceRequired,

    #[error("failed to look up namespace {namespace}: {source}")]
    NamespaceLookup {
        namespace: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("timed out after {timeout:?} looking up namespace {namespace}")]
    NamespaceTimeout {
        namespace: String,
        timeout: Duration,
    },

    #[error("invalid global policy: {0}")]
    Policy(#[from] InvalidPreset),
}

// === impl Admission ===

impl<L: NamespaceLookup> Admission<L> {
    pub fn new(
        namespaces: L,
        policy: GlobalPolicySpec,
        strategy: Strategy,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            namespaces,
            policy: Shared::new(policy),
            strategy,
            lookup_timeout,
        }
    }

    /// Admits a request. Failures to read the object or its namespace deny
    /// the request; unsupported operations and kinds are allowed untouched.
    pub async fn admit(&self, req: &Request, mode: Mode) -> Decision {
        if !req.operation.is_write() {
            trace!(operation = ?req.operation, "Ignoring");
            return Decision::Allow;
        }

        let res = match req.kind {
            Kind::Pod => self.admit_pod(req, mode).await,
            Kind::ServiceAccount => self.admit_service_account(req, mode).await,
            Kind::Unsupported => {
                debug!(name = %req.name, "Ignoring unsupported resource");
                return Decision::Allow;
            }
        };

        match res {
            Ok(decision) => {
                if let Decision::Deny(reason) = &decision {
                    info!(
                        ns = ?req.namespace,
                        name = %req.name,
                        kind = req.kind.as_str(),
                        %reason,
                        "Denied"
                    );
                }
                decision
            }
            Err(error) => {
                info!(
                    %error,
                    ns = ?req.namespace,
                    name = %req.name,
                    kind = req.kind.as_str(),
                    "Denied"
                );
                Decision::Deny(error.to_string())
            }
        }
    }

    async fn admit_pod(&self, req: &Request, mode: Mode) -> Result<Decision, Error> {
        let pod = decode::<Pod>(req)?;
        let ns = self.namespace(req).await?;
        let policy = self.policy.get();

        let seccomp = self.strategy.seccomp(ns.annotations(), &policy);
        let preset = self.strategy.pod_security_context(&policy)?;

        let decision = match mode {
            Mode::Mutate => {
                let mut ops = patch::seccomp(&pod.metadata, &seccomp);
                ops.extend(patch::pod_security_context(&pod, preset.value));
                Decision::patch(ops)
            }
            Mode::Validate => {
                let mut violations = validate::seccomp(&pod.metadata, &seccomp);
                violations.extend(validate::pod_security_context(&pod, preset.value));
                Decision::from_violations(violations)
            }
        };
        Ok(decision)
    }

    async fn admit_service_account(&self, req: &Request, mode: Mode) -> Result<Decision, Error> {
        let mut sa = decode::<ServiceAccount>(req)?;
        // The object may omit its name when the request carries it.
        if sa.metadata.name.is_none() && !req.name.is_empty() {
            sa.metadata.name = Some(req.name.clone());
        }
        let ns = self.namespace(req).await?;
        let policy = self.policy.get();

        let automount = self.strategy.automount(ns.annotations(), &policy);

        let decision = match mode {
            Mode::Mutate => Decision::patch(patch::automount(&sa, &automount)),
            Mode::Validate => Decision::from_violations(validate::automount(&sa, &automount)),
        };
        Ok(decision)
    }

    async fn namespace(&self, req: &Request) -> Result<Namespace, Error> {
        let name = req
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .ok_or(Error::NamespaceRequired)?;

        match time::timeout(self.lookup_timeout, self.namespaces.namespace(name)).await {
            Ok(Ok(ns)) => Ok(ns),
            Ok(Err(source)) => Err(Error::NamespaceLookup {
                namespace: name.to_string(),
                source,
            }),
            Err(_) => Err(Error::NamespaceTimeout {
                namespace: name.to_string(),
                timeout: self.lookup_timeout,
            }),
        }
    }

    /// Returns the policy currently applied to requests.
    pub fn policy(&self) -> std::sync::Arc<GlobalPolicySpec> {
        self.policy.get()
    }
}

impl<L: NamespaceLookup> UpdateConfig for Admission<L> {
    fn update_config(&self, policy: &GlobalPolicySpec) -> anyhow::Result<()> {
        let prior = self.policy.replace(policy.clone());
        if *prior != *policy {
            info!(?policy, "Updated admission policy");
        }
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(req: &Request) -> Result<T, Error> {
    let object = req.object.clone().ok_or(Error::MissingObject)?;
    serde_json::from_value(object).map_err(|source| Error::Decode {
        kind: req.kind.as_str(),
        source,
    })
}
