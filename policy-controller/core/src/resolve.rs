//! Determines the effective value of each policy dimension for a namespace.

use crate::preset::{InvalidPreset, SecurityContextPreset};
use podguard_policy_controller_k8s_api::{annotations, AutomountMode, GlobalPolicySpec};
use std::{collections::BTreeMap, fmt, str::FromStr};
use tracing::warn;

/// Where an effective policy value came from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Source {
    Namespace,
    ClusterDefault,
}

/// A policy value along with the layer that supplied it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Effective<T> {
    pub value: T,
    pub source: Source,
}

/// Selects how namespace annotations are layered over the global policy.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Strategy {
    /// Namespace annotations override the cluster default, except that
    /// enforcement pins the automount mode to the cluster default.
    #[default]
    Layered,

    /// Namespace annotations are ignored.
    ClusterOnly,
}

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid policy strategy {0:?}; expected 'layered' or 'cluster-only'")]
pub struct InvalidStrategy(pub String);

type Annotations = BTreeMap<String, String>;

// === impl Source ===

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Namespace => "namespace",
            Self::ClusterDefault => "cluster-default",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl Effective ===

impl<T> Effective<T> {
    fn namespace(value: T) -> Self {
        Self {
            value,
            source: Source::Namespace,
        }
    }

    fn cluster(value: T) -> Self {
        Self {
            value,
            source: Source::ClusterDefault,
        }
    }
}

// === impl Strategy ===

impl Strategy {
    pub fn seccomp(&self, ns: &Annotations, policy: &GlobalPolicySpec) -> Effective<String> {
        if let Self::Layered = self {
            if let Some(profile) = ns.get(annotations::SECCOMP_PROFILE) {
                return Effective::namespace(profile.clone());
            }
        }
        Effective::cluster(policy.seccomp_profile.clone())
    }

    /// Unlike the seccomp profile, the automount mode cannot be overridden by
    /// a namespace while the policy is enforced.
    pub fn automount(
        &self,
        ns: &Annotations,
        policy: &GlobalPolicySpec,
    ) -> Effective<AutomountMode> {
        if let Self::Layered = self {
            if !policy.enforcement {
                if let Some(value) = ns.get(annotations::AUTOMOUNT_MODE) {
                    match value.parse() {
                        Ok(mode) => return Effective::namespace(mode),
                        Err(error) => warn!(%error, "Ignoring namespace automount annotation"),
                    }
                }
            }
        }
        Effective::cluster(policy.automount_mode)
    }

    /// The security context preset is only configurable cluster-wide.
    pub fn pod_security_context(
        &self,
        policy: &GlobalPolicySpec,
    ) -> Result<Effective<SecurityContextPreset>, InvalidPreset> {
        let preset = policy.pod_security_context_preset.parse()?;
        Ok(Effective::cluster(preset))
    }
}

impl FromStr for Strategy {
    type Err = InvalidStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "layered" => Ok(Self::Layered),
            "cluster-only" => Ok(Self::ClusterOnly),
            s => Err(InvalidStrategy(s.to_string())),
        }
    }
}
