use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// The cluster-wide security policy. Exactly one instance is honored; its
/// name is fixed when the controller starts.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "podguard.io",
    version = "v1alpha1",
    kind = "GlobalPolicy",
    shortname = "gpol",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct GlobalPolicySpec {
    #[serde(default)]
    pub automount_mode: AutomountMode,

    /// The seccomp profile required on pods. Empty disables enforcement.
    #[serde(default)]
    pub seccomp_profile: String,

    /// Named pod security context preset. Empty disables defaulting.
    #[serde(default)]
    pub pod_security_context_preset: String,

    /// Default network policy template, as `<namespace>:<name>`.
    #[serde(default)]
    pub network_policy_selector: String,

    /// When set, namespaces may not override the automount mode.
    #[serde(default)]
    pub enforcement: bool,
}

/// Controls when service accounts have token automounting disabled.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum AutomountMode {
    #[default]
    #[serde(rename = "no-change")]
    NoChange,

    /// Only the `default` service account is changed.
    #[serde(rename = "change-default")]
    ChangeDefault,

    /// Every service account is changed.
    #[serde(rename = "change-all")]
    ChangeAll,
}

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
#[error(
    "invalid automount mode {0:?}; expected one of 'no-change', 'change-default', or 'change-all'"
)]
pub struct InvalidAutomountMode(pub String);

// === impl AutomountMode ===

impl AutomountMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoChange => "no-change",
            Self::ChangeDefault => "change-default",
            Self::ChangeAll => "change-all",
        }
    }

    /// Indicates whether a service account with the given name is subject to
    /// this mode.
    pub fn applies_to(&self, service_account: &str) -> bool {
        match self {
            Self::NoChange => false,
            Self::ChangeDefault => service_account == "default",
            Self::ChangeAll => true,
        }
    }
}

impl FromStr for AutomountMode {
    type Err = InvalidAutomountMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no-change" => Ok(Self::NoChange),
            "change-default" => Ok(Self::ChangeDefault),
            "change-all" => Ok(Self::ChangeAll),
            s => Err(InvalidAutomountMode(s.to_string())),
        }
    }
}

impl fmt::Display for AutomountMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
