use json_patch::{Patch, PatchOperation};
use kube::{
    core::{admission, DynamicObject},
    Resource,
};
use podguard_policy_controller_k8s_api::{Pod, ServiceAccount};

/// The subset of an admission request that the engine inspects.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Request {
    pub operation: Operation,
    pub kind: Kind,
    pub namespace: Option<String>,
    pub name: String,
    pub object: Option<serde_json::Value>,
    pub old_object: Option<serde_json::Value>,
    pub user: Option<String>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Operation {
    #[default]
    Create,
    Update,
    Delete,
    Connect,
}

/// The resource kinds the engine understands.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Kind {
    Pod,
    ServiceAccount,
    #[default]
    Unsupported,
}

/// Whether the engine may rewrite the object or only judge it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Mutate,
    Validate,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    Allow,
    Patch(Patch),
    Deny(String),
}

// === impl Request ===

impl TryFrom<&admission::AdmissionRequest<DynamicObject>> for Request {
    type Error = serde_json::Error;

    fn try_from(req: &admission::AdmissionRequest<DynamicObject>) -> Result<Self, Self::Error> {
        Ok(Self {
            operation: req.operation.clone().into(),
            kind: Kind::from_gvk(&req.kind.group, &req.kind.kind),
            namespace: req.namespace.clone(),
            name: req.name.clone(),
            object: to_json(req.object.as_ref())?,
            old_object: to_json(req.old_object.as_ref())?,
            user: req.user_info.username.clone(),
        })
    }
}

fn to_json(obj: Option<&DynamicObject>) -> serde_json::Result<Option<serde_json::Value>> {
    obj.map(serde_json::to_value).transpose()
}

// === impl Operation ===

impl Operation {
    /// Only writes are subject to policy.
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Create | Self::Update)
    }
}

impl From<admission::Operation> for Operation {
    fn from(op: admission::Operation) -> Self {
        match op {
            admission::Operation::Create => Self::Create,
            admission::Operation::Update => Self::Update,
            admission::Operation::Delete => Self::Delete,
            admission::Operation::Connect => Self::Connect,
        }
    }
}

// === impl Kind ===

impl Kind {
    pub fn from_gvk(group: &str, kind: &str) -> Self {
        if is_kind::<Pod>(group, kind) {
            return Self::Pod;
        }
        if is_kind::<ServiceAccount>(group, kind) {
            return Self::ServiceAccount;
        }
        Self::Unsupported
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pod => "Pod",
            Self::ServiceAccount => "ServiceAccount",
            Self::Unsupported => "unsupported",
        }
    }
}

fn is_kind<T>(group: &str, kind: &str) -> bool
where
    T: Resource<DynamicType = ()>,
{
    group.eq_ignore_ascii_case(&T::group(&())) && kind.eq_ignore_ascii_case(&T::kind(&()))
}

// === impl Mode ===

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mutate => "mutate",
            Self::Validate => "validate",
        }
    }
}

// === impl Decision ===

impl Decision {
    pub(crate) fn patch(ops: Vec<PatchOperation>) -> Self {
        if ops.is_empty() {
            return Self::Allow;
        }
        Self::Patch(Patch(ops))
    }

    pub(crate) fn from_violations(violations: Vec<String>) -> Self {
        if violations.is_empty() {
            return Self::Allow;
        }
        Self::Deny(violations.join("; "))
    }

    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::Deny(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Patch(_) => "patch",
            Self::Deny(_) => "deny",
        }
    }
}
