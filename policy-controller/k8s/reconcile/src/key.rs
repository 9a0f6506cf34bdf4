use podguard_policy_controller_k8s_api::{Resource, ResourceExt};
use std::{fmt, str::FromStr};

/// Identifies an object in a reflector cache.
///
/// Keys are queued as strings of the form `namespace/name` for namespaced
/// objects and `name` (or `/name`) for cluster-scoped ones.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
#[error("malformed object key {0:?}")]
pub struct KeyError(pub String);

impl ObjectKey {
    pub fn cluster(name: impl ToString) -> Self {
        Self {
            namespace: None,
            name: name.to_string(),
        }
    }

    pub fn namespaced(namespace: impl ToString, name: impl ToString) -> Self {
        Self {
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        }
    }

    pub fn of<K: Resource>(obj: &K) -> Self {
        Self {
            namespace: obj.namespace(),
            name: obj.name_any(),
        }
    }
}

impl FromStr for ObjectKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        let key = match (parts.next(), parts.next(), parts.next()) {
            (Some(name), None, None) => Self::cluster(name),
            (Some(""), Some(name), None) => Self::cluster(name),
            (Some(ns), Some(name), None) => Self::namespaced(ns, name),
            _ => return Err(KeyError(s.to_string())),
        };
        if key.name.is_empty() {
            return Err(KeyError(s.to_string()));
        }
        Ok(key)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{ns}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}
