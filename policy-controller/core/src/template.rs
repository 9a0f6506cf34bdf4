use std::{fmt, str::FromStr};

/// Names a default network policy template as `<namespace>:<name>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateRef {
    pub namespace: String,
    pub name: String,
}

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid network policy reference {0:?}; expected <namespace>:<name>")]
pub struct InvalidTemplateRef(pub String);

// === impl TemplateRef ===

impl TemplateRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl FromStr for TemplateRef {
    type Err = InvalidTemplateRef;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidTemplateRef(s.to_string());
        let (namespace, name) = s.split_once(':').ok_or_else(invalid)?;
        let valid = |part: &str| !part.is_empty() && !part.contains([':', '/']);
        if !valid(namespace) || !valid(name) {
            return Err(invalid());
        }
        Ok(Self::new(namespace, name))
    }
}

impl fmt::Display for TemplateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}
