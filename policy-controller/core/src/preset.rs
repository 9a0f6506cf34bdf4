use std::{fmt, str::FromStr};

/// The UID and GID of the conventional unprivileged `nobody` user.
pub const NOBODY: i64 = 65534;

/// A named set of pod security context defaults.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SecurityContextPreset {
    /// No defaulting or validation.
    #[default]
    None,

    /// Pods run as `nobody:nobody` with `runAsNonRoot` and containers
    /// disallow privilege escalation.
    Nobody,
}

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown pod security context preset {0:?}; expected '' or 'nobody'")]
pub struct InvalidPreset(pub String);

// === impl SecurityContextPreset ===

impl FromStr for SecurityContextPreset {
    type Err = InvalidPreset;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(Self::None),
            "nobody" => Ok(Self::Nobody),
            s => Err(InvalidPreset(s.to_string())),
        }
    }
}

impl fmt::Display for SecurityContextPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => Ok(()),
            Self::Nobody => f.write_str("nobody"),
        }
    }
}
