//! Annotation keys read from namespaces and written to admitted objects.

/// Namespace override for the service account token automount mode.
pub const AUTOMOUNT_MODE: &str = "podguard.io/automount-mode";

/// Namespace override for the pod seccomp profile.
pub const SECCOMP_PROFILE: &str = "podguard.io/seccomp-profile";

/// Namespace override for the default network policy template, formatted as
/// `<namespace>:<name>`.
pub const NETWORK_POLICY: &str = "podguard.io/network-policy";

/// Records which policy caused a service account's automount field to be
/// set, formatted as `<source>/<mode>`.
pub const AUTOMOUNT_PROVENANCE: &str = "podguard.io/automount";

/// The pod-level seccomp annotation enforced on pods.
pub const POD_SECCOMP: &str = "seccomp.security.alpha.kubernetes.io/pod";
