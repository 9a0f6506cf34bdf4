use parking_lot::RwLock;
use podguard_policy_controller_k8s_api::GlobalPolicySpec;
use std::sync::Arc;

/// Receives the global policy whenever the config reconciler observes a new
/// value.
///
/// Implementations must either adopt the whole policy or reject it and keep
/// their previous state.
pub trait UpdateConfig: Send + Sync {
    fn update_config(&self, policy: &GlobalPolicySpec) -> anyhow::Result<()>;
}

/// A read-mostly value that is replaced whole.
///
/// Readers get an `Arc` snapshot and so never observe a value that is being
/// written.
#[derive(Debug)]
pub struct Shared<T>(RwLock<Arc<T>>);

// === impl Shared ===

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Self(RwLock::new(Arc::new(value)))
    }

    pub fn get(&self) -> Arc<T> {
        self.0.read().clone()
    }

    /// Replaces the current value, returning the previous one.
    pub fn replace(&self, value: T) -> Arc<T> {
        std::mem::replace(&mut *self.0.write(), Arc::new(value))
    }
}

impl<T: Default> Default for Shared<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
