use crate::{Cache, ObjectKey, Reconcile, Writer};
use anyhow::Result;
use parking_lot::RwLock;
use podguard_policy_controller_core::UpdateConfig;
use podguard_policy_controller_k8s_api::{GlobalPolicy, ResourceExt};
use std::sync::Arc;
use tracing::{debug, info};

/// Keeps the global policy singleton in the cluster in sync with the copy held
/// in memory, and propagates changes to every subscriber.
pub struct ConfigReconciler {
    cache: Arc<dyn Cache<GlobalPolicy>>,
    writer: Arc<dyn Writer<GlobalPolicy>>,
    current: RwLock<Option<Arc<GlobalPolicy>>>,
    subscribers: Vec<Arc<dyn UpdateConfig>>,
}

// === impl ConfigReconciler ===

impl ConfigReconciler {
    pub fn new(cache: Arc<dyn Cache<GlobalPolicy>>, writer: Arc<dyn Writer<GlobalPolicy>>) -> Self {
        Self {
            cache,
            writer,
            current: RwLock::new(None),
            subscribers: Vec::new(),
        }
    }

    /// Registers a subscriber. Subscribers are notified in registration order.
    pub fn with_subscriber(mut self, subscriber: Arc<dyn UpdateConfig>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    pub fn current(&self) -> Option<Arc<GlobalPolicy>> {
        self.current.read().clone()
    }

    /// Replaces the tracked policy and notifies each subscriber in turn.
    ///
    /// The first subscriber error is returned and the remaining subscribers
    /// are skipped. The tracked policy is not rolled back.
    pub fn update_config(&self, policy: GlobalPolicy) -> Result<()> {
        let policy = Arc::new(policy);
        *self.current.write() = Some(policy.clone());

        for subscriber in &self.subscribers {
            subscriber.update_config(&policy.spec)?;
        }
        info!(
            name = %policy.name_any(),
            subscribers = self.subscribers.len(),
            "Applied global policy"
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl Reconcile for ConfigReconciler {
    async fn reconcile(&self, key: &ObjectKey) -> Result<()> {
        let current = match self.current() {
            Some(current) => current,
            None => {
                debug!(%key, "No global policy tracked");
                return Ok(());
            }
        };
        let name = current.name_any();
        if key.name != name {
            debug!(%key, "Ignoring untracked policy");
            return Ok(());
        }

        match self.cache.get(&ObjectKey::cluster(&name)) {
            None => {
                info!(%name, "Recreating deleted global policy");
                let policy = GlobalPolicy::new(&name, current.spec.clone());
                self.writer.create(&policy).await?;
                Ok(())
            }
            Some(live) if live.spec != current.spec => {
                info!(%name, "Global policy changed");
                self.update_config((*live).clone())
            }
            Some(_) => Ok(()),
        }
    }
}
