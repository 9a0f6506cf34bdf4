use podguard_policy_controller_k8s_api::{Api, Namespace};

/// Fetches the namespace that an admitted object lives in.
///
/// The engine reads through to the API on every request rather than using a
/// cache, so a namespace's annotations take effect as soon as they are written.
#[async_trait::async_trait]
pub trait NamespaceLookup: Send + Sync {
    async fn namespace(&self, name: &str) -> anyhow::Result<Namespace>;
}

#[async_trait::async_trait]
impl NamespaceLookup for Api<Namespace> {
    async fn namespace(&self, name: &str) -> anyhow::Result<Namespace> {
        Ok(self.get(name).await?)
    }
}
