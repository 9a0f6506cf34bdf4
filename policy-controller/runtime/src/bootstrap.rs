use crate::k8s::{self, GlobalPolicy, GlobalPolicySpec, PostParams, FIELD_MANAGER};
use anyhow::{Context, Result};

/// Returns the named global policy, creating it from `defaults` if it does not
/// exist.
pub async fn ensure_global_policy(
    client: k8s::Client,
    name: &str,
    defaults: GlobalPolicySpec,
) -> Result<GlobalPolicy> {
    let api = k8s::Api::<GlobalPolicy>::all(client);
    if let Some(policy) = api
        .get_opt(name)
        .await
        .with_context(|| format!("failed to fetch global policy {name}"))?
    {
        tracing::debug!(%name, "Found global policy");
        return Ok(policy);
    }

    let params = PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    };
    let policy = GlobalPolicy::new(name, defaults);
    match api.create(&params, &policy).await {
        Ok(policy) => {
            tracing::info!(%name, spec = ?policy.spec, "Created global policy");
            Ok(policy)
        }
        // Another replica created it first.
        Err(k8s::Error::Api(error)) if error.code == 409 => {
            tracing::debug!(%name, "Global policy already exists");
            Ok(api.get(name).await?)
        }
        Err(error) => Err(error).with_context(|| format!("failed to create global policy {name}")),
    }
}
