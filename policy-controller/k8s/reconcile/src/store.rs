//! Read and write access to cluster objects.
//!
//! Reconcilers read through reflector caches and write through the API, each
//! behind a trait so that they can be exercised without a cluster.

use crate::ObjectKey;
use podguard_policy_controller_k8s_api::{
    reflector::{ObjectRef, Store},
    Api, Client, NamespaceResourceScope, PostParams, Resource, ResourceExt, FIELD_MANAGER,
};
use serde::{de::DeserializeOwned, Serialize};
use std::{fmt::Debug, sync::Arc};

pub trait Cache<K>: Send + Sync {
    fn get(&self, key: &ObjectKey) -> Option<Arc<K>>;

    fn list(&self) -> Vec<Arc<K>>;
}

#[async_trait::async_trait]
pub trait Writer<K>: Send + Sync {
    async fn create(&self, obj: &K) -> anyhow::Result<K>;

    /// Replaces an existing object. The object must carry the resource
    /// version it was derived from.
    async fn replace(&self, obj: &K) -> anyhow::Result<K>;
}

/// Writes namespaced objects into the namespace named by their metadata.
#[derive(Clone)]
pub struct Namespaced(pub Client);

/// Writes cluster-scoped objects.
#[derive(Clone)]
pub struct ClusterScoped(pub Client);

// === impl Store ===

impl<K> Cache<K> for Store<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    fn get(&self, key: &ObjectKey) -> Option<Arc<K>> {
        let mut obj_ref = ObjectRef::<K>::new(&key.name);
        if let Some(ns) = key.namespace.as_deref() {
            obj_ref = obj_ref.within(ns);
        }
        Store::get(self, &obj_ref)
    }

    fn list(&self) -> Vec<Arc<K>> {
        self.state()
    }
}

// === impl Namespaced ===

#[async_trait::async_trait]
impl<K> Writer<K> for Namespaced
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
    K: Clone + Debug + DeserializeOwned + Serialize + Send + Sync + 'static,
{
    async fn create(&self, obj: &K) -> anyhow::Result<K> {
        let ns = namespace_of(obj)?;
        let api = Api::<K>::namespaced(self.0.clone(), &ns);
        Ok(api.create(&post_params(), obj).await?)
    }

    async fn replace(&self, obj: &K) -> anyhow::Result<K> {
        let ns = namespace_of(obj)?;
        let api = Api::<K>::namespaced(self.0.clone(), &ns);
        Ok(api.replace(&obj.name_any(), &post_params(), obj).await?)
    }
}

// === impl ClusterScoped ===

#[async_trait::async_trait]
impl<K> Writer<K> for ClusterScoped
where
    K: Resource<DynamicType = ()>,
    K: Clone + Debug + DeserializeOwned + Serialize + Send + Sync + 'static,
{
    async fn create(&self, obj: &K) -> anyhow::Result<K> {
        let api = Api::<K>::all(self.0.clone());
        Ok(api.create(&post_params(), obj).await?)
    }

    async fn replace(&self, obj: &K) -> anyhow::Result<K> {
        let api = Api::<K>::all(self.0.clone());
        Ok(api.replace(&obj.name_any(), &post_params(), obj).await?)
    }
}

fn namespace_of<K: Resource<DynamicType = ()>>(obj: &K) -> anyhow::Result<String> {
    obj.namespace()
        .ok_or_else(|| anyhow::anyhow!("{} {} has no namespace", K::kind(&()), obj.name_any()))
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}
