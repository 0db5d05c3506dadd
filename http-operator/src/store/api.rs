use super::{object_key, Kind, ObjectStore, StoreError};
use crate::resources::MANAGER_NAME;
use async_trait::async_trait;
use kube::{
    api::{Api, DeleteParams, PostParams},
    Client,
};

/// An [`ObjectStore`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Wrap a client
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: Kind>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(MANAGER_NAME.to_string()),
            ..PostParams::default()
        }
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: Kind>(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError> {
        Ok(self.api::<K>(namespace).get_opt(name).await?)
    }

    async fn create<K: Kind>(&self, obj: &K) -> Result<(), StoreError> {
        let (namespace, _) = object_key(obj)?;
        self.api::<K>(namespace).create(&Self::post_params(), obj).await?;
        Ok(())
    }

    async fn replace<K: Kind>(&self, obj: &K) -> Result<(), StoreError> {
        let (namespace, name) = object_key(obj)?;
        self.api::<K>(namespace)
            .replace(name, &Self::post_params(), obj)
            .await?;
        Ok(())
    }

    async fn delete<K: Kind>(&self, obj: &K) -> Result<(), StoreError> {
        let (namespace, name) = object_key(obj)?;
        self.api::<K>(namespace)
            .delete(name, &DeleteParams::background())
            .await?;
        Ok(())
    }
}
