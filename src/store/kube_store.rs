use async_trait::async_trait;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Client, ResourceExt};

use super::{Record, Store};

/// [`Store`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Store for KubeStore {
    async fn get<K: Record>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<K>, kube::Error> {
        K::api(self.client.clone(), namespace).get_opt(name).await
    }

    async fn list<K: Record>(&self, namespace: Option<&str>) -> Result<Vec<K>, kube::Error> {
        let list = K::api(self.client.clone(), namespace)
            .list(&ListParams::default())
            .await?;
        Ok(list.items)
    }

    async fn create<K: Record>(&self, obj: &K) -> Result<K, kube::Error> {
        K::api(self.client.clone(), obj.namespace().as_deref())
            .create(&PostParams::default(), obj)
            .await
    }

    async fn replace<K: Record>(&self, obj: &K) -> Result<K, kube::Error> {
        K::api(self.client.clone(), obj.namespace().as_deref())
            .replace(&obj.name_any(), &PostParams::default(), obj)
            .await
    }

    async fn replace_status<K: Record>(&self, obj: &K) -> Result<K, kube::Error> {
        let data = serde_json::to_vec(obj).map_err(kube::Error::SerdeError)?;
        K::api(self.client.clone(), obj.namespace().as_deref())
            .replace_status(&obj.name_any(), &PostParams::default(), data)
            .await
    }

    async fn delete<K: Record>(
        &self,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), kube::Error> {
        K::api(self.client.clone(), namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }
}
