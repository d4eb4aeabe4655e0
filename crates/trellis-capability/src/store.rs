//! Access to ProvidedCapability resources

use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::api::{Api, ListParams, PostParams};
use kube::{Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use trellis_common::crd::ProvidedCapability;
use trellis_common::kube_utils::label_selector;
use trellis_common::{Error, FIELD_MANAGER};

/// Reads and creates ProvidedCapability resources
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CapabilityStore: Send + Sync {
    /// Namespace the operator runs in
    fn operator_namespace(&self) -> String;

    /// Get a capability by name, `None` if it does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ProvidedCapability>, Error>;

    /// Capabilities in one namespace carrying all the given labels
    async fn list_in_namespace(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<ProvidedCapability>, Error>;

    /// Capabilities in any namespace carrying all the given labels
    async fn list_all(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<ProvidedCapability>, Error>;

    /// Create a capability in the namespace set on its metadata
    async fn create(&self, capability: &ProvidedCapability) -> Result<ProvidedCapability, Error>;
}

/// `CapabilityStore` backed by the Kubernetes API
pub struct KubeCapabilityStore {
    client: Client,
    operator_namespace: String,
}

impl KubeCapabilityStore {
    pub fn new(client: Client, operator_namespace: impl Into<String>) -> Self {
        Self {
            client,
            operator_namespace: operator_namespace.into(),
        }
    }
}

#[async_trait]
impl CapabilityStore for KubeCapabilityStore {
    fn operator_namespace(&self) -> String {
        self.operator_namespace.clone()
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ProvidedCapability>, Error> {
        let api: Api<ProvidedCapability> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_in_namespace(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<ProvidedCapability>, Error> {
        let api: Api<ProvidedCapability> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().labels(&label_selector(labels));
        Ok(api.list(&lp).await?.items)
    }

    async fn list_all(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<ProvidedCapability>, Error> {
        let api: Api<ProvidedCapability> = Api::all(self.client.clone());
        let lp = ListParams::default().labels(&label_selector(labels));
        Ok(api.list(&lp).await?.items)
    }

    async fn create(&self, capability: &ProvidedCapability) -> Result<ProvidedCapability, Error> {
        let name = capability.name_any();
        let namespace = capability.namespace().ok_or_else(|| {
            Error::validation_for_field(&name, "metadata.namespace", "capability has no namespace")
        })?;
        let api: Api<ProvidedCapability> = Api::namespaced(self.client.clone(), &namespace);
        let pp = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        let created = api.create(&pp, capability).await?;
        debug!(%namespace, %name, "created ProvidedCapability");
        Ok(created)
    }
}
