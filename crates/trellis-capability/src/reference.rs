//! Picking a concrete target for a dependency left unspecified
//!
//! The first of these that yields a name wins:
//! 1. the explicit reference on the requirement
//! 2. an existing capability of the same kind in the requester's namespace
//! 3. the operator defaults (`default-<kind>-namespace`, `default-<kind>-name`)
//!
//! A missing namespace falls back to the requester's. When nothing yields a
//! name the result is `None`, not an error.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::Api;
use kube::{Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use trellis_common::crd::{CapabilityRequirement, ResourceReference, StandardCapability};
use trellis_common::{Error, CAPABILITY_LABEL};

use crate::resolver::Requester;
use crate::store::CapabilityStore;

/// Operator-wide defaults, as read from the defaults ConfigMap
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CapabilityDefaults {
    values: BTreeMap<String, String>,
}

impl CapabilityDefaults {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }

    /// Value for `key`, ignoring blank entries
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// The default reference configured for a capability kind
    pub fn reference_for(&self, capability: StandardCapability) -> Option<ResourceReference> {
        let kind = capability.hyphenated_name();
        let name = self.get(&format!("default-{}-name", kind))?;
        Some(ResourceReference {
            namespace: self
                .get(&format!("default-{}-namespace", kind))
                .map(str::to_string),
            name: Some(name.to_string()),
        })
    }
}

/// Supplies the operator-wide defaults
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DefaultsSource: Send + Sync {
    async fn load(&self) -> Result<CapabilityDefaults, Error>;
}

/// Reads defaults from a ConfigMap; a missing ConfigMap means no defaults
pub struct ConfigMapDefaults {
    client: Client,
    namespace: String,
    name: String,
}

impl ConfigMapDefaults {
    pub fn new(client: Client, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

#[async_trait]
impl DefaultsSource for ConfigMapDefaults {
    async fn load(&self) -> Result<CapabilityDefaults, Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.namespace);
        match api.get_opt(&self.name).await? {
            Some(cm) => Ok(CapabilityDefaults::new(cm.data.unwrap_or_default())),
            None => {
                debug!(namespace = %self.namespace, name = %self.name, "no defaults ConfigMap");
                Ok(CapabilityDefaults::default())
            }
        }
    }
}

/// Finds an existing capability of a kind in a namespace
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CapabilityDiscovery: Send + Sync {
    async fn find_in_namespace(
        &self,
        namespace: &str,
        capability: StandardCapability,
    ) -> Result<Option<ResourceReference>, Error>;
}

/// `CapabilityDiscovery` over a `CapabilityStore`; picks the first by name
pub struct StoreDiscovery {
    store: Arc<dyn CapabilityStore>,
}

impl StoreDiscovery {
    pub fn new(store: Arc<dyn CapabilityStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CapabilityDiscovery for StoreDiscovery {
    async fn find_in_namespace(
        &self,
        namespace: &str,
        capability: StandardCapability,
    ) -> Result<Option<ResourceReference>, Error> {
        let mut labels = BTreeMap::new();
        labels.insert(
            CAPABILITY_LABEL.to_string(),
            capability.label_value().to_string(),
        );
        let found = self.store.list_in_namespace(namespace, &labels).await?;
        Ok(found
            .iter()
            .map(|c| c.name_any())
            .min()
            .map(|name| ResourceReference::new(namespace, name)))
    }
}

/// Applies the reference defaulting chain
pub struct ReferenceResolver {
    discovery: Arc<dyn CapabilityDiscovery>,
    defaults: Arc<dyn DefaultsSource>,
}

impl ReferenceResolver {
    pub fn new(discovery: Arc<dyn CapabilityDiscovery>, defaults: Arc<dyn DefaultsSource>) -> Self {
        Self {
            discovery,
            defaults,
        }
    }

    /// Pick the resource `requester` should use for `capability`
    pub async fn resolve_reference(
        &self,
        requester: &Requester,
        capability: StandardCapability,
        explicit: Option<&ResourceReference>,
    ) -> Result<Option<ResourceReference>, Error> {
        let namespace = requester.namespace.as_str();

        if let Some(reference) = explicit.and_then(|r| r.qualified_in(namespace)) {
            debug!(requester = %requester.name, %reference, "using explicit reference");
            return Ok(Some(reference));
        }

        if let Some(reference) = self
            .discovery
            .find_in_namespace(namespace, capability)
            .await?
            .and_then(|r| r.qualified_in(namespace))
        {
            debug!(requester = %requester.name, %reference, "using capability found in namespace");
            return Ok(Some(reference));
        }

        let defaults = self.defaults.load().await?;
        let reference = defaults
            .reference_for(capability)
            .and_then(|r| r.qualified_in(namespace));
        match &reference {
            Some(r) => debug!(requester = %requester.name, reference = %r, "using operator default"),
            None => debug!(requester = %requester.name, %capability, "no reference available"),
        }
        Ok(reference)
    }

    /// Like `resolve_reference`, with the requirement's preferred resource
    /// as the explicit choice
    pub async fn resolve_for_requirement(
        &self,
        requester: &Requester,
        requirement: &CapabilityRequirement,
    ) -> Result<Option<ResourceReference>, Error> {
        self.resolve_reference(
            requester,
            requirement.capability,
            requirement.preferred_resource_reference.as_ref(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;
    use trellis_common::crd::ProvidedCapability;

    use super::*;
    use crate::store::MockCapabilityStore;

    fn requester() -> Requester {
        Requester::new("shop", "retail")
    }

    fn defaults(pairs: &[(&str, &str)]) -> CapabilityDefaults {
        CapabilityDefaults::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn resolver(
        discovery: MockCapabilityDiscovery,
        defaults: MockDefaultsSource,
    ) -> ReferenceResolver {
        ReferenceResolver::new(Arc::new(discovery), Arc::new(defaults))
    }

    #[tokio::test]
    async fn explicit_reference_wins_without_other_lookups() {
        // No expectations: any discovery or defaults call panics
        let resolver = resolver(MockCapabilityDiscovery::new(), MockDefaultsSource::new());

        let explicit = ResourceReference::named("my-keycloak");
        let resolved = resolver
            .resolve_reference(&requester(), StandardCapability::Sso, Some(&explicit))
            .await
            .unwrap();
        assert_eq!(resolved, Some(ResourceReference::new("retail", "my-keycloak")));

        let explicit = ResourceReference::new("identity", "my-keycloak");
        let resolved = resolver
            .resolve_reference(&requester(), StandardCapability::Sso, Some(&explicit))
            .await
            .unwrap();
        assert_eq!(resolved, Some(explicit));
    }

    #[tokio::test]
    async fn preferred_resource_of_a_requirement_is_used() {
        let resolver = resolver(MockCapabilityDiscovery::new(), MockDefaultsSource::new());
        let requirement = CapabilityRequirement::new(StandardCapability::Sso)
            .with_preferred_resource(ResourceReference::named("team-keycloak"));

        let resolved = resolver
            .resolve_for_requirement(&requester(), &requirement)
            .await
            .unwrap();
        assert_eq!(resolved, Some(ResourceReference::new("retail", "team-keycloak")));
    }

    #[tokio::test]
    async fn requirement_without_preference_uses_discovery() {
        let mut discovery = MockCapabilityDiscovery::new();
        discovery
            .expect_find_in_namespace()
            .with(eq("retail"), eq(StandardCapability::Dbms))
            .times(1)
            .returning(|_, _| Ok(Some(ResourceReference::named("orders-db"))));

        let resolver = resolver(discovery, MockDefaultsSource::new());
        let resolved = resolver
            .resolve_for_requirement(&requester(), &CapabilityRequirement::new(StandardCapability::Dbms))
            .await
            .unwrap();
        assert_eq!(resolved, Some(ResourceReference::new("retail", "orders-db")));
    }

    #[tokio::test]
    async fn empty_explicit_reference_falls_through_to_discovery() {
        let mut discovery = MockCapabilityDiscovery::new();
        discovery
            .expect_find_in_namespace()
            .with(eq("retail"), eq(StandardCapability::Sso))
            .times(1)
            .returning(|_, _| Ok(Some(ResourceReference::named("found-sso"))));

        let resolver = resolver(discovery, MockDefaultsSource::new());
        let explicit = ResourceReference::default();
        let resolved = resolver
            .resolve_reference(&requester(), StandardCapability::Sso, Some(&explicit))
            .await
            .unwrap();
        assert_eq!(resolved, Some(ResourceReference::new("retail", "found-sso")));
    }

    #[tokio::test]
    async fn operator_defaults_come_last() {
        let mut discovery = MockCapabilityDiscovery::new();
        discovery
            .expect_find_in_namespace()
            .times(1)
            .returning(|_, _| Ok(None));
        let mut source = MockDefaultsSource::new();
        source.expect_load().times(1).returning(|| {
            Ok(defaults(&[
                ("default-sso-name", "company-sso"),
                ("default-sso-namespace", "identity"),
            ]))
        });

        let resolved = resolver(discovery, source)
            .resolve_reference(&requester(), StandardCapability::Sso, None)
            .await
            .unwrap();
        assert_eq!(resolved, Some(ResourceReference::new("identity", "company-sso")));
    }

    #[tokio::test]
    async fn default_without_namespace_uses_the_requester_namespace() {
        let mut discovery = MockCapabilityDiscovery::new();
        discovery.expect_find_in_namespace().returning(|_, _| Ok(None));
        let mut source = MockDefaultsSource::new();
        source
            .expect_load()
            .returning(|| Ok(defaults(&[("default-dbms-name", "shared-db")])));

        let resolved = resolver(discovery, source)
            .resolve_reference(&requester(), StandardCapability::Dbms, None)
            .await
            .unwrap();
        assert_eq!(resolved, Some(ResourceReference::new("retail", "shared-db")));
    }

    #[tokio::test]
    async fn nothing_anywhere_is_no_reference() {
        let mut discovery = MockCapabilityDiscovery::new();
        discovery.expect_find_in_namespace().returning(|_, _| Ok(None));
        let mut source = MockDefaultsSource::new();
        source
            .expect_load()
            .returning(|| Ok(defaults(&[("default-dbms-name", "  "), ("default-sso-name", "other")])));

        let resolved = resolver(discovery, source)
            .resolve_reference(&requester(), StandardCapability::Dbms, None)
            .await
            .unwrap();
        assert_eq!(resolved, None);
    }

    #[tokio::test]
    async fn discovery_errors_propagate() {
        let mut discovery = MockCapabilityDiscovery::new();
        discovery
            .expect_find_in_namespace()
            .returning(|_, _| Err(Error::internal("api unavailable")));

        let err = resolver(discovery, MockDefaultsSource::new())
            .resolve_reference(&requester(), StandardCapability::Dbms, None)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn store_discovery_picks_the_first_name() {
        let mut store = MockCapabilityStore::new();
        store
            .expect_list_in_namespace()
            .withf(|ns, labels| {
                ns == "retail" && labels.get(CAPABILITY_LABEL).map(String::as_str) == Some("dbms")
            })
            .returning(|ns, _| {
                Ok(["zeta-db", "alpha-db"]
                    .into_iter()
                    .map(|name| {
                        let mut c = ProvidedCapability::new(
                            name,
                            CapabilityRequirement::new(StandardCapability::Dbms),
                        );
                        c.metadata.namespace = Some(ns.to_string());
                        c
                    })
                    .collect())
            });

        let found = StoreDiscovery::new(Arc::new(store))
            .find_in_namespace("retail", StandardCapability::Dbms)
            .await
            .unwrap();
        assert_eq!(found, Some(ResourceReference::new("retail", "alpha-db")));
    }
}
