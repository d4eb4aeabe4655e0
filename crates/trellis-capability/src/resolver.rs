//! Lookup strategy and canonical naming for each capability scope
//!
//! | Scope     | Lookup                                  | Created as                                    |
//! |-----------|-----------------------------------------|-----------------------------------------------|
//! | dedicated | `<owner>-<suffix>` in owner namespace   | same                                          |
//! | specified | the referenced name                     | the referenced name                           |
//! | labeled   | selector, all namespaces                | `[impl-]<kind>-NNNN` in owner namespace       |
//! | namespace | capability labels, owner namespace      | `default-[impl-]<kind>-in-namespace`          |
//! | cluster   | capability labels, all namespaces       | `default-[impl-]<kind>-in-cluster`, operator namespace |
//!
//! Everything here is pure; validation failures surface before the cluster
//! is touched.

use std::collections::BTreeMap;

use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use rand::Rng;

use trellis_common::crd::{
    CapabilityRequirement, CapabilityScope, ProvidedCapability, ResourceReference,
};
use trellis_common::{CAPABILITY_LABEL, IMPLEMENTATION_LABEL, PROVISION_SCOPE_LABEL};

use crate::error::ProvisioningError;
use crate::reference::CapabilityDefaults;

/// The resource that needs a capability
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Requester {
    pub name: String,
    pub namespace: String,
}

impl Requester {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Requester for a namespaced Kubernetes resource
    pub fn from_resource<R: Resource>(resource: &R) -> Result<Self, ProvisioningError> {
        let name = resource.name_any();
        let namespace = resource
            .namespace()
            .ok_or_else(|| ProvisioningError::MissingNamespace(name.clone()))?;
        Ok(Self { name, namespace })
    }
}

/// How to find an existing capability for a requirement
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CapabilityLookup {
    ByName {
        namespace: String,
        name: String,
    },
    /// `namespace: None` searches every namespace
    ByLabels {
        namespace: Option<String>,
        labels: BTreeMap<String, String>,
    },
}

/// Decide how to look up the capability satisfying `requirement`
pub fn plan_lookup(
    requester: &Requester,
    requirement: &CapabilityRequirement,
) -> Result<CapabilityLookup, ProvisioningError> {
    match requirement.effective_scope() {
        CapabilityScope::Dedicated => Ok(CapabilityLookup::ByName {
            namespace: requester.namespace.clone(),
            name: dedicated_name(requester, requirement),
        }),
        CapabilityScope::Specified => {
            let (namespace, name) = specified_target(requester, requirement)?;
            Ok(CapabilityLookup::ByName { namespace, name })
        }
        CapabilityScope::Labeled => {
            if requirement.selector.is_empty() {
                return Err(ProvisioningError::MissingSelector {
                    capability: requirement.capability.to_string(),
                });
            }
            Ok(CapabilityLookup::ByLabels {
                namespace: None,
                labels: requirement.selector.clone(),
            })
        }
        CapabilityScope::Namespace => Ok(CapabilityLookup::ByLabels {
            namespace: Some(requester.namespace.clone()),
            labels: capability_labels(requirement),
        }),
        CapabilityScope::Cluster => Ok(CapabilityLookup::ByLabels {
            namespace: None,
            labels: capability_labels(requirement),
        }),
    }
}

/// Labels a matching capability must carry
///
/// The scope label is only required when the requirement names a scope.
pub fn capability_labels(requirement: &CapabilityRequirement) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(
        CAPABILITY_LABEL.to_string(),
        requirement.capability.label_value().to_string(),
    );
    if let Some(implementation) = requirement.implementation {
        labels.insert(
            IMPLEMENTATION_LABEL.to_string(),
            implementation.label_value().to_string(),
        );
    }
    if let Some(scope) = requirement.scope {
        labels.insert(PROVISION_SCOPE_LABEL.to_string(), scope.label_value().to_string());
    }
    labels
}

/// `default-[impl-]<kind>`, the stem of shared capability names
pub fn default_base_name(requirement: &CapabilityRequirement) -> String {
    match requirement.implementation {
        Some(implementation) => format!(
            "default-{}-{}",
            implementation.hyphenated_name(),
            requirement.capability.hyphenated_name()
        ),
        None => format!("default-{}", requirement.capability.hyphenated_name()),
    }
}

fn dedicated_name(requester: &Requester, requirement: &CapabilityRequirement) -> String {
    format!("{}-{}", requester.name, requirement.capability.suffix())
}

fn labeled_name(requirement: &CapabilityRequirement) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..10_000);
    match requirement.implementation {
        Some(implementation) => format!(
            "{}-{}-{:04}",
            implementation.hyphenated_name(),
            requirement.capability.hyphenated_name(),
            suffix
        ),
        None => format!("{}-{:04}", requirement.capability.hyphenated_name(), suffix),
    }
}

fn specified_target(
    requester: &Requester,
    requirement: &CapabilityRequirement,
) -> Result<(String, String), ProvisioningError> {
    requirement
        .specified_capability
        .as_ref()
        .and_then(|r| r.qualified_in(&requester.namespace))
        .and_then(|r: ResourceReference| Some((r.namespace()?.to_string(), r.name()?.to_string())))
        .ok_or_else(|| ProvisioningError::MissingSpecifiedReference {
            capability: requirement.capability.to_string(),
        })
}

/// Build the ProvidedCapability to create when no existing one matches
pub fn build_capability(
    requester: &Requester,
    requirement: &CapabilityRequirement,
    defaults: &CapabilityDefaults,
    operator_namespace: &str,
) -> Result<ProvidedCapability, ProvisioningError> {
    let scope = requirement.effective_scope();
    let (namespace, name) = match scope {
        CapabilityScope::Dedicated => (
            requester.namespace.clone(),
            dedicated_name(requester, requirement),
        ),
        CapabilityScope::Specified => specified_target(requester, requirement)?,
        CapabilityScope::Labeled => (requester.namespace.clone(), labeled_name(requirement)),
        CapabilityScope::Namespace => (
            requester.namespace.clone(),
            format!("{}-in-namespace", default_base_name(requirement)),
        ),
        CapabilityScope::Cluster => {
            let base = default_base_name(requirement);
            let name = defaults
                .get(&format!("{}-name", base))
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}-in-cluster", base));
            let namespace = defaults
                .get(&format!("{}-namespace", base))
                .unwrap_or(operator_namespace)
                .to_string();
            (namespace, name)
        }
    };

    let mut labels = BTreeMap::new();
    if scope == CapabilityScope::Labeled {
        labels.extend(requirement.selector.clone());
    }
    labels.insert(
        CAPABILITY_LABEL.to_string(),
        requirement.capability.label_value().to_string(),
    );
    labels.insert(PROVISION_SCOPE_LABEL.to_string(), scope.label_value().to_string());
    if let Some(implementation) = requirement.implementation {
        labels.insert(
            IMPLEMENTATION_LABEL.to_string(),
            implementation.label_value().to_string(),
        );
    }

    let mut spec = requirement.clone();
    spec.scope = Some(scope);

    Ok(ProvidedCapability {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace),
            labels: Some(labels),
            ..Default::default()
        },
        spec,
        status: None,
    })
}
