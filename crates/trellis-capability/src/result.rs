//! What a successfully provisioned capability gives its consumer

use kube::ResourceExt;

use trellis_common::crd::{CapabilityPhase, ProvidedCapability, ResourceReference};

use crate::error::ProvisioningError;

/// References a consumer needs to use a provisioned capability
#[derive(Clone, Debug, PartialEq)]
pub struct ProvisioningResult {
    pub capability: ProvidedCapability,
    pub service: ResourceReference,
    pub ingress: Option<ResourceReference>,
    pub admin_secret: Option<ResourceReference>,
}

impl ProvisioningResult {
    /// Build the result from a capability's recorded server status
    ///
    /// All references point into the capability's own namespace.
    pub fn from_capability(capability: ProvidedCapability) -> Result<Self, ProvisioningError> {
        let name = capability.name_any();
        let namespace = capability.namespace().unwrap_or_default();
        let inconsistent = |message: &str| ProvisioningError::Inconsistent {
            namespace: namespace.clone(),
            name: name.clone(),
            message: message.to_string(),
        };

        match capability.phase() {
            CapabilityPhase::Successful => {}
            CapabilityPhase::Failed => {
                return Err(ProvisioningError::CreationFailed {
                    namespace: namespace.clone(),
                    name: name.clone(),
                    message: capability
                        .status
                        .as_ref()
                        .and_then(|s| s.message.clone())
                        .unwrap_or_else(|| "capability reported Failed".to_string()),
                })
            }
            CapabilityPhase::Requested => return Err(inconsistent("capability is not provisioned yet")),
        }
        if namespace.is_empty() {
            return Err(inconsistent("capability has no namespace"));
        }

        let server = capability
            .primary_server_status()
            .ok_or_else(|| inconsistent("no server status recorded"))?;
        let service = server
            .service_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| ResourceReference::new(&namespace, s))
            .ok_or_else(|| inconsistent("no service name recorded"))?;
        let reference = |n: &Option<String>| {
            n.as_deref()
                .filter(|s| !s.is_empty())
                .map(|s| ResourceReference::new(&namespace, s))
        };
        let ingress = reference(&server.ingress_name);
        let admin_secret = reference(&server.admin_secret_name);

        Ok(Self {
            service,
            ingress,
            admin_secret,
            capability,
        })
    }
}
