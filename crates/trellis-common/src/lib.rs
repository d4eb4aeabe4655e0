//! Common types for Trellis: CRDs, errors, configuration and kube helpers

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace the operator runs in when nothing else is configured
pub const TRELLIS_SYSTEM_NAMESPACE: &str = "trellis-system";

/// Name of the ConfigMap holding operator-wide capability defaults
pub const DEFAULT_CAPABILITIES_CONFIGMAP: &str = "trellis-default-capabilities";

/// Field manager used for all writes made by the capability engine
pub const FIELD_MANAGER: &str = "trellis-capability-provisioner";

// =============================================================================
// Capability labels
// =============================================================================
// These three labels are the only indexed lookup keys the provisioning engine
// relies on. Existing clusters carry them, so the keys must never change.

/// Label carrying the capability kind (e.g. `dbms`, `sso`)
pub const CAPABILITY_LABEL: &str = "capability-kind";

/// Label carrying the provision scope (e.g. `namespace`, `cluster`)
pub const PROVISION_SCOPE_LABEL: &str = "provision-scope";

/// Label carrying the capability implementation (e.g. `mysql`, `keycloak`)
pub const IMPLEMENTATION_LABEL: &str = "implementation";
