//! ProvidedCapability CRD for shared infrastructural capabilities
//!
//! A ProvidedCapability records that some consumer needs a database or an
//! identity provider. The capability's own controller deploys it and reports
//! the resulting Service, Ingress and admin Secret in the status; consumers
//! find it again through its labels.

use std::collections::BTreeMap;
use std::fmt;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::ResourceReference;
use crate::{CAPABILITY_LABEL, IMPLEMENTATION_LABEL, PROVISION_SCOPE_LABEL};

/// Key of the server status entry describing the capability's main server
pub const MAIN_SERVER_STATUS: &str = "server";

/// The kinds of capability a resource can depend on
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum StandardCapability {
    /// A relational database management system
    Dbms,
    /// A single sign-on identity provider
    Sso,
}

impl StandardCapability {
    /// Value stored in the `capability-kind` label
    pub fn label_value(&self) -> &'static str {
        match self {
            Self::Dbms => "dbms",
            Self::Sso => "sso",
        }
    }

    /// Hyphenated form used when composing resource names
    pub fn hyphenated_name(&self) -> &'static str {
        self.label_value()
    }

    /// Suffix appended to an owner's name for dedicated capabilities
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Dbms => "db",
            Self::Sso => "sso",
        }
    }
}

impl fmt::Display for StandardCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label_value())
    }
}

/// Concrete products that can implement a capability
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum StandardCapabilityImplementation {
    /// MySQL database server
    Mysql,
    /// PostgreSQL database server
    Postgresql,
    /// Oracle database server
    Oracle,
    /// Keycloak identity provider
    Keycloak,
    /// Red Hat SSO identity provider
    RedhatSso,
}

impl StandardCapabilityImplementation {
    /// Value stored in the `implementation` label
    pub fn label_value(&self) -> &'static str {
        match self {
            Self::Mysql => "mysql",
            Self::Postgresql => "postgresql",
            Self::Oracle => "oracle",
            Self::Keycloak => "keycloak",
            Self::RedhatSso => "redhatSso",
        }
    }

    /// Hyphenated form used when composing resource names
    pub fn hyphenated_name(&self) -> &'static str {
        match self {
            Self::RedhatSso => "redhat-sso",
            other => other.label_value(),
        }
    }
}

impl fmt::Display for StandardCapabilityImplementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label_value())
    }
}

/// How widely a provided capability is shared
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum CapabilityScope {
    /// Owned by a single consumer, named after it
    Dedicated,
    /// An explicitly named capability
    Specified,
    /// Any capability carrying the requested labels
    Labeled,
    /// Shared by all consumers in a namespace
    #[default]
    Namespace,
    /// Shared by all consumers in the cluster
    Cluster,
}

impl CapabilityScope {
    /// Value stored in the `provision-scope` label
    pub fn label_value(&self) -> &'static str {
        match self {
            Self::Dedicated => "dedicated",
            Self::Specified => "specified",
            Self::Labeled => "labeled",
            Self::Namespace => "namespace",
            Self::Cluster => "cluster",
        }
    }
}

impl fmt::Display for CapabilityScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label_value())
    }
}

/// How the capability's controller should bring the capability about.
///
/// Carried through to the capability's own controller untouched.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum CapabilityProvisioningStrategy {
    /// Point at a service running outside the cluster
    UseExternal,
    /// Deploy the service directly
    DeployDirectly,
    /// Hand the work to a dedicated operator
    DelegateToOperator,
}

/// A consumer's requirement for a capability.
///
/// Doubles as the spec of the ProvidedCapability created to satisfy it.
///
/// Example:
/// ```yaml
/// apiVersion: trellis.dev/v1alpha1
/// kind: ProvidedCapability
/// metadata:
///   name: default-mysql-dbms-in-namespace
///   namespace: shop
///   labels:
///     capability-kind: dbms
///     implementation: mysql
///     provision-scope: namespace
/// spec:
///   capability: dbms
///   implementation: mysql
///   scope: namespace
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "trellis.dev",
    version = "v1alpha1",
    kind = "ProvidedCapability",
    namespaced,
    status = "ProvidedCapabilityStatus",
    shortname = "pcap",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Capability","type":"string","jsonPath":".spec.capability"}"#,
    printcolumn = r#"{"name":"Implementation","type":"string","jsonPath":".spec.implementation"}"#,
    printcolumn = r#"{"name":"Scope","type":"string","jsonPath":".spec.scope"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityRequirement {
    /// The kind of capability required
    pub capability: StandardCapability,

    /// Required implementation; any implementation will do when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation: Option<StandardCapabilityImplementation>,

    /// Sharing scope; `namespace` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<CapabilityScope>,

    /// Provisioning strategy passed on to the capability's controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_strategy: Option<CapabilityProvisioningStrategy>,

    /// Labels selecting the capability (required for `labeled` scope)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: BTreeMap<String, String>,

    /// The capability to use (required for `specified` scope)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specified_capability: Option<ResourceReference>,

    /// Explicit resource to use instead of the operator's defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_resource_reference: Option<ResourceReference>,
}

impl CapabilityRequirement {
    /// Requirement for `capability` with every option left open
    pub fn new(capability: StandardCapability) -> Self {
        Self {
            capability,
            implementation: None,
            scope: None,
            provisioning_strategy: None,
            selector: BTreeMap::new(),
            specified_capability: None,
            preferred_resource_reference: None,
        }
    }

    /// Require a specific implementation
    pub fn with_implementation(mut self, implementation: StandardCapabilityImplementation) -> Self {
        self.implementation = Some(implementation);
        self
    }

    /// Require a specific scope
    pub fn with_scope(mut self, scope: CapabilityScope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Set the provisioning strategy
    pub fn with_provisioning_strategy(mut self, strategy: CapabilityProvisioningStrategy) -> Self {
        self.provisioning_strategy = Some(strategy);
        self
    }

    /// Add a selector label
    pub fn with_selector(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.selector.insert(key.into(), value.into());
        self
    }

    /// Point at a specific capability
    pub fn with_specified_capability(mut self, reference: ResourceReference) -> Self {
        self.specified_capability = Some(reference);
        self
    }

    /// Set the preferred resource reference
    pub fn with_preferred_resource(mut self, reference: ResourceReference) -> Self {
        self.preferred_resource_reference = Some(reference);
        self
    }

    /// The scope in force, defaulting to `namespace`
    pub fn effective_scope(&self) -> CapabilityScope {
        self.scope.unwrap_or_default()
    }
}

/// Lifecycle phase of a ProvidedCapability
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CapabilityPhase {
    /// Requested, not yet provisioned
    #[default]
    Requested,
    /// Provisioned and usable
    Successful,
    /// The capability's controller gave up
    Failed,
}

impl CapabilityPhase {
    /// Successful and Failed are final
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Successful | Self::Failed)
    }
}

/// What the capability's controller deployed for one logical server
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    /// Service exposing the server inside the cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    /// Ingress exposing the server outside the cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_name: Option<String>,

    /// Secret holding the server's admin credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_secret_name: Option<String>,
}

/// ProvidedCapability status, owned by the capability's controller
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProvidedCapabilityStatus {
    /// Current phase
    #[serde(default)]
    pub phase: CapabilityPhase,

    /// Deployed servers keyed by logical role
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub server_status: BTreeMap<String, ServerStatus>,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Generation observed by the capability's controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl ProvidedCapability {
    /// Current phase; `Requested` until a status is written
    pub fn phase(&self) -> CapabilityPhase {
        self.status
            .as_ref()
            .map(|s| s.phase)
            .unwrap_or_default()
    }

    /// Value of one of this capability's labels
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels().get(key).map(String::as_str)
    }

    /// Value of the `capability-kind` label
    pub fn capability_label(&self) -> Option<&str> {
        self.label(CAPABILITY_LABEL)
    }

    /// Value of the `provision-scope` label
    pub fn scope_label(&self) -> Option<&str> {
        self.label(PROVISION_SCOPE_LABEL)
    }

    /// Value of the `implementation` label
    pub fn implementation_label(&self) -> Option<&str> {
        self.label(IMPLEMENTATION_LABEL)
    }

    /// The main server's status, or the first one recorded
    pub fn primary_server_status(&self) -> Option<&ServerStatus> {
        let servers = &self.status.as_ref()?.server_status;
        servers
            .get(MAIN_SERVER_STATUS)
            .or_else(|| servers.values().next())
    }
}
