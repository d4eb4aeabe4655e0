//! Shared value types used by Trellis CRDs

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A (namespace, name) pointer to another resource.
///
/// An absent namespace means "the namespace of whoever holds this
/// reference". A reference without a non-empty name points at nothing and
/// must be treated as not found.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct ResourceReference {
    /// Namespace of the referenced resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Name of the referenced resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ResourceReference {
    /// Create a fully qualified reference
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: Some(name.into()),
        }
    }

    /// Create a reference relative to the holder's namespace
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: Some(name.into()),
        }
    }

    /// The referenced name, if present and non-empty
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref().filter(|n| !n.is_empty())
    }

    /// The referenced namespace, if present and non-empty
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref().filter(|n| !n.is_empty())
    }

    /// True when the reference does not point at anything
    pub fn is_empty(&self) -> bool {
        self.name().is_none()
    }

    /// Qualify this reference against `namespace`.
    ///
    /// Returns `None` for an empty reference; otherwise the same name with
    /// the namespace defaulted to `namespace` when absent.
    pub fn qualified_in(&self, namespace: &str) -> Option<ResourceReference> {
        let name = self.name()?;
        Some(ResourceReference::new(
            self.namespace().unwrap_or(namespace),
            name,
        ))
    }
}

impl fmt::Display for ResourceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.namespace(), self.name()) {
            (Some(ns), Some(name)) => write!(f, "{ns}/{name}"),
            (None, Some(name)) => write!(f, "{name}"),
            _ => write!(f, "<none>"),
        }
    }
}
