//! Capability-specific error types

use std::time::Duration;

use crate::watch::Locator;

/// Why a readiness wait ended without its predicate holding
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("timed out after {elapsed:?} waiting on {locator}")]
    Timeout { locator: Locator, elapsed: Duration },

    #[error("subscription to {locator} failed: {message}")]
    Subscription { locator: Locator, message: String },

    #[error("reading {locator} failed: {source}")]
    Store {
        locator: Locator,
        source: trellis_common::Error,
    },
}

impl WatchError {
    /// Whether this error is a timeout rather than a failure
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    #[error("{capability} capability has scope '{}', expected '{expected}'", .found.as_deref().unwrap_or("<none>"))]
    ScopeMismatch {
        capability: String,
        expected: String,
        found: Option<String>,
    },

    #[error("{capability} capability has implementation '{}', expected '{expected}'", .found.as_deref().unwrap_or("<none>"))]
    ImplementationMismatch {
        capability: String,
        expected: String,
        found: Option<String>,
    },

    #[error("a labeled {capability} requirement needs a non-empty selector")]
    MissingSelector { capability: String },

    #[error("a specified {capability} requirement needs a capability reference")]
    MissingSpecifiedReference { capability: String },

    #[error("requester '{0}' has no namespace")]
    MissingNamespace(String),

    #[error("capability {namespace}/{name} failed: {message}")]
    CreationFailed {
        namespace: String,
        name: String,
        message: String,
    },

    #[error("capability did not become ready: {source}")]
    TimedOut { source: WatchError },

    #[error("{0}")]
    Watch(WatchError),

    #[error("capability {namespace}/{name} is inconsistent: {message}")]
    Inconsistent {
        namespace: String,
        name: String,
        message: String,
    },

    #[error("{0}")]
    Common(#[from] trellis_common::Error),
}

impl From<WatchError> for ProvisioningError {
    fn from(e: WatchError) -> Self {
        match e {
            WatchError::Timeout { .. } => Self::TimedOut { source: e },
            WatchError::Subscription { .. } => Self::Watch(e),
            // A failed read is not a broken stream; keep the store's error
            WatchError::Store { source, .. } => Self::Common(source),
        }
    }
}

impl ProvisioningError {
    /// Short machine-readable name, suitable for a status reason
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ScopeMismatch { .. } => "ScopeMismatch",
            Self::ImplementationMismatch { .. } => "ImplementationMismatch",
            Self::MissingSelector { .. } => "MissingSelector",
            Self::MissingSpecifiedReference { .. } => "MissingSpecifiedReference",
            Self::MissingNamespace(_) => "MissingNamespace",
            Self::CreationFailed { .. } => "CreationFailed",
            Self::TimedOut { .. } => "TimedOut",
            Self::Watch(_) => "SubscriptionFailed",
            Self::Inconsistent { .. } => "Inconsistent",
            Self::Common(_) => "Internal",
        }
    }

    /// Whether retrying the same requirement later can succeed
    ///
    /// Validation failures and a capability reported as Failed need a change
    /// to the requirement or the cluster before a retry helps.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ScopeMismatch { .. }
            | Self::ImplementationMismatch { .. }
            | Self::MissingSelector { .. }
            | Self::MissingSpecifiedReference { .. }
            | Self::MissingNamespace(_)
            | Self::CreationFailed { .. }
            | Self::Inconsistent { .. } => false,
            Self::TimedOut { .. } => true,
            Self::Watch(_) => true,
            Self::Common(e) => e.is_retryable(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PodError {
    #[error("{0}")]
    Watch(#[from] WatchError),

    #[error("{0}")]
    Common(#[from] trellis_common::Error),

    #[error("pod '{0}' has no namespace")]
    MissingNamespace(String),
}
