//! Runtime configuration for capability provisioning
//!
//! Every setting has a default and can be overridden through an environment
//! variable. A value that does not parse falls back to the default with a
//! warning instead of failing startup.

use std::time::Duration;

use tracing::warn;

use crate::{DEFAULT_CAPABILITIES_CONFIGMAP, TRELLIS_SYSTEM_NAMESPACE};

/// Environment variable naming the operator's namespace
pub const ENV_OPERATOR_NAMESPACE: &str = "TRELLIS_OPERATOR_NAMESPACE";
/// Environment variable naming the defaults ConfigMap
pub const ENV_DEFAULTS_CONFIGMAP: &str = "TRELLIS_DEFAULTS_CONFIGMAP";
/// Environment variable for the capability readiness timeout in seconds
pub const ENV_CAPABILITY_TIMEOUT: &str = "TRELLIS_CAPABILITY_TIMEOUT_SECONDS";
/// Environment variable for the pod readiness timeout in seconds
pub const ENV_POD_READINESS_TIMEOUT: &str = "TRELLIS_POD_READINESS_TIMEOUT_SECONDS";
/// Environment variable for the pod completion timeout in seconds
pub const ENV_POD_COMPLETION_TIMEOUT: &str = "TRELLIS_POD_COMPLETION_TIMEOUT_SECONDS";
/// Environment variable for the pod shutdown timeout in seconds
pub const ENV_POD_SHUTDOWN_TIMEOUT: &str = "TRELLIS_POD_SHUTDOWN_TIMEOUT_SECONDS";

const DEFAULT_CAPABILITY_TIMEOUT: Duration = Duration::from_secs(600);
const DEFAULT_POD_READINESS_TIMEOUT: Duration = Duration::from_secs(600);
const DEFAULT_POD_COMPLETION_TIMEOUT: Duration = Duration::from_secs(600);
const DEFAULT_POD_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(120);

/// Settings for the capability provisioner and pod operations
#[derive(Clone, Debug, PartialEq)]
pub struct ProvisioningConfig {
    /// Namespace the operator runs in; cluster-scoped capabilities live here
    pub operator_namespace: String,
    /// ConfigMap in the operator namespace holding default references
    pub defaults_configmap: String,
    /// How long to wait for a capability to reach a terminal phase
    pub capability_timeout: Duration,
    /// How long to wait for a pod to become ready
    pub pod_readiness_timeout: Duration,
    /// How long to wait for a pod to run to completion
    pub pod_completion_timeout: Duration,
    /// How long to wait for deleted pods to disappear
    pub pod_shutdown_timeout: Duration,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl ProvisioningConfig {
    /// Build the configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let seconds = |key: &str, default: Duration| match lookup(key) {
            None => default,
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) => Duration::from_secs(secs),
                Err(_) => {
                    warn!(variable = key, value = %raw, default = ?default, "ignoring unparseable timeout");
                    default
                }
            },
        };

        Self {
            operator_namespace: text(ENV_OPERATOR_NAMESPACE, TRELLIS_SYSTEM_NAMESPACE),
            defaults_configmap: text(ENV_DEFAULTS_CONFIGMAP, DEFAULT_CAPABILITIES_CONFIGMAP),
            capability_timeout: seconds(ENV_CAPABILITY_TIMEOUT, DEFAULT_CAPABILITY_TIMEOUT),
            pod_readiness_timeout: seconds(ENV_POD_READINESS_TIMEOUT, DEFAULT_POD_READINESS_TIMEOUT),
            pod_completion_timeout: seconds(ENV_POD_COMPLETION_TIMEOUT, DEFAULT_POD_COMPLETION_TIMEOUT),
            pod_shutdown_timeout: seconds(ENV_POD_SHUTDOWN_TIMEOUT, DEFAULT_POD_SHUTDOWN_TIMEOUT),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = ProvisioningConfig::from_lookup(|_| None);
        assert_eq!(config.operator_namespace, "trellis-system");
        assert_eq!(config.defaults_configmap, "trellis-default-capabilities");
        assert_eq!(config.capability_timeout, Duration::from_secs(600));
        assert_eq!(config.pod_readiness_timeout, Duration::from_secs(600));
        assert_eq!(config.pod_completion_timeout, Duration::from_secs(600));
        assert_eq!(config.pod_shutdown_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_overrides_from_environment() {
        let config = ProvisioningConfig::from_lookup(lookup_from(&[
            (ENV_OPERATOR_NAMESPACE, "platform"),
            (ENV_DEFAULTS_CONFIGMAP, "capability-defaults"),
            (ENV_CAPABILITY_TIMEOUT, "30"),
            (ENV_POD_SHUTDOWN_TIMEOUT, " 5 "),
        ]));
        assert_eq!(config.operator_namespace, "platform");
        assert_eq!(config.defaults_configmap, "capability-defaults");
        assert_eq!(config.capability_timeout, Duration::from_secs(30));
        assert_eq!(config.pod_shutdown_timeout, Duration::from_secs(5));
        assert_eq!(config.pod_completion_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let config = ProvisioningConfig::from_lookup(lookup_from(&[
            (ENV_CAPABILITY_TIMEOUT, "ten minutes"),
            (ENV_OPERATOR_NAMESPACE, "  "),
        ]));
        assert_eq!(config.capability_timeout, Duration::from_secs(600));
        assert_eq!(config.operator_namespace, "trellis-system");
    }
}
