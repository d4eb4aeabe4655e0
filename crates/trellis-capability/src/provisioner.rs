//! Resolving a requirement to a provisioned capability
//!
//! `provide` looks for an existing capability matching the requirement and
//! validates it. When none exists it builds one with the canonical name for
//! the scope, creates it, waits for the capability's controller to settle
//! it, and resolves again.
//!
//! Lookup and creation are not atomic. Deterministic names and the API
//! server's name uniqueness keep dedicated, specified, namespace and cluster
//! capabilities single; two concurrent `labeled` requests can each create
//! their own capability.

use std::sync::Arc;
use std::time::Duration;

use kube::ResourceExt;
use tracing::{debug, info, warn};

use trellis_common::crd::{CapabilityPhase, CapabilityRequirement, ProvidedCapability};
use trellis_common::kube_utils::is_already_exists;
use trellis_common::Error;

use crate::error::ProvisioningError;
use crate::reference::DefaultsSource;
use crate::resolver::{build_capability, plan_lookup, CapabilityLookup, Requester};
use crate::result::ProvisioningResult;
use crate::store::CapabilityStore;
use crate::watch::{Locator, ReadinessWatcher};

/// Provides capabilities to requesting resources
pub struct CapabilityProvisioner {
    store: Arc<dyn CapabilityStore>,
    watcher: ReadinessWatcher<ProvidedCapability>,
    defaults: Arc<dyn DefaultsSource>,
}

impl CapabilityProvisioner {
    pub fn new(
        store: Arc<dyn CapabilityStore>,
        watcher: ReadinessWatcher<ProvidedCapability>,
        defaults: Arc<dyn DefaultsSource>,
    ) -> Self {
        Self {
            store,
            watcher,
            defaults,
        }
    }

    /// Resolve `requirement` for `requester`, creating the capability if needed
    ///
    /// Waits at most `timeout` for a capability that is still being
    /// provisioned, whether it was found or created by this call.
    pub async fn provide(
        &self,
        requester: &Requester,
        requirement: &CapabilityRequirement,
        timeout: Duration,
    ) -> Result<ProvisioningResult, ProvisioningError> {
        let lookup = plan_lookup(requester, requirement)?;

        if let Some(existing) = self.find(&lookup).await? {
            debug!(
                requester = %requester.name,
                namespace = %requester.namespace,
                capability = %existing.name_any(),
                "found existing capability"
            );
            validate(requirement, &existing)?;
            let settled = if existing.phase().is_terminal() {
                existing
            } else {
                self.wait_until_settled(&existing, timeout).await?
            };
            return ProvisioningResult::from_capability(settled);
        }

        let defaults = self.defaults.load().await?;
        let capability = build_capability(
            requester,
            requirement,
            &defaults,
            &self.store.operator_namespace(),
        )?;
        info!(
            requester = %requester.name,
            namespace = %capability.namespace().unwrap_or_default(),
            capability = %capability.name_any(),
            scope = %requirement.effective_scope(),
            "creating capability"
        );
        let target = match self.store.create(&capability).await {
            Ok(_) => capability,
            Err(Error::Kube { source }) if is_already_exists(&source) => {
                self.adopt_existing(requirement, &capability).await?
            }
            Err(e) => return Err(e.into()),
        };

        let settled = self.wait_until_settled(&target, timeout).await?;
        if settled.phase() == CapabilityPhase::Failed {
            return ProvisioningResult::from_capability(settled);
        }

        match self.find(&lookup).await? {
            Some(resolved) => ProvisioningResult::from_capability(resolved),
            None => {
                warn!(capability = %target.name_any(), "capability settled but lookup misses it");
                Err(ProvisioningError::Inconsistent {
                    namespace: target.namespace().unwrap_or_default(),
                    name: target.name_any(),
                    message: "provisioned capability is not found by its lookup".to_string(),
                })
            }
        }
    }

    /// Take over a capability someone else created under the same name
    async fn adopt_existing(
        &self,
        requirement: &CapabilityRequirement,
        capability: &ProvidedCapability,
    ) -> Result<ProvidedCapability, ProvisioningError> {
        let namespace = capability.namespace().unwrap_or_default();
        let name = capability.name_any();
        info!(%namespace, capability = %name, "capability already exists, using it");
        let existing = self.store.get(&namespace, &name).await?.ok_or_else(|| {
            ProvisioningError::Inconsistent {
                namespace: namespace.clone(),
                name: name.clone(),
                message: "create reported the name taken but it cannot be read".to_string(),
            }
        })?;
        validate(requirement, &existing)?;
        Ok(existing)
    }

    async fn find(
        &self,
        lookup: &CapabilityLookup,
    ) -> Result<Option<ProvidedCapability>, ProvisioningError> {
        let found = match lookup {
            CapabilityLookup::ByName { namespace, name } => self.store.get(namespace, name).await?,
            CapabilityLookup::ByLabels { namespace, labels } => {
                let mut matches = match namespace {
                    Some(ns) => self.store.list_in_namespace(ns, labels).await?,
                    None => self.store.list_all(labels).await?,
                };
                if matches.len() > 1 {
                    debug!(count = matches.len(), "several capabilities match, taking the first");
                }
                matches.sort_by_key(|c| (c.namespace().unwrap_or_default(), c.name_any()));
                matches.into_iter().next()
            }
        };
        Ok(found)
    }

    async fn wait_until_settled(
        &self,
        capability: &ProvidedCapability,
        timeout: Duration,
    ) -> Result<ProvidedCapability, ProvisioningError> {
        let locator = Locator::named(
            capability.namespace().unwrap_or_default(),
            capability.name_any(),
        );
        debug!(%locator, timeout = ?timeout, "waiting for capability to settle");
        let settled = self
            .watcher
            .wait_for(&locator, |c| c.phase().is_terminal(), timeout)
            .await?;
        debug!(%locator, phase = ?settled.phase(), "capability settled");
        Ok(settled)
    }
}

fn validate(
    requirement: &CapabilityRequirement,
    capability: &ProvidedCapability,
) -> Result<(), ProvisioningError> {
    let qualified = format!(
        "{}/{}",
        capability.namespace().unwrap_or_default(),
        capability.name_any()
    );

    let expected_scope = requirement.effective_scope();
    if capability.scope_label() != Some(expected_scope.label_value()) {
        return Err(ProvisioningError::ScopeMismatch {
            capability: qualified,
            expected: expected_scope.label_value().to_string(),
            found: capability.scope_label().map(str::to_string),
        });
    }

    if let Some(implementation) = requirement.implementation {
        if capability.implementation_label() != Some(implementation.label_value()) {
            return Err(ProvisioningError::ImplementationMismatch {
                capability: qualified,
                expected: implementation.label_value().to_string(),
                found: capability.implementation_label().map(str::to_string),
            });
        }
    }
    Ok(())
}
