//! Readiness and completion handling for workload pods
//!
//! Pod state is derived from the pod object on every observation and never
//! cached. Waits go through the same `ReadinessWatcher` used for
//! capabilities; only `remove_and_wait` polls.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info};

use trellis_common::config::ProvisioningConfig;
use trellis_common::kube_utils::{
    has_condition, is_not_found, label_selector, poll_until, CONDITION_READY,
};
use trellis_common::{Error, FIELD_MANAGER};

use crate::error::PodError;
use crate::watch::{Locator, ReadinessWatcher};

/// Interval between checks while waiting for deleted pods to go away
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Coarse lifecycle state of a pod
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PodState {
    Pending,
    Ready,
    Completed,
    Failed,
}

impl PodState {
    /// Derive the state from a pod's phase, containers and conditions
    pub fn of(pod: &Pod) -> Self {
        let Some(status) = pod.status.as_ref() else {
            return Self::Pending;
        };
        match status.phase.as_deref() {
            Some("Succeeded") => return Self::Completed,
            Some("Failed") => return Self::Failed,
            _ => {}
        }

        let containers = status.container_statuses.as_deref().unwrap_or_default();
        let exit_codes: Option<Vec<i32>> = containers
            .iter()
            .map(|c| {
                c.state
                    .as_ref()
                    .and_then(|s| s.terminated.as_ref())
                    .map(|t| t.exit_code)
            })
            .collect();
        if let Some(codes) = exit_codes.filter(|codes| !codes.is_empty()) {
            return if codes.iter().any(|code| *code != 0) {
                Self::Failed
            } else {
                Self::Completed
            };
        }

        let all_ready = !containers.is_empty() && containers.iter().all(|c| c.ready);
        if all_ready || has_condition(status.conditions.as_deref(), CONDITION_READY) {
            Self::Ready
        } else {
            Self::Pending
        }
    }

    /// Ready to serve, or already done successfully
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Ready | Self::Completed)
    }

    /// Will not change any more
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for PodState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Ready => "Ready",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// A pod together with the state derived from it
#[derive(Clone, Debug, PartialEq)]
pub struct PodResult {
    pub pod: Pod,
    pub state: PodState,
}

impl From<Pod> for PodResult {
    fn from(pod: Pod) -> Self {
        let state = PodState::of(&pod);
        Self { pod, state }
    }
}

/// Creates, lists and deletes pods
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PodStore: Send + Sync {
    async fn create(&self, pod: &Pod) -> Result<Pod, Error>;

    async fn list(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>, Error>;

    /// Delete a pod; deleting one that is already gone succeeds
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), Error>;
}

/// `PodStore` backed by the Kubernetes API
pub struct KubePodStore {
    client: Client,
}

impl KubePodStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodStore for KubePodStore {
    async fn create(&self, pod: &Pod) -> Result<Pod, Error> {
        let namespace = pod.namespace().ok_or_else(|| {
            Error::validation_for_field(pod.name_any(), "metadata.namespace", "pod has no namespace")
        })?;
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &namespace);
        let pp = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        Ok(api.create(&pp, pod).await?)
    }

    async fn list(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().labels(&label_selector(labels));
        Ok(api.list(&lp).await?.items)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Pod lifecycle operations bounded by the configured timeouts
pub struct PodOperations {
    store: Arc<dyn PodStore>,
    watcher: ReadinessWatcher<Pod>,
    config: ProvisioningConfig,
}

impl PodOperations {
    pub fn new(
        store: Arc<dyn PodStore>,
        watcher: ReadinessWatcher<Pod>,
        config: ProvisioningConfig,
    ) -> Self {
        Self {
            store,
            watcher,
            config,
        }
    }

    /// Create the pod without waiting for it
    pub async fn start(&self, pod: &Pod) -> Result<Pod, PodError> {
        let created = self.store.create(pod).await?;
        info!(pod = %created.name_any(), namespace = ?created.namespace(), "started pod");
        Ok(created)
    }

    /// Create the pod and wait until it completes or fails
    pub async fn run_to_completion(&self, pod: &Pod) -> Result<PodResult, PodError> {
        let name = pod.name_any();
        let namespace = pod
            .namespace()
            .ok_or_else(|| PodError::MissingNamespace(name.clone()))?;
        self.start(pod).await?;

        let finished = self
            .watcher
            .wait_for(
                &Locator::named(namespace, name),
                |p| PodState::of(p).is_finished(),
                self.config.pod_completion_timeout,
            )
            .await?;
        let result = PodResult::from(finished);
        info!(pod = %result.pod.name_any(), state = %result.state, "pod finished");
        Ok(result)
    }

    /// Wait for the pod labeled `label=value` to be ready or completed
    pub async fn wait_for_pod(
        &self,
        namespace: &str,
        label: &str,
        value: &str,
    ) -> Result<PodResult, PodError> {
        let mut selector = BTreeMap::new();
        selector.insert(label.to_string(), value.to_string());
        let pod = self
            .watcher
            .wait_for(
                &Locator::labeled(namespace, selector),
                |p| PodState::of(p).is_available(),
                self.config.pod_readiness_timeout,
            )
            .await?;
        Ok(PodResult::from(pod))
    }

    /// The first pod carrying `labels`, if any
    pub async fn load_pod(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Option<Pod>, PodError> {
        Ok(self.store.list(namespace, labels).await?.into_iter().next())
    }

    /// Delete the completed pods carrying `labels`, keeping failed ones
    ///
    /// Returns how many pods were deleted.
    pub async fn remove_successfully_completed_pods(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<usize, PodError> {
        let mut removed = 0;
        for pod in self.store.list(namespace, labels).await? {
            if PodState::of(&pod) == PodState::Completed {
                self.store.delete(namespace, &pod.name_any()).await?;
                removed += 1;
            }
        }
        debug!(%namespace, removed, "removed completed pods");
        Ok(removed)
    }

    /// Delete every pod carrying `labels` and wait until none is left
    pub async fn remove_and_wait(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), PodError> {
        for pod in self.store.list(namespace, labels).await? {
            self.store.delete(namespace, &pod.name_any()).await?;
        }

        let store = Arc::clone(&self.store);
        poll_until(
            self.config.pod_shutdown_timeout,
            SHUTDOWN_POLL_INTERVAL,
            format!("pods [{}] in {} still present", label_selector(labels), namespace),
            || {
                let store = Arc::clone(&store);
                async move { Ok(store.list(namespace, labels).await?.is_empty()) }
            },
        )
        .await?;
        Ok(())
    }

    /// Delete a single pod
    pub async fn delete_pod(&self, pod: &Pod) -> Result<(), PodError> {
        let name = pod.name_any();
        let namespace = pod
            .namespace()
            .ok_or_else(|| PodError::MissingNamespace(name.clone()))?;
        self.store.delete(&namespace, &name).await?;
        debug!(%namespace, pod = %name, "deleted pod");
        Ok(())
    }
}
