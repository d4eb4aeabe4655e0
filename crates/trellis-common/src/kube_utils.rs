//! Small Kubernetes helpers shared by the provisioning code

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use tracing::trace;

use crate::Error;

/// Condition status value meaning the condition holds
pub const STATUS_TRUE: &str = "True";

/// Pod condition type set once every container is ready
pub const CONDITION_READY: &str = "Ready";

/// Render labels as a Kubernetes label selector (`k1=v1,k2=v2`)
///
/// Keys come out in sorted order so the selector is stable.
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Check whether `actual` carries every label in `wanted`
pub fn matches_labels(actual: &BTreeMap<String, String>, wanted: &BTreeMap<String, String>) -> bool {
    wanted
        .iter()
        .all(|(k, v)| actual.get(k).is_some_and(|a| a == v))
}

/// Check whether a kube error is the API server reporting 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Check whether a kube error is the API server reporting 409 on create
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

/// Check if a condition with the given type has status "True"
pub fn has_condition<T>(conditions: Option<&[T]>, condition_type: &str) -> bool
where
    T: HasConditionFields,
{
    conditions
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_field() == condition_type && c.status_field() == STATUS_TRUE)
        })
        .unwrap_or(false)
}

/// Types with condition-like `type` and `status` fields
pub trait HasConditionFields {
    /// The condition type
    fn type_field(&self) -> &str;
    /// The condition status
    fn status_field(&self) -> &str;
}

impl HasConditionFields for k8s_openapi::api::core::v1::PodCondition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
}

/// Poll until `check_fn` returns `Ok(true)` or `timeout` passes
///
/// Errors from `check_fn` are treated as "not yet" and polling continues.
/// Runs on the tokio clock, so paused-time tests advance it for free.
pub async fn poll_until<F, Fut>(
    timeout: Duration,
    poll_interval: Duration,
    timeout_msg: impl Into<String>,
    mut check_fn: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let start = tokio::time::Instant::now();
    let timeout_msg = timeout_msg.into();

    loop {
        match check_fn().await {
            Ok(true) => return Ok(()),
            Ok(false) => trace!("poll condition not met yet"),
            Err(e) => trace!(error = %e, "poll check failed, retrying"),
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(Error::timeout(timeout_msg, elapsed));
        }

        tokio::time::sleep(poll_interval).await;
    }
}
