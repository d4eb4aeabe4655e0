//! Readiness watching over Kubernetes resources
//!
//! `ReadinessWatcher::wait_for` blocks until a resource (or one of a
//! label-selected set) satisfies a predicate:
//! - current state is checked first; a match returns without subscribing
//! - otherwise every event is checked in arrival order until one matches
//! - the wait is bounded by a timeout measured from the call
//!
//! A stream error or an unexpected end of the stream fails the wait straight
//! away with `WatchError::Subscription`, which callers can tell apart from
//! `WatchError::Timeout`. The subscription is dropped on every exit path,
//! including when the caller drops the future or the predicate panics.

use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, ListParams};
use kube::runtime::watcher::{self, Event};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tracing::{debug, trace};

use trellis_common::kube_utils::label_selector;

use crate::error::WatchError;

/// Addresses the resource(s) a wait is about
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Locator {
    /// A single resource by name
    Named { namespace: String, name: String },
    /// Every resource in a namespace carrying the given labels
    Labeled {
        namespace: String,
        selector: BTreeMap<String, String>,
    },
}

impl Locator {
    /// Locate a single resource by name
    pub fn named(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Named {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Locate resources by label
    pub fn labeled(namespace: impl Into<String>, selector: BTreeMap<String, String>) -> Self {
        Self::Labeled {
            namespace: namespace.into(),
            selector,
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            Self::Named { namespace, .. } | Self::Labeled { namespace, .. } => namespace,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named { namespace, name } => write!(f, "{}/{}", namespace, name),
            Self::Labeled {
                namespace,
                selector,
            } => write!(f, "{}/[{}]", namespace, label_selector(selector)),
        }
    }
}

/// A change observed on a watched resource
#[derive(Clone, Debug, PartialEq)]
pub enum WatchEvent<K> {
    /// Created or modified
    Applied(K),
    /// Deleted; carries the last known state
    Deleted(K),
}

impl<K> WatchEvent<K> {
    pub fn object(&self) -> &K {
        match self {
            Self::Applied(k) | Self::Deleted(k) => k,
        }
    }

    pub fn into_object(self) -> K {
        match self {
            Self::Applied(k) | Self::Deleted(k) => k,
        }
    }
}

/// Stream of events backing a subscription
pub type EventStream<K> = BoxStream<'static, Result<WatchEvent<K>, WatchError>>;

/// An open watch on a locator
///
/// Dropping the subscription drops the underlying stream, which releases the
/// watch on the API server (or the test channel).
pub struct Subscription<K> {
    locator: Locator,
    events: EventStream<K>,
}

impl<K> Subscription<K> {
    pub fn new(locator: Locator, events: EventStream<K>) -> Self {
        Self { locator, events }
    }

    pub fn locator(&self) -> &Locator {
        &self.locator
    }

    /// Next event, or `None` once the stream has ended
    pub async fn next_event(&mut self) -> Option<Result<WatchEvent<K>, WatchError>> {
        self.events.next().await
    }
}

impl<K> Drop for Subscription<K> {
    fn drop(&mut self) {
        debug!(locator = %self.locator, "closing subscription");
    }
}

/// Source of current state and change events for one resource kind
#[async_trait]
pub trait WatchSource<K>: Send + Sync
where
    K: Send + 'static,
{
    /// Resources currently matching the locator
    async fn current(&self, locator: &Locator) -> Result<Vec<K>, WatchError>;

    /// Open a subscription to changes matching the locator
    async fn subscribe(&self, locator: &Locator) -> Result<Subscription<K>, WatchError>;
}

/// Waits for resources to reach a wanted state
pub struct ReadinessWatcher<K> {
    source: Arc<dyn WatchSource<K>>,
}

impl<K> Clone for ReadinessWatcher<K> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
        }
    }
}

impl<K> ReadinessWatcher<K>
where
    K: Send + 'static,
{
    pub fn new(source: Arc<dyn WatchSource<K>>) -> Self {
        Self { source }
    }

    /// Wait until a resource matching `locator` satisfies `predicate`
    ///
    /// Returns the first state for which the predicate held. Deletion events
    /// are offered to the predicate like any other event.
    pub async fn wait_for<P>(
        &self,
        locator: &Locator,
        predicate: P,
        timeout: Duration,
    ) -> Result<K, WatchError>
    where
        P: Fn(&K) -> bool + Send + Sync,
    {
        let start = Instant::now();
        let deadline = start + timeout;
        let timed_out = || {
            let elapsed = start.elapsed();
            debug!(%locator, elapsed = ?elapsed, "timed out waiting");
            WatchError::Timeout {
                locator: locator.clone(),
                elapsed,
            }
        };

        let current = tokio::time::timeout_at(deadline, self.source.current(locator))
            .await
            .map_err(|_| timed_out())??;
        if let Some(ready) = current.into_iter().find(|k| predicate(k)) {
            debug!(%locator, "already satisfied, not subscribing");
            return Ok(ready);
        }

        let mut subscription = tokio::time::timeout_at(deadline, self.source.subscribe(locator))
            .await
            .map_err(|_| timed_out())??;
        debug!(%locator, timeout = ?timeout, "waiting for events");

        loop {
            let event = match tokio::time::timeout_at(deadline, subscription.next_event()).await {
                Ok(Some(Ok(event))) => event,
                Ok(Some(Err(e))) => return Err(e),
                Ok(None) => {
                    return Err(WatchError::Subscription {
                        locator: locator.clone(),
                        message: "event stream ended".to_string(),
                    })
                }
                Err(_) => return Err(timed_out()),
            };

            if predicate(event.object()) {
                debug!(%locator, elapsed = ?start.elapsed(), "condition met");
                return Ok(event.into_object());
            }
            trace!(%locator, "event did not satisfy condition");
        }
    }
}

/// `WatchSource` backed by the Kubernetes API
pub struct KubeWatchSource<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeWatchSource<K> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

#[async_trait]
impl<K> WatchSource<K> for KubeWatchSource<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    async fn current(&self, locator: &Locator) -> Result<Vec<K>, WatchError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), locator.namespace());
        let result: Result<Vec<K>, kube::Error> = match locator {
            Locator::Named { name, .. } => api.get_opt(name).await.map(|o| o.into_iter().collect()),
            Locator::Labeled { selector, .. } => api
                .list(&ListParams::default().labels(&label_selector(selector)))
                .await
                .map(|list| list.items),
        };
        result.map_err(|e| WatchError::Store {
            locator: locator.clone(),
            source: e.into(),
        })
    }

    async fn subscribe(&self, locator: &Locator) -> Result<Subscription<K>, WatchError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), locator.namespace());
        let config = match locator {
            Locator::Named { name, .. } => {
                watcher::Config::default().fields(&format!("metadata.name={}", name))
            }
            Locator::Labeled { selector, .. } => {
                watcher::Config::default().labels(&label_selector(selector))
            }
        };

        let stream_locator = locator.clone();
        let events = watcher::watcher(api, config)
            .filter_map(move |event| {
                let locator = stream_locator.clone();
                async move {
                    match event {
                        Ok(Event::Apply(k)) | Ok(Event::InitApply(k)) => {
                            Some(Ok(WatchEvent::Applied(k)))
                        }
                        Ok(Event::Delete(k)) => Some(Ok(WatchEvent::Deleted(k))),
                        Ok(Event::Init) | Ok(Event::InitDone) => None,
                        Err(e) => Some(Err(WatchError::Subscription {
                            locator,
                            message: e.to_string(),
                        })),
                    }
                }
            })
            .boxed();

        debug!(%locator, "opened subscription");
        Ok(Subscription::new(locator.clone(), events))
    }
}
