//! In-memory collaborators for unit tests

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use kube::ResourceExt;
use tokio::sync::Notify;

use trellis_common::crd::{
    CapabilityPhase, ProvidedCapability, ProvidedCapabilityStatus, ServerStatus,
    MAIN_SERVER_STATUS,
};
use trellis_common::kube_utils::matches_labels;
use trellis_common::Error;

use crate::error::WatchError;
use crate::store::CapabilityStore;
use crate::watch::{Locator, Subscription, WatchEvent, WatchSource};

type EventSender<K> = UnboundedSender<Result<WatchEvent<K>, WatchError>>;

/// A `WatchSource` with fixed current state whose events are fed by the test
pub(crate) struct ChannelSource<K> {
    current: Vec<K>,
    stall_reads: bool,
    sender: Mutex<Option<EventSender<K>>>,
    subscriptions: AtomicUsize,
    subscribed: Notify,
}

impl<K> ChannelSource<K> {
    pub(crate) fn with_current(current: Vec<K>) -> Self {
        Self {
            current,
            stall_reads: false,
            sender: Mutex::new(None),
            subscriptions: AtomicUsize::new(0),
            subscribed: Notify::new(),
        }
    }

    pub(crate) fn empty() -> Self {
        Self::with_current(Vec::new())
    }

    /// A source whose reads of current state never complete
    pub(crate) fn stalled() -> Self {
        Self {
            stall_reads: true,
            ..Self::empty()
        }
    }

    pub(crate) fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// Resolves once a subscription has been opened
    pub(crate) async fn wait_for_subscriber(&self) {
        loop {
            let notified = self.subscribed.notified();
            if self.sender.lock().unwrap().is_some() {
                return;
            }
            notified.await;
        }
    }

    pub(crate) fn send(&self, event: Result<WatchEvent<K>, WatchError>) {
        if let Some(tx) = self.sender.lock().unwrap().as_ref() {
            let _ = tx.unbounded_send(event);
        }
    }

    /// End the event stream without an error
    pub(crate) fn close(&self) {
        self.sender.lock().unwrap().take();
    }

    /// Whether the subscriber has let go of its end
    pub(crate) fn is_released(&self) -> bool {
        self.sender
            .lock()
            .unwrap()
            .as_ref()
            .map_or(true, |tx| tx.is_closed())
    }
}

#[async_trait]
impl<K> WatchSource<K> for ChannelSource<K>
where
    K: Clone + Send + Sync + 'static,
{
    async fn current(&self, _locator: &Locator) -> Result<Vec<K>, WatchError> {
        if self.stall_reads {
            futures::future::pending::<()>().await;
        }
        Ok(self.current.clone())
    }

    async fn subscribe(&self, locator: &Locator) -> Result<Subscription<K>, WatchError> {
        let (tx, rx) = unbounded();
        *self.sender.lock().unwrap() = Some(tx);
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        self.subscribed.notify_waiters();
        Ok(Subscription::new(locator.clone(), rx.boxed()))
    }
}

/// What the fake capability controller does with a newly created capability
#[derive(Clone, Copy, Debug)]
pub(crate) enum Reaction {
    /// Mark it Successful with a service and admin secret
    Succeed,
    /// Like `Succeed`, and record an ingress too
    SucceedWithIngress,
    /// Mark it Failed
    Fail,
    /// Leave it Requested forever
    Ignore,
    /// Close every open subscription on it
    BreakStream,
}

/// Delay before the fake controller reacts to a creation
pub(crate) const REACTION_DELAY: Duration = Duration::from_millis(100);

#[derive(Default)]
struct ClusterState {
    objects: BTreeMap<(String, String), ProvidedCapability>,
    watchers: Vec<(Locator, EventSender<ProvidedCapability>)>,
}

/// An in-memory cluster holding ProvidedCapabilities, with a fake
/// controller that reacts to each creation after `REACTION_DELAY`
#[derive(Clone)]
pub(crate) struct FakeCluster {
    operator_namespace: String,
    reaction: Reaction,
    state: Arc<Mutex<ClusterState>>,
    created: Arc<AtomicUsize>,
}

impl FakeCluster {
    pub(crate) fn new(operator_namespace: &str, reaction: Reaction) -> Self {
        Self {
            operator_namespace: operator_namespace.to_string(),
            reaction,
            state: Arc::new(Mutex::new(ClusterState::default())),
            created: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Seed an existing capability
    pub(crate) fn insert(&self, capability: ProvidedCapability) {
        let key = key_of(&capability);
        self.state.lock().unwrap().objects.insert(key, capability);
    }

    pub(crate) fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub(crate) fn all(&self) -> Vec<ProvidedCapability> {
        self.state.lock().unwrap().objects.values().cloned().collect()
    }

    fn react(&self, key: (String, String)) {
        let reaction = self.reaction;
        if matches!(reaction, Reaction::Ignore) {
            return;
        }
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            tokio::time::sleep(REACTION_DELAY).await;
            let mut state = state.lock().unwrap();
            let (namespace, name) = key.clone();
            let matches_key = |locator: &Locator| {
                matches!(locator, Locator::Named { namespace: n, name: m } if *n == namespace && *m == name)
            };

            if matches!(reaction, Reaction::BreakStream) {
                state.watchers.retain(|(locator, _)| !matches_key(locator));
                return;
            }

            let Some(object) = state.objects.get_mut(&key) else {
                return;
            };
            object.status = Some(reacted_status(reaction, &key.1));
            let updated = object.clone();
            state.watchers.retain(|(_, tx)| !tx.is_closed());
            for (locator, tx) in &state.watchers {
                if matches_key(locator) {
                    let _ = tx.unbounded_send(Ok(WatchEvent::Applied(updated.clone())));
                }
            }
        });
    }
}

fn reacted_status(reaction: Reaction, name: &str) -> ProvidedCapabilityStatus {
    let mut status = ProvidedCapabilityStatus::default();
    match reaction {
        Reaction::Fail => {
            status.phase = CapabilityPhase::Failed;
            status.message = Some("deployment failed".to_string());
        }
        _ => {
            status.phase = CapabilityPhase::Successful;
            status.server_status.insert(
                MAIN_SERVER_STATUS.to_string(),
                ServerStatus {
                    service_name: Some(name.to_string()),
                    ingress_name: matches!(reaction, Reaction::SucceedWithIngress)
                        .then(|| format!("{}-ingress", name)),
                    admin_secret_name: Some(format!("{}-admin", name)),
                },
            );
        }
    }
    status
}

/// The API server's answer to creating a name that is taken
pub(crate) fn already_exists(name: &str) -> Error {
    kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("providedcapabilities \"{}\" already exists", name),
        reason: "AlreadyExists".to_string(),
        code: 409,
    })
    .into()
}

fn key_of(capability: &ProvidedCapability) -> (String, String) {
    (
        capability.namespace().unwrap_or_default(),
        capability.name_any(),
    )
}

#[async_trait]
impl CapabilityStore for FakeCluster {
    fn operator_namespace(&self) -> String {
        self.operator_namespace.clone()
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ProvidedCapability>, Error> {
        let state = self.state.lock().unwrap();
        Ok(state
            .objects
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn list_in_namespace(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<ProvidedCapability>, Error> {
        let state = self.state.lock().unwrap();
        Ok(state
            .objects
            .iter()
            .filter(|((ns, _), c)| ns == namespace && matches_labels(c.labels(), labels))
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn list_all(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<ProvidedCapability>, Error> {
        let state = self.state.lock().unwrap();
        Ok(state
            .objects
            .values()
            .filter(|c| matches_labels(c.labels(), labels))
            .cloned()
            .collect())
    }

    async fn create(&self, capability: &ProvidedCapability) -> Result<ProvidedCapability, Error> {
        let key = key_of(capability);
        {
            let mut state = self.state.lock().unwrap();
            if state.objects.contains_key(&key) {
                return Err(already_exists(&key.1));
            }
            state.objects.insert(key.clone(), capability.clone());
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        self.react(key);
        Ok(capability.clone())
    }
}

#[async_trait]
impl WatchSource<ProvidedCapability> for FakeCluster {
    async fn current(&self, locator: &Locator) -> Result<Vec<ProvidedCapability>, WatchError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .objects
            .iter()
            .filter(|((ns, name), c)| match locator {
                Locator::Named {
                    namespace,
                    name: wanted,
                } => ns == namespace && name == wanted,
                Locator::Labeled {
                    namespace,
                    selector,
                } => ns == namespace && matches_labels(c.labels(), selector),
            })
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn subscribe(
        &self,
        locator: &Locator,
    ) -> Result<Subscription<ProvidedCapability>, WatchError> {
        let (tx, rx) = unbounded();
        self.state
            .lock()
            .unwrap()
            .watchers
            .push((locator.clone(), tx));
        Ok(Subscription::new(locator.clone(), rx.boxed()))
    }
}
