//! Capability provisioning for Trellis
//!
//! Resolves a resource's dependency on a shared capability (a database, an
//! identity provider) to a concrete ProvidedCapability, creating it and
//! waiting for it to become ready when it does not exist yet:
//! - `watch`: wait on a named or label-selected resource until a predicate holds
//! - `reference`: pick a concrete target when a dependency is left unspecified
//! - `resolver`: lookup strategy and canonical naming per scope
//! - `provisioner`: resolve, validate, or create and wait
//! - `pod`: readiness and completion handling for workload pods

pub mod error;
pub mod pod;
pub mod provisioner;
pub mod reference;
pub mod resolver;
pub mod result;
pub mod store;
pub mod watch;

#[cfg(test)]
mod testing;

pub use error::{PodError, ProvisioningError, WatchError};
pub use pod::{PodOperations, PodResult, PodState, PodStore};
pub use provisioner::CapabilityProvisioner;
pub use reference::{CapabilityDiscovery, DefaultsSource, ReferenceResolver};
pub use resolver::{CapabilityLookup, Requester};
pub use result::ProvisioningResult;
pub use store::CapabilityStore;
pub use watch::{Locator, ReadinessWatcher, Subscription, WatchEvent, WatchSource};
