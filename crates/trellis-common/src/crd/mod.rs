//! Custom Resource Definitions for Trellis
//!
//! This module contains the CRD and value types the capability engine
//! reads and writes.

mod capability;
mod types;

pub use capability::{
    CapabilityPhase, CapabilityProvisioningStrategy, CapabilityRequirement, CapabilityScope,
    ProvidedCapability, ProvidedCapabilityStatus, ServerStatus, StandardCapability,
    StandardCapabilityImplementation, MAIN_SERVER_STATUS,
};
pub use types::ResourceReference;
