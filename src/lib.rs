//! IoT Device Provisioning Engine
//!
//! Onboards a device onto a network through a fixed workflow:
//! - Scan, select, connect, authenticate, configure and verify
//! - Cancellation and per-step recovery (retry, reconfigure, pick another device)
//! - Reconnection of dropped links with configurable backoff
//!
//! Radios and persistence are reached through the collaborator traits in
//! [`backend`].

pub mod backend;
pub mod config;
pub mod core;
pub mod provisioning;
pub mod reconnection;

pub use crate::core::{
    context::ProvisioningContext,
    error::{CollaboratorError, ConnectionStrategyError, ProvisioningFault, SessionError},
    types::{DeviceId, DiscoveredDevice, NetworkConfiguration, ProvisionedDevice, TransportKind},
};
pub use provisioning::{
    ProvisioningEvent, ProvisioningHandle, ProvisioningResult, ProvisioningState,
    ProvisioningStateMachine, StateKind,
};
pub use reconnection::{
    ConnectionStrategy, ReconnectionParameters, ReconnectionResult, ReconnectionStrategy,
};
