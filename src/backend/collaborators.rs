//! Collaborator service traits
//!
//! The provisioning engine never talks to radios directly. Each capability is
//! reached through one of these traits so adapters (BLE, Wi-Fi, Zigbee, MQTT)
//! and test doubles can be swapped in.

use serde_json::Value;
use trait_variant::make;

use crate::core::{
    error::{CollaboratorResult, StorageResult, StrategyResult},
    proof::PairingProof,
    types::{DiscoveredDevice, NetworkConfiguration, ProvisionedDevice},
};
use crate::reconnection::result::{LinkQuality, NetworkSnapshot};

/// Discovers devices that are ready for provisioning
#[make(Send)]
pub trait ScanningService: Send + Sync + 'static {
    /// Scan for devices
    ///
    /// The scanner owns the scan timeout and reports it as
    /// [`CollaboratorError::Timeout`](crate::core::error::CollaboratorError::Timeout).
    async fn start_scanning(&self) -> CollaboratorResult<Vec<DiscoveredDevice>>;

    /// Stop an ongoing scan. Must be cheap and idempotent.
    fn stop_scanning(&self);
}

/// Opens and closes the provisioning link to a device
#[make(Send)]
pub trait ConnectionService: Send + Sync + 'static {
    async fn connect(&self, device: &DiscoveredDevice) -> CollaboratorResult<()>;

    async fn disconnect(&self, device: &DiscoveredDevice) -> CollaboratorResult<()>;
}

/// Authenticates the phone against the device
#[make(Send)]
pub trait AuthenticationService: Send + Sync + 'static {
    /// Authenticate, optionally presenting a setup-code proof
    async fn authenticate(
        &self,
        device: &DiscoveredDevice,
        proof: Option<PairingProof>,
    ) -> CollaboratorResult<()>;
}

/// Pushes network configuration to the device
#[make(Send)]
pub trait ConfigurationService: Send + Sync + 'static {
    async fn configure(
        &self,
        device: &DiscoveredDevice,
        network: &NetworkConfiguration,
    ) -> CollaboratorResult<()>;
}

/// Confirms the device joined the network
#[make(Send)]
pub trait VerificationService: Send + Sync + 'static {
    async fn verify(&self, device: &DiscoveredDevice) -> CollaboratorResult<()>;
}

/// Persists devices that completed provisioning
#[make(Send)]
pub trait DeviceStorage: Send + Sync + 'static {
    async fn save_provisioned_device(&self, device: &ProvisionedDevice) -> StorageResult<()>;
}

/// Connect primitive used once per reconnection attempt
#[make(Send)]
pub trait TransportConnector: Send + Sync + 'static {
    /// Try to re-establish the link for `service_id` using its original configuration
    async fn attempt_connection(
        &self,
        service_id: &str,
        configuration: &Value,
    ) -> StrategyResult<LinkQuality>;

    /// Snapshot of the network as seen by the transport
    fn network_state(&self) -> NetworkSnapshot;
}

/// Everything a provisioning session needs besides storage
pub trait ProvisioningBackend:
    ScanningService
    + ConnectionService
    + AuthenticationService
    + ConfigurationService
    + VerificationService
    + Send
{
}

impl<T> ProvisioningBackend for T where
    T: ScanningService
        + ConnectionService
        + AuthenticationService
        + ConfigurationService
        + VerificationService
        + Send
{
}
