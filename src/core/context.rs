//! Per-session provisioning data

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use futures::{FutureExt, future::BoxFuture};
use tracing::{debug, warn};

use crate::{
    backend::{DeviceStorage, ProvisioningBackend},
    core::{
        proof::PairingProof,
        types::{
            DeviceConfiguration, DiscoveredDevice, NetworkConfiguration, ProvisionedDevice,
            SessionId,
        },
    },
    provisioning::state::StateKind,
};

#[derive(Debug, Default)]
struct CleanupTracker {
    done: AtomicBool,
    runs: AtomicUsize,
}

/// Shared mutable data of one provisioning session
///
/// Owned by the session driver; states read it when entered and the driver
/// applies event data to it when a transition is accepted.
pub struct ProvisioningContext<B: ProvisioningBackend, S: DeviceStorage> {
    session_id: SessionId,
    backend: Arc<B>,
    storage: Arc<S>,
    discovered_devices: Vec<DiscoveredDevice>,
    selected_device: Option<DiscoveredDevice>,
    network_configuration: Option<NetworkConfiguration>,
    device_configuration: DeviceConfiguration,
    attempts: HashMap<StateKind, u32>,
    cleanup: Arc<CleanupTracker>,
    provisioned_device: Option<ProvisionedDevice>,
    persistence_error: Option<String>,
}

impl<B: ProvisioningBackend, S: DeviceStorage> ProvisioningContext<B, S> {
    pub fn new(backend: Arc<B>, storage: Arc<S>) -> Self {
        Self {
            session_id: SessionId::new(),
            backend,
            storage,
            discovered_devices: Vec::new(),
            selected_device: None,
            network_configuration: None,
            device_configuration: DeviceConfiguration::default(),
            attempts: HashMap::new(),
            cleanup: Arc::new(CleanupTracker::default()),
            provisioned_device: None,
            persistence_error: None,
        }
    }

    pub fn with_network_configuration(mut self, network: NetworkConfiguration) -> Self {
        self.network_configuration = Some(network);
        self
    }

    pub fn with_device_configuration(mut self, configuration: DeviceConfiguration) -> Self {
        self.device_configuration = configuration;
        self
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Devices in discovery order
    pub fn discovered_devices(&self) -> &[DiscoveredDevice] {
        &self.discovered_devices
    }

    pub fn selected_device(&self) -> Option<&DiscoveredDevice> {
        self.selected_device.as_ref()
    }

    pub fn network_configuration(&self) -> Option<&NetworkConfiguration> {
        self.network_configuration.as_ref()
    }

    pub fn set_network_configuration(&mut self, network: NetworkConfiguration) {
        self.network_configuration = Some(network);
    }

    pub fn device_configuration(&self) -> &DeviceConfiguration {
        &self.device_configuration
    }

    pub fn set_device_configuration(&mut self, configuration: DeviceConfiguration) {
        self.device_configuration = configuration;
    }

    pub fn provisioned_device(&self) -> Option<&ProvisionedDevice> {
        self.provisioned_device.as_ref()
    }

    pub fn persistence_error(&self) -> Option<&str> {
        self.persistence_error.as_deref()
    }

    /// How often the given step has been entered this session
    pub fn attempts(&self, step: StateKind) -> u32 {
        self.attempts.get(&step).copied().unwrap_or(0)
    }

    /// Number of times [`cleanup`](Self::cleanup) actually ran
    pub fn cleanup_runs(&self) -> usize {
        self.cleanup.runs.load(Ordering::SeqCst)
    }

    pub(crate) fn record_attempt(&mut self, step: StateKind) -> u32 {
        let count = self.attempts.entry(step).or_insert(0);
        *count += 1;
        *count
    }

    pub(crate) fn set_discovered_devices(&mut self, devices: Vec<DiscoveredDevice>) {
        // A rescan invalidates a selection that is no longer advertised
        if let Some(selected) = &self.selected_device {
            if !devices.iter().any(|d| d.id == selected.id) {
                self.selected_device = None;
            }
        }
        self.discovered_devices = devices;
    }

    /// Select one of the discovered devices
    ///
    /// Returns `false` and leaves the selection unchanged if the device was
    /// not discovered in this session.
    pub(crate) fn select_device(&mut self, device: &DiscoveredDevice) -> bool {
        match self.discovered_devices.iter().find(|d| d.id == device.id) {
            Some(found) => {
                self.selected_device = Some(found.clone());
                true
            }
            None => false,
        }
    }

    pub(crate) fn clear_selection(&mut self) {
        self.selected_device = None;
    }

    pub(crate) fn record_persistence(&mut self, outcome: Result<ProvisionedDevice, String>) {
        match outcome {
            Ok(device) => {
                self.provisioned_device = Some(device);
                self.persistence_error = None;
            }
            Err(error) => self.persistence_error = Some(error),
        }
    }

    /// Proof presented while authenticating, if a setup code is known
    pub(crate) fn pairing_proof(&self, device: &DiscoveredDevice) -> Option<PairingProof> {
        self.device_configuration
            .setup_code
            .as_deref()
            .map(|code| PairingProof::derive(&device.id, code))
    }

    /// Forget everything learned in this session, keeping configuration and handles
    pub(crate) fn reset(&mut self) {
        debug!(session = %self.session_id, "Resetting provisioning context");
        self.discovered_devices.clear();
        self.selected_device = None;
        self.attempts.clear();
        self.cleanup = Arc::new(CleanupTracker::default());
        self.provisioned_device = None;
        self.persistence_error = None;
    }

    /// Release collaborator resources held by the session
    ///
    /// Stops scanning and disconnects the selected device. Runs at most once
    /// per session; later calls resolve immediately.
    pub fn cleanup(&self) -> BoxFuture<'static, ()> {
        let tracker = self.cleanup.clone();
        let backend = self.backend.clone();
        let device = self.selected_device.clone();
        let session = self.session_id;

        async move {
            if tracker.done.swap(true, Ordering::SeqCst) {
                return;
            }
            tracker.runs.fetch_add(1, Ordering::SeqCst);
            debug!(%session, "Cleaning up provisioning session");

            backend.stop_scanning();
            if let Some(device) = device {
                if let Err(e) = backend.disconnect(&device).await {
                    warn!(%session, device = %device.id, error = %e, "Disconnect during cleanup failed");
                }
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{MockBackend, MockStorage},
        core::types::{DeviceId, TransportKind},
    };

    fn device(id: &str) -> DiscoveredDevice {
        DiscoveredDevice {
            id: DeviceId::new(id),
            name: id.to_string(),
            transport: TransportKind::Wifi,
            rssi: -40,
        }
    }

    fn context() -> (Arc<MockBackend>, ProvisioningContext<MockBackend, MockStorage>) {
        let backend = Arc::new(MockBackend::new());
        let context = ProvisioningContext::new(backend.clone(), Arc::new(MockStorage::new()));
        (backend, context)
    }

    #[test]
    fn test_select_requires_discovery() {
        let (_, mut ctx) = context();
        assert!(!ctx.select_device(&device("a")));
        assert!(ctx.selected_device().is_none());

        ctx.set_discovered_devices(vec![device("a"), device("b")]);
        assert!(ctx.select_device(&device("b")));
        assert_eq!(ctx.selected_device().unwrap().id, DeviceId::new("b"));

        // Only one selection at a time
        assert!(ctx.select_device(&device("a")));
        assert_eq!(ctx.selected_device().unwrap().id, DeviceId::new("a"));
    }

    #[test]
    fn test_rescan_drops_vanished_selection() {
        let (_, mut ctx) = context();
        ctx.set_discovered_devices(vec![device("a")]);
        ctx.select_device(&device("a"));

        ctx.set_discovered_devices(vec![device("b")]);
        assert!(ctx.selected_device().is_none());
        assert_eq!(ctx.discovered_devices(), &[device("b")]);
    }

    #[test]
    fn test_attempt_counting_and_reset() {
        let (_, mut ctx) = context();
        assert_eq!(ctx.record_attempt(StateKind::Connecting), 1);
        assert_eq!(ctx.record_attempt(StateKind::Connecting), 2);
        assert_eq!(ctx.attempts(StateKind::Connecting), 2);
        assert_eq!(ctx.attempts(StateKind::Verifying), 0);

        ctx.reset();
        assert_eq!(ctx.attempts(StateKind::Connecting), 0);
    }

    #[tokio::test]
    async fn test_cleanup_runs_once() {
        let (backend, mut ctx) = context();
        ctx.set_discovered_devices(vec![device("a")]);
        ctx.select_device(&device("a"));

        ctx.cleanup().await;
        ctx.cleanup().await;

        assert_eq!(ctx.cleanup_runs(), 1);
        assert_eq!(backend.stop_scan_count(), 1);
        assert_eq!(backend.disconnect_count(), 1);

        // A restarted session may clean up again
        ctx.reset();
        ctx.cleanup().await;
        assert_eq!(ctx.cleanup_runs(), 1);
        assert_eq!(backend.stop_scan_count(), 2);
        assert_eq!(backend.disconnect_count(), 1);
    }

    #[test]
    fn test_pairing_proof_from_setup_code() {
        let (_, ctx) = context();
        assert!(ctx.pairing_proof(&device("a")).is_none());

        let ctx = ctx.with_device_configuration(DeviceConfiguration {
            display_name: None,
            setup_code: Some("4242".into()),
        });
        let proof = ctx.pairing_proof(&device("a")).unwrap();
        assert!(proof.verify(&DeviceId::new("a"), "4242"));
    }
}
