//! Scriptable in-memory collaborators
//!
//! Used by the test-suite and by the CLI simulation. Every step succeeds
//! unless a failure has been queued for it.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicU32, AtomicUsize, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex as SyncMutex;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::{
    backend::{
        AuthenticationService, ConfigurationService, ConnectionService, DeviceStorage,
        ScanningService, TransportConnector, VerificationService,
    },
    core::{
        error::{CollaboratorError, CollaboratorResult, StorageResult, StrategyResult},
        proof::PairingProof,
        types::{DeviceId, DiscoveredDevice, NetworkConfiguration, ProvisionedDevice, TransportKind},
    },
    reconnection::result::{LinkQuality, NetworkSnapshot},
};

/// Collaborator call made against the mock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockStep {
    Scan,
    Connect,
    Authenticate,
    Configure,
    Verify,
}

#[derive(Debug, Default)]
struct MockState {
    devices: Vec<DiscoveredDevice>,
    failures: HashMap<MockStep, VecDeque<CollaboratorError>>,
    delays: HashMap<MockStep, Duration>,
    setup_codes: HashMap<DeviceId, String>,
    calls: Vec<MockStep>,
    connected: Option<DeviceId>,
    network: Option<NetworkConfiguration>,
}

/// Mock provisioning backend implementing every collaborator service
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    inner: Arc<Mutex<MockState>>,
    stop_scans: Arc<AtomicUsize>,
    disconnects: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Devices returned by the next scans
    pub async fn set_devices(&self, devices: Vec<DiscoveredDevice>) {
        self.inner.lock().await.devices = devices;
    }

    /// Queue a failure for the next call of `step`
    pub async fn fail_next(&self, step: MockStep, error: CollaboratorError) {
        self.inner
            .lock()
            .await
            .failures
            .entry(step)
            .or_default()
            .push_back(error);
    }

    /// Make every call of `step` take `delay` before answering
    pub async fn set_delay(&self, step: MockStep, delay: Duration) {
        self.inner.lock().await.delays.insert(step, delay);
    }

    /// Require a valid setup-code proof when authenticating `device`
    pub async fn set_setup_code(&self, device: DeviceId, setup_code: impl Into<String>) {
        self.inner
            .lock()
            .await
            .setup_codes
            .insert(device, setup_code.into());
    }

    /// Calls made so far, in order
    pub async fn calls(&self) -> Vec<MockStep> {
        self.inner.lock().await.calls.clone()
    }

    pub async fn connected_device(&self) -> Option<DeviceId> {
        self.inner.lock().await.connected.clone()
    }

    /// Network configuration pushed by the last successful configure call
    pub async fn configured_network(&self) -> Option<NetworkConfiguration> {
        self.inner.lock().await.network.clone()
    }

    pub fn stop_scan_count(&self) -> usize {
        self.stop_scans.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Record the call and decide its outcome
    async fn step(&self, step: MockStep) -> CollaboratorResult<()> {
        let (delay, failure) = {
            let mut state = self.inner.lock().await;
            state.calls.push(step);
            let failure = state.failures.get_mut(&step).and_then(VecDeque::pop_front);
            (state.delays.get(&step).copied(), failure)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl ScanningService for MockBackend {
    async fn start_scanning(&self) -> CollaboratorResult<Vec<DiscoveredDevice>> {
        self.step(MockStep::Scan).await?;
        Ok(self.inner.lock().await.devices.clone())
    }

    fn stop_scanning(&self) {
        self.stop_scans.fetch_add(1, Ordering::SeqCst);
    }
}

impl ConnectionService for MockBackend {
    async fn connect(&self, device: &DiscoveredDevice) -> CollaboratorResult<()> {
        self.step(MockStep::Connect).await?;
        let mut state = self.inner.lock().await;
        if !state.devices.iter().any(|d| d.id == device.id) {
            return Err(CollaboratorError::NotFound(device.id.to_string()));
        }
        state.connected = Some(device.id.clone());
        Ok(())
    }

    async fn disconnect(&self, device: &DiscoveredDevice) -> CollaboratorResult<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        let mut state = self.inner.lock().await;
        if state.connected.as_ref() == Some(&device.id) {
            state.connected = None;
        }
        Ok(())
    }
}

impl AuthenticationService for MockBackend {
    async fn authenticate(
        &self,
        device: &DiscoveredDevice,
        proof: Option<PairingProof>,
    ) -> CollaboratorResult<()> {
        self.step(MockStep::Authenticate).await?;
        let state = self.inner.lock().await;
        match (state.setup_codes.get(&device.id), proof) {
            (None, _) => Ok(()),
            (Some(code), Some(proof)) if proof.verify(&device.id, code) => Ok(()),
            (Some(_), _) => Err(CollaboratorError::InvalidCredentials),
        }
    }
}

impl ConfigurationService for MockBackend {
    async fn configure(
        &self,
        _device: &DiscoveredDevice,
        network: &NetworkConfiguration,
    ) -> CollaboratorResult<()> {
        self.step(MockStep::Configure).await?;
        self.inner.lock().await.network = Some(network.clone());
        Ok(())
    }
}

impl VerificationService for MockBackend {
    async fn verify(&self, device: &DiscoveredDevice) -> CollaboratorResult<()> {
        self.step(MockStep::Verify).await?;
        let state = self.inner.lock().await;
        if state.connected.as_ref() != Some(&device.id) {
            return Err(CollaboratorError::Unreachable(device.id.to_string()));
        }
        Ok(())
    }
}

/// In-memory device storage
#[derive(Debug, Clone, Default)]
pub struct MockStorage {
    devices: Arc<Mutex<Vec<ProvisionedDevice>>>,
    fail: Arc<Mutex<bool>>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_failure(&self, should_fail: bool) {
        *self.fail.lock().await = should_fail;
    }

    pub async fn saved(&self) -> Vec<ProvisionedDevice> {
        self.devices.lock().await.clone()
    }
}

impl DeviceStorage for MockStorage {
    async fn save_provisioned_device(&self, device: &ProvisionedDevice) -> StorageResult<()> {
        if *self.fail.lock().await {
            return Err(std::io::Error::other("mock storage failure").into());
        }
        self.devices.lock().await.push(device.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct TransportScript {
    outcomes: VecDeque<StrategyResult<LinkQuality>>,
    fail_always: Option<crate::core::error::ConnectionStrategyError>,
    delay: Option<Duration>,
    snapshot: NetworkSnapshot,
}

/// Mock transport for the reconnection engine
///
/// Queued outcomes are consumed first; afterwards every attempt fails if
/// [`fail_always`](Self::fail_always) is set and succeeds otherwise.
#[derive(Debug, Clone)]
pub struct MockTransport {
    script: Arc<SyncMutex<TransportScript>>,
    attempts: Arc<AtomicU32>,
}

impl MockTransport {
    pub fn new() -> Self {
        let script = TransportScript {
            snapshot: NetworkSnapshot {
                reachable: true,
                transport: Some(TransportKind::Wifi),
                signal_dbm: Some(-60),
            },
            ..Default::default()
        };
        Self {
            script: Arc::new(SyncMutex::new(script)),
            attempts: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn push_outcome(&self, outcome: StrategyResult<LinkQuality>) {
        self.script.lock().outcomes.push_back(outcome);
    }

    pub fn fail_always(&self, error: crate::core::error::ConnectionStrategyError) {
        self.script.lock().fail_always = Some(error);
    }

    pub fn set_attempt_delay(&self, delay: Duration) {
        self.script.lock().delay = Some(delay);
    }

    pub fn set_snapshot(&self, snapshot: NetworkSnapshot) {
        self.script.lock().snapshot = snapshot;
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportConnector for MockTransport {
    async fn attempt_connection(
        &self,
        _service_id: &str,
        _configuration: &Value,
    ) -> StrategyResult<LinkQuality> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = self.script.lock().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut script = self.script.lock();
        match script.outcomes.pop_front() {
            Some(outcome) => outcome,
            None => match &script.fail_always {
                Some(error) => Err(error.clone()),
                None => Ok(LinkQuality::Full),
            },
        }
    }

    fn network_state(&self) -> NetworkSnapshot {
        self.script.lock().snapshot.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str) -> DiscoveredDevice {
        DiscoveredDevice {
            id: DeviceId::new(id),
            name: format!("Device {id}"),
            transport: TransportKind::Ble,
            rssi: -50,
        }
    }

    #[tokio::test]
    async fn test_mock_backend_scan() {
        let backend = MockBackend::new();

        let results = backend.start_scanning().await.unwrap();
        assert!(results.is_empty());

        backend.set_devices(vec![device("a"), device("b")]).await;
        let results = backend.start_scanning().await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, DeviceId::new("a"));
    }

    #[tokio::test]
    async fn test_queued_failure_is_consumed_once() {
        let backend = MockBackend::new();
        backend.set_devices(vec![device("a")]).await;
        backend
            .fail_next(MockStep::Connect, CollaboratorError::Unreachable("a".into()))
            .await;

        assert!(backend.connect(&device("a")).await.is_err());
        assert!(backend.connect(&device("a")).await.is_ok());
        assert_eq!(backend.connected_device().await, Some(DeviceId::new("a")));
        assert_eq!(backend.calls().await, vec![MockStep::Connect, MockStep::Connect]);
    }

    #[tokio::test]
    async fn test_connect_unknown_device() {
        let backend = MockBackend::new();
        let result = backend.connect(&device("ghost")).await;
        assert_eq!(result, Err(CollaboratorError::NotFound("ghost".into())));
    }

    #[tokio::test]
    async fn test_authentication_requires_proof() {
        let backend = MockBackend::new();
        let lamp = device("lamp");
        backend.set_setup_code(lamp.id.clone(), "111-22-333").await;

        assert_eq!(
            backend.authenticate(&lamp, None).await,
            Err(CollaboratorError::InvalidCredentials)
        );
        let wrong = PairingProof::derive(&lamp.id, "000-00-000");
        assert!(backend.authenticate(&lamp, Some(wrong)).await.is_err());

        let proof = PairingProof::derive(&lamp.id, "111-22-333");
        assert!(backend.authenticate(&lamp, Some(proof)).await.is_ok());
    }

    #[tokio::test]
    async fn test_stop_and_disconnect_counters() {
        let backend = MockBackend::new();
        backend.stop_scanning();
        backend.stop_scanning();
        backend.disconnect(&device("a")).await.unwrap();

        assert_eq!(backend.stop_scan_count(), 2);
        assert_eq!(backend.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_storage() {
        let storage = MockStorage::new();
        let provisioned = ProvisionedDevice {
            device: device("a"),
            display_name: "Kitchen".into(),
            ssid: None,
            provisioned_at: chrono::Utc::now(),
        };

        storage.save_provisioned_device(&provisioned).await.unwrap();
        assert_eq!(storage.saved().await, vec![provisioned.clone()]);

        storage.set_failure(true).await;
        assert!(storage.save_provisioned_device(&provisioned).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_transport_script() {
        let transport = MockTransport::new();
        transport.push_outcome(Err(crate::core::error::ConnectionStrategyError::Timeout(
            Duration::from_secs(1),
        )));

        assert!(transport.attempt_connection("svc", &Value::Null).await.is_err());
        assert_eq!(
            transport.attempt_connection("svc", &Value::Null).await,
            Ok(LinkQuality::Full)
        );
        assert_eq!(transport.attempt_count(), 2);
        assert!(transport.network_state().reachable);
    }
}
