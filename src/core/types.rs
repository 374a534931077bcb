//! Domain types for device provisioning

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transport a device is reachable over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Wifi,
    Ble,
    Zigbee,
    Mqtt,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransportKind::Wifi => "wifi",
            TransportKind::Ble => "ble",
            TransportKind::Zigbee => "zigbee",
            TransportKind::Mqtt => "mqtt",
        };
        f.write_str(name)
    }
}

/// Stable identifier a device advertises during discovery
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A device reported by the scanning collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub id: DeviceId,
    /// Human readable advertised name
    pub name: String,
    pub transport: TransportKind,
    /// Signal strength in dBm
    pub rssi: i16,
}

/// Network the device should join once provisioned
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfiguration {
    pub ssid: String,
    pub passphrase: String,
}

impl std::fmt::Debug for NetworkConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkConfiguration")
            .field("ssid", &self.ssid)
            .field("passphrase", &"<redacted>")
            .finish()
    }
}

/// Per-device settings applied during provisioning
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfiguration {
    /// Display name assigned by the user
    pub display_name: Option<String>,
    /// Setup code printed on the device, used to derive the pairing proof
    pub setup_code: Option<String>,
}

/// A device that completed provisioning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedDevice {
    pub device: DiscoveredDevice,
    pub display_name: String,
    pub ssid: Option<String>,
    pub provisioned_at: DateTime<Utc>,
}

/// Provisioning session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
