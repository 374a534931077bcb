//! Provisioning events

use serde::{Deserialize, Serialize};

use crate::core::{error::CollaboratorError, types::DiscoveredDevice};

/// Inputs to the provisioning state machine
///
/// User actions (`StartProvisioning`, `DeviceSelected`, `Retry`, `Cancel`, ...)
/// and collaborator outcomes share one vocabulary so the transition function
/// stays the single place where the workflow is defined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ProvisioningEvent {
    StartProvisioning,
    DevicesFound(Vec<DiscoveredDevice>),
    ScanTimeout,
    ScanFailed(CollaboratorError),
    DeviceSelected(DiscoveredDevice),
    Rescan,
    DeviceConnected,
    ConnectionFailed(CollaboratorError),
    AuthenticationSucceeded,
    AuthenticationFailed(CollaboratorError),
    ConfigurationSucceeded,
    ConfigurationFailed(CollaboratorError),
    VerificationSucceeded,
    VerificationFailed(CollaboratorError),
    Retry,
    Reconfigure,
    SelectDifferentDevice,
    Cancel,
    Cancelled,
    Restart,
}

impl ProvisioningEvent {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            ProvisioningEvent::StartProvisioning => "start_provisioning",
            ProvisioningEvent::DevicesFound(_) => "devices_found",
            ProvisioningEvent::ScanTimeout => "scan_timeout",
            ProvisioningEvent::ScanFailed(_) => "scan_failed",
            ProvisioningEvent::DeviceSelected(_) => "device_selected",
            ProvisioningEvent::Rescan => "rescan",
            ProvisioningEvent::DeviceConnected => "device_connected",
            ProvisioningEvent::ConnectionFailed(_) => "connection_failed",
            ProvisioningEvent::AuthenticationSucceeded => "authentication_succeeded",
            ProvisioningEvent::AuthenticationFailed(_) => "authentication_failed",
            ProvisioningEvent::ConfigurationSucceeded => "configuration_succeeded",
            ProvisioningEvent::ConfigurationFailed(_) => "configuration_failed",
            ProvisioningEvent::VerificationSucceeded => "verification_succeeded",
            ProvisioningEvent::VerificationFailed(_) => "verification_failed",
            ProvisioningEvent::Retry => "retry",
            ProvisioningEvent::Reconfigure => "reconfigure",
            ProvisioningEvent::SelectDifferentDevice => "select_different_device",
            ProvisioningEvent::Cancel => "cancel",
            ProvisioningEvent::Cancelled => "cancelled",
            ProvisioningEvent::Restart => "restart",
        }
    }
}

impl std::fmt::Display for ProvisioningEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_event_serialization() {
        let json = serde_json::to_string(&ProvisioningEvent::StartProvisioning).unwrap();
        assert_eq!(json, r#"{"type":"start_provisioning"}"#);
    }

    #[test]
    fn test_failure_event_serialization() {
        let event = ProvisioningEvent::ConnectionFailed(CollaboratorError::Timeout);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"connection_failed""#));
        assert!(json.contains(r#""kind":"timeout""#));

        let decoded: ProvisioningEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_name_matches_serde_tag() {
        let event = ProvisioningEvent::SelectDifferentDevice;
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.name());
    }
}
