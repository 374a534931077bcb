//! Provisioning states and the transition function

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    backend::{DeviceStorage, ProvisioningBackend},
    core::{context::ProvisioningContext, error::CollaboratorError},
    provisioning::event::ProvisioningEvent,
};

/// Fieldless mirror of [`ProvisioningState`] for telemetry and bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    Idle,
    Scanning,
    DeviceSelection,
    Connecting,
    Authenticating,
    Configuring,
    Verifying,
    ScanTimeout,
    ConnectionFailed,
    AuthenticationFailed,
    ConfigurationFailed,
    VerificationFailed,
    Error,
    Cancelling,
    Cancelled,
    Completed,
}

impl std::fmt::Display for StateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Why and when a step failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub error: CollaboratorError,
    /// Attempt of the failed step within the session, starting at 1
    pub attempt: u32,
    pub at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn new(error: CollaboratorError, attempt: u32) -> Self {
        Self {
            error,
            attempt,
            at: Utc::now(),
        }
    }
}

/// State of a provisioning session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningState {
    Idle,
    Scanning,
    DeviceSelection,
    Connecting,
    Authenticating,
    Configuring,
    Verifying,
    ScanTimeout(FailureRecord),
    ConnectionFailed(FailureRecord),
    AuthenticationFailed(FailureRecord),
    ConfigurationFailed(FailureRecord),
    VerificationFailed(FailureRecord),
    Error { cause: String, at: DateTime<Utc> },
    Cancelling,
    Cancelled,
    Completed,
}

impl ProvisioningState {
    pub(crate) fn error(cause: impl Into<String>) -> Self {
        ProvisioningState::Error {
            cause: cause.into(),
            at: Utc::now(),
        }
    }

    pub fn kind(&self) -> StateKind {
        match self {
            ProvisioningState::Idle => StateKind::Idle,
            ProvisioningState::Scanning => StateKind::Scanning,
            ProvisioningState::DeviceSelection => StateKind::DeviceSelection,
            ProvisioningState::Connecting => StateKind::Connecting,
            ProvisioningState::Authenticating => StateKind::Authenticating,
            ProvisioningState::Configuring => StateKind::Configuring,
            ProvisioningState::Verifying => StateKind::Verifying,
            ProvisioningState::ScanTimeout(_) => StateKind::ScanTimeout,
            ProvisioningState::ConnectionFailed(_) => StateKind::ConnectionFailed,
            ProvisioningState::AuthenticationFailed(_) => StateKind::AuthenticationFailed,
            ProvisioningState::ConfigurationFailed(_) => StateKind::ConfigurationFailed,
            ProvisioningState::VerificationFailed(_) => StateKind::VerificationFailed,
            ProvisioningState::Error { .. } => StateKind::Error,
            ProvisioningState::Cancelling => StateKind::Cancelling,
            ProvisioningState::Cancelled => StateKind::Cancelled,
            ProvisioningState::Completed => StateKind::Completed,
        }
    }

    pub fn can_cancel(&self) -> bool {
        !matches!(
            self,
            ProvisioningState::Idle
                | ProvisioningState::Cancelling
                | ProvisioningState::Cancelled
                | ProvisioningState::Completed
        )
    }

    pub fn is_final(&self) -> bool {
        matches!(
            self,
            ProvisioningState::Cancelled | ProvisioningState::Completed
        )
    }

    /// Failure details for the step failure states
    pub fn failure(&self) -> Option<&FailureRecord> {
        match self {
            ProvisioningState::ScanTimeout(record)
            | ProvisioningState::ConnectionFailed(record)
            | ProvisioningState::AuthenticationFailed(record)
            | ProvisioningState::ConfigurationFailed(record)
            | ProvisioningState::VerificationFailed(record) => Some(record),
            _ => None,
        }
    }

    /// Human readable description of the error this state records
    pub fn error_description(&self) -> Option<String> {
        match self {
            ProvisioningState::Error { cause, .. } => Some(cause.clone()),
            other => other
                .failure()
                .map(|record| format!("{} (attempt {})", record.error, record.attempt)),
        }
    }

    /// Map an event to the next state
    ///
    /// Returns `None` when the event is not meaningful here; the caller then
    /// discards it and stays put. The context is only read.
    pub fn handle<B: ProvisioningBackend, S: DeviceStorage>(
        &self,
        event: &ProvisioningEvent,
        context: &ProvisioningContext<B, S>,
    ) -> Option<ProvisioningState> {
        use ProvisioningEvent as Ev;

        if *event == Ev::Cancel {
            return match self {
                _ if !self.can_cancel() => None,
                // A collaborator call may hold the device; release it first
                Self::Connecting | Self::Authenticating | Self::Configuring | Self::Verifying => {
                    Some(Self::Cancelling)
                }
                _ => Some(Self::Cancelled),
            };
        }

        let failed = |error: &CollaboratorError, step: StateKind| {
            FailureRecord::new(error.clone(), context.attempts(step))
        };

        let next = match (self, event) {
            (Self::Idle, Ev::StartProvisioning) => Self::Scanning,

            (Self::Scanning, Ev::DevicesFound(_)) => Self::DeviceSelection,
            (Self::Scanning, Ev::ScanTimeout) => Self::ScanTimeout(FailureRecord::new(
                CollaboratorError::Timeout,
                context.attempts(StateKind::Scanning),
            )),
            (Self::Scanning, Ev::ScanFailed(error)) => Self::error(format!("Scan failed: {error}")),

            (Self::DeviceSelection, Ev::DeviceSelected(device))
                if context
                    .discovered_devices()
                    .iter()
                    .any(|d| d.id == device.id) =>
            {
                Self::Connecting
            }
            (Self::DeviceSelection, Ev::Rescan) => Self::Scanning,

            (Self::Connecting, Ev::DeviceConnected) => Self::Authenticating,
            (Self::Connecting, Ev::ConnectionFailed(error)) => {
                Self::ConnectionFailed(failed(error, StateKind::Connecting))
            }

            (Self::Authenticating, Ev::AuthenticationSucceeded) => Self::Configuring,
            (Self::Authenticating, Ev::AuthenticationFailed(error)) => {
                Self::AuthenticationFailed(failed(error, StateKind::Authenticating))
            }

            (Self::Configuring, Ev::ConfigurationSucceeded) => Self::Verifying,
            (Self::Configuring, Ev::ConfigurationFailed(error)) => {
                Self::ConfigurationFailed(failed(error, StateKind::Configuring))
            }

            (Self::Verifying, Ev::VerificationSucceeded) => Self::Completed,
            (Self::Verifying, Ev::VerificationFailed(error)) => {
                Self::VerificationFailed(failed(error, StateKind::Verifying))
            }

            (Self::ScanTimeout(_), Ev::Retry | Ev::Rescan) => Self::Scanning,

            (Self::ConnectionFailed(_), Ev::Retry) => Self::Connecting,
            (Self::AuthenticationFailed(_), Ev::Retry) => Self::Authenticating,
            (Self::ConfigurationFailed(_), Ev::Retry | Ev::Reconfigure) => Self::Configuring,
            (Self::VerificationFailed(_), Ev::Retry) => Self::Verifying,
            (Self::VerificationFailed(_), Ev::Reconfigure) => Self::Configuring,
            (
                Self::ConnectionFailed(_)
                | Self::AuthenticationFailed(_)
                | Self::ConfigurationFailed(_)
                | Self::VerificationFailed(_),
                Ev::SelectDifferentDevice,
            ) => Self::DeviceSelection,

            (Self::Error { .. }, Ev::Retry) => Self::Scanning,
            (Self::Error { .. }, Ev::Restart) => Self::Idle,

            (Self::Cancelling, Ev::Cancelled) => Self::Cancelled,

            (Self::Cancelled | Self::Completed, Ev::Restart) => Self::Idle,

            _ => return None,
        };

        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::{MockBackend, MockStorage},
        core::types::{DeviceId, DiscoveredDevice, TransportKind},
    };
    use std::sync::Arc;

    fn device(id: &str) -> DiscoveredDevice {
        DiscoveredDevice {
            id: DeviceId::new(id),
            name: id.to_string(),
            transport: TransportKind::Ble,
            rssi: -55,
        }
    }

    fn context() -> ProvisioningContext<MockBackend, MockStorage> {
        ProvisioningContext::new(Arc::new(MockBackend::new()), Arc::new(MockStorage::new()))
    }

    fn record() -> FailureRecord {
        FailureRecord::new(CollaboratorError::Timeout, 1)
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut ctx = context();
        ctx.set_discovered_devices(vec![device("d")]);

        let steps = [
            (ProvisioningState::Idle, ProvisioningEvent::StartProvisioning, StateKind::Scanning),
            (
                ProvisioningState::Scanning,
                ProvisioningEvent::DevicesFound(vec![device("d")]),
                StateKind::DeviceSelection,
            ),
            (
                ProvisioningState::DeviceSelection,
                ProvisioningEvent::DeviceSelected(device("d")),
                StateKind::Connecting,
            ),
            (ProvisioningState::Connecting, ProvisioningEvent::DeviceConnected, StateKind::Authenticating),
            (
                ProvisioningState::Authenticating,
                ProvisioningEvent::AuthenticationSucceeded,
                StateKind::Configuring,
            ),
            (
                ProvisioningState::Configuring,
                ProvisioningEvent::ConfigurationSucceeded,
                StateKind::Verifying,
            ),
            (ProvisioningState::Verifying, ProvisioningEvent::VerificationSucceeded, StateKind::Completed),
        ];

        for (state, event, expected) in steps {
            let next = state.handle(&event, &ctx);
            assert_eq!(next.map(|s| s.kind()), Some(expected), "{state:?} + {event}");
        }
    }

    #[test]
    fn test_cancel_routing() {
        let ctx = context();

        for state in [
            ProvisioningState::Connecting,
            ProvisioningState::Authenticating,
            ProvisioningState::Configuring,
            ProvisioningState::Verifying,
        ] {
            assert_eq!(
                state.handle(&ProvisioningEvent::Cancel, &ctx),
                Some(ProvisioningState::Cancelling)
            );
        }

        for state in [
            ProvisioningState::Scanning,
            ProvisioningState::DeviceSelection,
            ProvisioningState::ScanTimeout(record()),
            ProvisioningState::ConnectionFailed(record()),
            ProvisioningState::VerificationFailed(record()),
            ProvisioningState::error("boom"),
        ] {
            assert_eq!(
                state.handle(&ProvisioningEvent::Cancel, &ctx),
                Some(ProvisioningState::Cancelled)
            );
        }
    }

    #[test]
    fn test_non_cancellable_states() {
        let ctx = context();

        for state in [
            ProvisioningState::Idle,
            ProvisioningState::Cancelling,
            ProvisioningState::Cancelled,
            ProvisioningState::Completed,
        ] {
            assert!(!state.can_cancel());
            assert_eq!(state.handle(&ProvisioningEvent::Cancel, &ctx), None);
        }
        assert!(ProvisioningState::Scanning.can_cancel());
        assert!(ProvisioningState::error("x").can_cancel());
    }

    #[test]
    fn test_final_states_only_restart() {
        let ctx = context();

        for state in [ProvisioningState::Cancelled, ProvisioningState::Completed] {
            assert!(state.is_final());
            assert_eq!(
                state.handle(&ProvisioningEvent::Restart, &ctx),
                Some(ProvisioningState::Idle)
            );
            assert_eq!(state.handle(&ProvisioningEvent::Retry, &ctx), None);
            assert_eq!(state.handle(&ProvisioningEvent::StartProvisioning, &ctx), None);
        }
        assert!(!ProvisioningState::Idle.is_final());
        assert!(!ProvisioningState::error("x").is_final());
    }

    #[test]
    fn test_failure_recovery_targets() {
        let ctx = context();
        let cases = [
            (ProvisioningState::ScanTimeout(record()), ProvisioningEvent::Retry, Some(StateKind::Scanning)),
            (ProvisioningState::ScanTimeout(record()), ProvisioningEvent::Rescan, Some(StateKind::Scanning)),
            (ProvisioningState::ConnectionFailed(record()), ProvisioningEvent::Retry, Some(StateKind::Connecting)),
            (
                ProvisioningState::ConnectionFailed(record()),
                ProvisioningEvent::SelectDifferentDevice,
                Some(StateKind::DeviceSelection),
            ),
            (ProvisioningState::ConnectionFailed(record()), ProvisioningEvent::Reconfigure, None),
            (
                ProvisioningState::AuthenticationFailed(record()),
                ProvisioningEvent::Retry,
                Some(StateKind::Authenticating),
            ),
            (
                ProvisioningState::ConfigurationFailed(record()),
                ProvisioningEvent::Reconfigure,
                Some(StateKind::Configuring),
            ),
            (ProvisioningState::VerificationFailed(record()), ProvisioningEvent::Retry, Some(StateKind::Verifying)),
            (
                ProvisioningState::VerificationFailed(record()),
                ProvisioningEvent::Reconfigure,
                Some(StateKind::Configuring),
            ),
            (ProvisioningState::error("x"), ProvisioningEvent::Retry, Some(StateKind::Scanning)),
            (ProvisioningState::error("x"), ProvisioningEvent::Restart, Some(StateKind::Idle)),
        ];

        for (state, event, expected) in cases {
            assert_eq!(
                state.handle(&event, &ctx).map(|s| s.kind()),
                expected,
                "{state:?} + {event}"
            );
        }
    }

    #[test]
    fn test_device_selected_must_be_discovered() {
        let mut ctx = context();
        ctx.set_discovered_devices(vec![device("known")]);

        let state = ProvisioningState::DeviceSelection;
        assert_eq!(
            state.handle(&ProvisioningEvent::DeviceSelected(device("stranger")), &ctx),
            None
        );
        assert_eq!(
            state.handle(&ProvisioningEvent::DeviceSelected(device("known")), &ctx),
            Some(ProvisioningState::Connecting)
        );
    }

    #[test]
    fn test_failure_records_attempt_and_error() {
        let mut ctx = context();
        ctx.record_attempt(StateKind::Connecting);
        ctx.record_attempt(StateKind::Connecting);

        let next = ProvisioningState::Connecting
            .handle(
                &ProvisioningEvent::ConnectionFailed(CollaboratorError::Unreachable("d".into())),
                &ctx,
            )
            .unwrap();

        let failure = next.failure().unwrap();
        assert_eq!(failure.error, CollaboratorError::Unreachable("d".into()));
        assert_eq!(failure.attempt, 2);
        assert_eq!(
            next.error_description().as_deref(),
            Some("Device unreachable: d (attempt 2)")
        );
    }

    #[test]
    fn test_scan_failure_goes_to_error() {
        let ctx = context();
        let next = ProvisioningState::Scanning
            .handle(
                &ProvisioningEvent::ScanFailed(CollaboratorError::Rejected("radio off".into())),
                &ctx,
            )
            .unwrap();

        assert_eq!(next.kind(), StateKind::Error);
        assert_eq!(
            next.error_description().as_deref(),
            Some("Scan failed: Rejected by device: radio off")
        );
    }

    #[test]
    fn test_late_events_are_ignored() {
        let ctx = context();
        assert_eq!(
            ProvisioningState::Cancelled.handle(&ProvisioningEvent::DeviceConnected, &ctx),
            None
        );
        assert_eq!(
            ProvisioningState::Authenticating.handle(&ProvisioningEvent::DeviceConnected, &ctx),
            None
        );
        assert_eq!(
            ProvisioningState::Idle.handle(&ProvisioningEvent::Cancelled, &ctx),
            None
        );
    }
}
