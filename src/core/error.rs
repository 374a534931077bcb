//! Error types for the provisioning engine

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::TransportKind;
use crate::reconnection::parameters::DisconnectionReason;

/// Result type for collaborator service calls
pub type CollaboratorResult<T> = Result<T, CollaboratorError>;

/// Result type for device storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for connection strategy operations
pub type StrategyResult<T> = Result<T, ConnectionStrategyError>;

/// Errors reported by collaborator services (scan, connect, authenticate, ...)
///
/// These are expected domain failures. The state machine converts them into
/// failure events; only [`CollaboratorError::Internal`] is treated as fatal.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CollaboratorError {
    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Rejected by device: {0}")]
    Rejected(String),

    #[error("Device unreachable: {0}")]
    Unreachable(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Internal collaborator error: {0}")]
    Internal(String),
}

/// Errors related to persisting provisioned devices
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Faults that cannot be mapped to a provisioning event
///
/// Any fault moves the session into the generic error state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningFault {
    #[error("No device selected")]
    MissingSelectedDevice,

    #[error("No network configuration provided")]
    MissingNetworkConfiguration,

    #[error("Unrecoverable collaborator error: {0}")]
    Collaborator(CollaboratorError),

    #[error("State task aborted: {0}")]
    TaskAborted(String),
}

/// Errors produced by connection strategies
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ConnectionStrategyError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(TransportKind),

    #[error("Strategy disabled")]
    StrategyDisabled,

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Disconnection reason {0} does not allow reconnection")]
    NotReconnectable(DisconnectionReason),

    #[error("Reconnection condition not met: {0}")]
    ConditionNotMet(String),

    #[error("Reconnection cancelled")]
    Cancelled,

    #[error("Reconnection gave up after {0} attempts")]
    RetriesExhausted(u32),

    #[error("Reconnection already active for service {0}")]
    AlreadyActive(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Errors related to loading configuration files
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid policy file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors returned by a running provisioning session handle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Provisioning session is closed")]
    Closed,

    #[error("Provisioning session task failed: {0}")]
    Aborted(String),
}
