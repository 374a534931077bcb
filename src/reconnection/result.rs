//! Reconnection outcome records

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{error::ConnectionStrategyError, types::TransportKind};

/// Link quality reported by a transport after a successful connect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkQuality {
    Full,
    Degraded,
}

/// Network conditions captured alongside every attempt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub reachable: bool,
    pub transport: Option<TransportKind>,
    /// Signal strength in dBm, if the transport exposes it
    pub signal_dbm: Option<i16>,
}

/// State of the link when a reconnection run ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalConnectionState {
    Connected,
    Degraded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed,
}

/// One connection attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptDetail {
    /// 1-based attempt number
    pub number: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ConnectionStrategyError>,
    pub network_state: NetworkSnapshot,
}

/// Outcome of a complete reconnection run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectionResult {
    pub service_id: String,
    pub is_successful: bool,
    /// Number of connection attempts actually made
    pub attempt_count: u32,
    pub total_duration: Duration,
    pub final_connection_state: FinalConnectionState,
    /// Configuration the link was re-established with
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration: Option<Value>,
    pub attempts: Vec<AttemptDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ConnectionStrategyError>,
}

impl ReconnectionResult {
    pub(crate) fn succeeded(
        service_id: String,
        quality: LinkQuality,
        configuration: Value,
        attempts: Vec<AttemptDetail>,
        total_duration: Duration,
    ) -> Self {
        let final_connection_state = match quality {
            LinkQuality::Full => FinalConnectionState::Connected,
            LinkQuality::Degraded => FinalConnectionState::Degraded,
        };
        Self {
            service_id,
            is_successful: true,
            attempt_count: attempts.len() as u32,
            total_duration,
            final_connection_state,
            configuration: Some(configuration),
            attempts,
            error: None,
        }
    }

    pub(crate) fn failed(
        service_id: String,
        error: ConnectionStrategyError,
        attempts: Vec<AttemptDetail>,
        total_duration: Duration,
    ) -> Self {
        Self {
            service_id,
            is_successful: false,
            attempt_count: attempts.len() as u32,
            total_duration,
            final_connection_state: FinalConnectionState::Failed,
            configuration: None,
            attempts,
            error: Some(error),
        }
    }

    /// Duration of the last successful attempt, if any
    pub fn successful_attempt_duration(&self) -> Option<Duration> {
        self.attempts
            .iter()
            .rev()
            .find(|a| a.outcome == AttemptOutcome::Succeeded)
            .and_then(|a| (a.ended_at - a.started_at).to_std().ok())
    }
}
