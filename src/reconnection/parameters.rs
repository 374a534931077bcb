//! Reconnection request parameters

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::reconnection::interval::IntervalStrategy;

/// Why a live connection dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectionReason {
    NetworkLost,
    SignalLost,
    Timeout,
    RemoteClosed,
    ProtocolError,
    AuthenticationFailed,
    UserInitiated,
    SystemShutdown,
    Unknown,
}

impl DisconnectionReason {
    /// Whether a link dropped for this reason may be re-established automatically
    pub fn allows_reconnect(&self) -> bool {
        !matches!(
            self,
            DisconnectionReason::AuthenticationFailed
                | DisconnectionReason::UserInitiated
                | DisconnectionReason::SystemShutdown
        )
    }
}

impl std::fmt::Display for DisconnectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DisconnectionReason::NetworkLost => "network_lost",
            DisconnectionReason::SignalLost => "signal_lost",
            DisconnectionReason::Timeout => "timeout",
            DisconnectionReason::RemoteClosed => "remote_closed",
            DisconnectionReason::ProtocolError => "protocol_error",
            DisconnectionReason::AuthenticationFailed => "authentication_failed",
            DisconnectionReason::UserInitiated => "user_initiated",
            DisconnectionReason::SystemShutdown => "system_shutdown",
            DisconnectionReason::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Named gate evaluated before every reconnection attempt
#[derive(Clone)]
pub struct ReconnectionCondition {
    name: String,
    predicate: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl ReconnectionCondition {
    pub fn new(name: impl Into<String>, predicate: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_satisfied(&self) -> bool {
        (self.predicate)()
    }
}

impl std::fmt::Debug for ReconnectionCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectionCondition")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Everything needed to re-establish one service's connection
#[derive(Debug, Clone)]
pub struct ReconnectionParameters {
    pub service_id: String,
    /// Transport specific configuration the link was originally opened with
    pub original_configuration: Value,
    pub reason: DisconnectionReason,
    /// Signed so that a negative value can be reported by validation
    pub max_retries: i32,
    pub interval_strategy: IntervalStrategy,
    pub allow_degraded_connection: bool,
    pub conditions: Vec<ReconnectionCondition>,
}

impl ReconnectionParameters {
    pub fn new(service_id: impl Into<String>, reason: DisconnectionReason) -> Self {
        Self {
            service_id: service_id.into(),
            original_configuration: Value::Null,
            reason,
            max_retries: 5,
            interval_strategy: IntervalStrategy::default(),
            allow_degraded_connection: false,
            conditions: Vec::new(),
        }
    }

    pub fn with_configuration(mut self, configuration: Value) -> Self {
        self.original_configuration = configuration;
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_interval(mut self, strategy: IntervalStrategy) -> Self {
        self.interval_strategy = strategy;
        self
    }

    pub fn allow_degraded(mut self, allow: bool) -> Self {
        self.allow_degraded_connection = allow;
        self
    }

    pub fn with_condition(mut self, condition: ReconnectionCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Attempt budget, treating negative values as zero
    pub(crate) fn attempt_budget(&self) -> u32 {
        u32::try_from(self.max_retries).unwrap_or(0)
    }
}
