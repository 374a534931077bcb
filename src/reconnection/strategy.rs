//! Connection strategy abstraction

use std::time::Duration;

use serde::{Deserialize, Serialize};
use trait_variant::make;

use crate::core::{
    error::{ConnectionStrategyError, StrategyResult},
    types::TransportKind,
};

/// A pluggable way of (re-)establishing a connection
///
/// Transport adapters drive an implementation when a live link drops. The
/// associated types keep the trait usable for strategies with their own
/// parameter and result records.
#[make(Send)]
pub trait ConnectionStrategy: Send + Sync + 'static {
    type Parameters;
    type Output;

    /// Run the strategy to completion
    async fn execute_connection(
        &self,
        parameters: Self::Parameters,
        context: &ConnectionContext,
    ) -> StrategyResult<Self::Output>;

    /// Check parameters without connecting
    fn validate_parameters(&self, parameters: &Self::Parameters) -> ValidationResult;

    /// Worst-case time the strategy may spend on these parameters
    fn estimate_connection_time(
        &self,
        parameters: &Self::Parameters,
        context: &ConnectionContext,
    ) -> Duration;

    fn configuration(&self) -> StrategyConfiguration;

    fn update_configuration(&self, configuration: StrategyConfiguration) -> StrategyResult<()>;

    /// Drop accumulated history and restore the default configuration
    fn reset(&self);
}

/// Caller supplied context for a connection run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionContext {
    pub transport: TransportKind,
}

impl ConnectionContext {
    pub fn new(transport: TransportKind) -> Self {
        Self { transport }
    }
}

/// Tunables shared by all runs of a strategy instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyConfiguration {
    pub enabled: bool,
    pub supported_transports: Vec<TransportKind>,
    /// Upper bound for a single connection attempt
    pub attempt_timeout: Duration,
    /// Assumed duration of one attempt when no history is available
    pub default_attempt_estimate: Duration,
    /// Number of successful attempt durations kept for estimates
    pub history_limit: usize,
}

impl StrategyConfiguration {
    pub(crate) fn check(&self) -> StrategyResult<()> {
        if self.attempt_timeout.is_zero() {
            return Err(ConnectionStrategyError::ConfigurationError(
                "attempt_timeout must be greater than zero".into(),
            ));
        }
        if self.history_limit == 0 {
            return Err(ConnectionStrategyError::ConfigurationError(
                "history_limit must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for StrategyConfiguration {
    fn default() -> Self {
        Self {
            enabled: true,
            supported_transports: vec![
                TransportKind::Wifi,
                TransportKind::Ble,
                TransportKind::Zigbee,
                TransportKind::Mqtt,
            ],
            attempt_timeout: Duration::from_secs(30),
            default_attempt_estimate: Duration::from_secs(5),
            history_limit: 10,
        }
    }
}

/// A single validation finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Findings of [`ConnectionStrategy::validate_parameters`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    /// Informational notes, never blocking
    pub info: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Collapse the errors into a single strategy error
    pub fn into_error(self) -> Option<ConnectionStrategyError> {
        if self.errors.is_empty() {
            return None;
        }
        let message = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        Some(ConnectionStrategyError::InvalidParameters(message))
    }
}
