//! Condition-gated reconnection with pluggable backoff
//!
//! One [`ReconnectionStrategy`] serves any number of services. Each service
//! has at most one active session; the session is removed from the registry
//! as soon as its run ends, however it ends.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::{sync::broadcast, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    backend::TransportConnector,
    core::error::{ConnectionStrategyError, StrategyResult},
    reconnection::{
        parameters::{DisconnectionReason, ReconnectionParameters},
        result::{
            AttemptDetail, AttemptOutcome, FinalConnectionState, LinkQuality, ReconnectionResult,
        },
        strategy::{
            ConnectionContext, ConnectionStrategy, StrategyConfiguration, ValidationIssue,
            ValidationResult,
        },
    },
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Retry counts above this trigger a validation warning
const RETRY_WARNING_THRESHOLD: i32 = 20;

/// Lifecycle of a reconnection session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// Bookkeeping for one service's reconnection run
#[derive(Debug, Clone)]
pub struct ReconnectionSession {
    pub service_id: String,
    pub current_attempt: u32,
    pub next_attempt_time: Option<DateTime<Utc>>,
    pub state: SessionState,
    cancel: CancellationToken,
}

impl ReconnectionSession {
    fn new(service_id: String) -> Self {
        Self {
            service_id,
            current_attempt: 0,
            next_attempt_time: None,
            state: SessionState::Pending,
            cancel: CancellationToken::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Progress notifications for transports and UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReconnectionEvent {
    Started {
        service_id: String,
        reason: DisconnectionReason,
        max_retries: u32,
    },
    AttemptStarted {
        service_id: String,
        attempt: u32,
    },
    AttemptFailed {
        service_id: String,
        attempt: u32,
        error: ConnectionStrategyError,
    },
    Waiting {
        service_id: String,
        next_attempt: u32,
        delay: Duration,
    },
    Succeeded {
        service_id: String,
        attempts: u32,
        state: FinalConnectionState,
    },
    Failed {
        service_id: String,
        attempts: u32,
        error: ConnectionStrategyError,
    },
    Cancelled {
        service_id: String,
        attempts: u32,
    },
}

type SessionMap = Mutex<HashMap<String, ReconnectionSession>>;

/// Removes the session from the registry when the run ends
struct SessionGuard<'a> {
    service_id: String,
    cancel: CancellationToken,
    sessions: &'a SessionMap,
}

impl SessionGuard<'_> {
    fn update(&self, f: impl FnOnce(&mut ReconnectionSession)) {
        if let Some(session) = self.sessions.lock().get_mut(&self.service_id) {
            f(session);
        }
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.sessions.lock().remove(&self.service_id);
    }
}

/// Reconnection strategy over a transport connect primitive
pub struct ReconnectionStrategy<T: TransportConnector> {
    transport: Arc<T>,
    configuration: RwLock<StrategyConfiguration>,
    sessions: SessionMap,
    /// Durations of recent successful attempts, newest last
    history: Mutex<VecDeque<Duration>>,
    events: broadcast::Sender<ReconnectionEvent>,
}

impl<T: TransportConnector> ReconnectionStrategy<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self::with_configuration(transport, StrategyConfiguration::default())
    }

    pub fn with_configuration(transport: Arc<T>, configuration: StrategyConfiguration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transport,
            configuration: RwLock::new(configuration),
            sessions: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            events,
        }
    }

    /// Subscribe to reconnection progress events
    pub fn subscribe(&self) -> broadcast::Receiver<ReconnectionEvent> {
        self.events.subscribe()
    }

    /// Request cancellation of the active session for `service_id`
    ///
    /// Cancellation is observed at the next loop check; an attempt already in
    /// flight is allowed to finish. Returns `false` if no session is active.
    /// Calling it repeatedly is harmless.
    pub fn cancel_reconnection(&self, service_id: &str) -> bool {
        match self.sessions.lock().get(service_id) {
            Some(session) => {
                info!(service_id, "Cancelling reconnection");
                session.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Snapshot of all active sessions
    pub fn active_reconnections(&self) -> Vec<ReconnectionSession> {
        let mut sessions: Vec<_> = self.sessions.lock().values().cloned().collect();
        sessions.sort_by(|a, b| a.service_id.cmp(&b.service_id));
        sessions
    }

    fn emit(&self, event: ReconnectionEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    fn register(&self, service_id: &str) -> StrategyResult<SessionGuard<'_>> {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(service_id) {
            return Err(ConnectionStrategyError::AlreadyActive(service_id.to_string()));
        }
        let session = ReconnectionSession::new(service_id.to_string());
        let cancel = session.cancel.clone();
        sessions.insert(service_id.to_string(), session);

        Ok(SessionGuard {
            service_id: service_id.to_string(),
            cancel,
            sessions: &self.sessions,
        })
    }

    fn record_success_duration(&self, elapsed: Duration, limit: usize) {
        let mut history = self.history.lock();
        history.push_back(elapsed);
        while history.len() > limit {
            history.pop_front();
        }
    }

    fn average_success_duration(&self) -> Option<Duration> {
        let history = self.history.lock();
        let count = u32::try_from(history.len()).ok().filter(|c| *c > 0)?;
        let total: Duration = history.iter().sum();
        Some(total / count)
    }

    async fn run_attempts(
        &self,
        parameters: &ReconnectionParameters,
        configuration: &StrategyConfiguration,
        guard: &SessionGuard<'_>,
    ) -> ReconnectionResult {
        let service_id = parameters.service_id.as_str();
        let budget = parameters.attempt_budget();
        let started = Instant::now();
        let mut attempts: Vec<AttemptDetail> = Vec::new();
        let mut attempt: u32 = 1;

        guard.update(|s| s.state = SessionState::Running);

        loop {
            if guard.cancel.is_cancelled() {
                info!(service_id, attempts = attempts.len(), "Reconnection cancelled");
                return ReconnectionResult::failed(
                    service_id.to_string(),
                    ConnectionStrategyError::Cancelled,
                    attempts,
                    started.elapsed(),
                );
            }

            if attempt > budget {
                warn!(service_id, max_retries = budget, "Reconnection attempts exhausted");
                return ReconnectionResult::failed(
                    service_id.to_string(),
                    ConnectionStrategyError::RetriesExhausted(budget),
                    attempts,
                    started.elapsed(),
                );
            }

            if let Some(blocked) = parameters.conditions.iter().find(|c| !c.is_satisfied()) {
                info!(
                    service_id,
                    condition = blocked.name(),
                    "Reconnection condition not met, stopping"
                );
                return ReconnectionResult::failed(
                    service_id.to_string(),
                    ConnectionStrategyError::ConditionNotMet(blocked.name().to_string()),
                    attempts,
                    started.elapsed(),
                );
            }

            guard.update(|s| {
                s.current_attempt = attempt;
                s.next_attempt_time = None;
            });
            self.emit(ReconnectionEvent::AttemptStarted {
                service_id: service_id.to_string(),
                attempt,
            });
            debug!(service_id, attempt, "Reconnection attempt");

            let started_at = Utc::now();
            let attempt_clock = Instant::now();
            let outcome = match tokio::time::timeout(
                configuration.attempt_timeout,
                self.transport
                    .attempt_connection(service_id, &parameters.original_configuration),
            )
            .await
            {
                Ok(Ok(LinkQuality::Degraded)) if !parameters.allow_degraded_connection => Err(
                    ConnectionStrategyError::ConnectionFailed("degraded link not accepted".into()),
                ),
                Ok(outcome) => outcome,
                Err(_) => Err(ConnectionStrategyError::Timeout(configuration.attempt_timeout)),
            };
            let elapsed = attempt_clock.elapsed();
            let ended_at = Utc::now();
            let network_state = self.transport.network_state();

            match outcome {
                Ok(quality) => {
                    attempts.push(AttemptDetail {
                        number: attempt,
                        started_at,
                        ended_at,
                        outcome: AttemptOutcome::Succeeded,
                        error: None,
                        network_state,
                    });
                    self.record_success_duration(elapsed, configuration.history_limit);
                    info!(service_id, attempt, ?quality, "Reconnected");
                    return ReconnectionResult::succeeded(
                        service_id.to_string(),
                        quality,
                        parameters.original_configuration.clone(),
                        attempts,
                        started.elapsed(),
                    );
                }
                Err(error) => {
                    warn!(service_id, attempt, error = %error, "Reconnection attempt failed");
                    attempts.push(AttemptDetail {
                        number: attempt,
                        started_at,
                        ended_at,
                        outcome: AttemptOutcome::Failed,
                        error: Some(error.clone()),
                        network_state,
                    });
                    self.emit(ReconnectionEvent::AttemptFailed {
                        service_id: service_id.to_string(),
                        attempt,
                        error,
                    });

                    // No point waiting when no further attempt is permitted
                    if attempt < budget {
                        let delay = parameters.interval_strategy.calculate_interval(attempt + 1);
                        let next_at = chrono::Duration::from_std(delay)
                            .ok()
                            .and_then(|d| Utc::now().checked_add_signed(d));
                        guard.update(|s| s.next_attempt_time = next_at);
                        self.emit(ReconnectionEvent::Waiting {
                            service_id: service_id.to_string(),
                            next_attempt: attempt + 1,
                            delay,
                        });
                        debug!(
                            service_id,
                            ?delay,
                            "Waiting before next attempt"
                        );

                        tokio::select! {
                            biased;
                            _ = guard.cancel.cancelled() => {}
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }

                    attempt += 1;
                }
            }
        }
    }
}

impl<T: TransportConnector> ConnectionStrategy for ReconnectionStrategy<T> {
    type Parameters = ReconnectionParameters;
    type Output = ReconnectionResult;

    async fn execute_connection(
        &self,
        parameters: ReconnectionParameters,
        context: &ConnectionContext,
    ) -> StrategyResult<ReconnectionResult> {
        let service_id = parameters.service_id.clone();

        if !parameters.reason.allows_reconnect() {
            info!(
                service_id = %service_id,
                reason = %parameters.reason,
                "Disconnection reason does not allow reconnection"
            );
            return Err(ConnectionStrategyError::NotReconnectable(parameters.reason));
        }

        let configuration = self.configuration.read().clone();
        if !configuration.enabled {
            return Err(ConnectionStrategyError::StrategyDisabled);
        }
        if !configuration.supported_transports.contains(&context.transport) {
            return Err(ConnectionStrategyError::UnsupportedProtocol(context.transport));
        }
        if let Some(error) = self.validate_parameters(&parameters).into_error() {
            return Err(error);
        }

        let guard = self.register(&service_id)?;
        info!(
            service_id = %service_id,
            reason = %parameters.reason,
            transport = %context.transport,
            max_retries = parameters.max_retries,
            "Starting reconnection"
        );
        self.emit(ReconnectionEvent::Started {
            service_id: service_id.clone(),
            reason: parameters.reason,
            max_retries: parameters.attempt_budget(),
        });

        let result = self.run_attempts(&parameters, &configuration, &guard).await;

        let (state, event) = match (&result.error, result.is_successful) {
            (_, true) => (
                SessionState::Completed,
                ReconnectionEvent::Succeeded {
                    service_id: service_id.clone(),
                    attempts: result.attempt_count,
                    state: result.final_connection_state,
                },
            ),
            (Some(ConnectionStrategyError::Cancelled), false) => (
                SessionState::Cancelled,
                ReconnectionEvent::Cancelled {
                    service_id: service_id.clone(),
                    attempts: result.attempt_count,
                },
            ),
            (error, false) => (
                SessionState::Failed,
                ReconnectionEvent::Failed {
                    service_id: service_id.clone(),
                    attempts: result.attempt_count,
                    error: error
                        .clone()
                        .unwrap_or_else(|| ConnectionStrategyError::Unknown("no error recorded".into())),
                },
            ),
        };
        guard.update(|s| s.state = state);
        drop(guard);
        self.emit(event);

        Ok(result)
    }

    fn validate_parameters(&self, parameters: &ReconnectionParameters) -> ValidationResult {
        let mut result = ValidationResult::default();

        if parameters.service_id.trim().is_empty() {
            result
                .errors
                .push(ValidationIssue::new("service_id", "must not be empty"));
        }

        if parameters.max_retries < 0 {
            result.errors.push(ValidationIssue::new(
                "max_retries",
                format!("must not be negative, got {}", parameters.max_retries),
            ));
        } else if parameters.max_retries > RETRY_WARNING_THRESHOLD {
            result.warnings.push(
                ValidationIssue::new(
                    "max_retries",
                    format!(
                        "{} retries may keep the device busy for a long time",
                        parameters.max_retries
                    ),
                )
                .with_suggestion("use between 5 and 10 retries"),
            );
        }

        if !parameters.conditions.is_empty() {
            let names: Vec<_> = parameters.conditions.iter().map(|c| c.name()).collect();
            result.info.push(format!(
                "{} condition(s) gate every attempt: {}",
                names.len(),
                names.join(", ")
            ));
        }

        if parameters.interval_strategy.max_interval().is_none() {
            result
                .info
                .push("custom interval strategy has no upper bound".to_string());
        }

        result
    }

    fn estimate_connection_time(
        &self,
        parameters: &ReconnectionParameters,
        context: &ConnectionContext,
    ) -> Duration {
        let configuration = self.configuration.read().clone();
        if !configuration.enabled || !configuration.supported_transports.contains(&context.transport)
        {
            return Duration::ZERO;
        }

        let per_attempt = self
            .average_success_duration()
            .unwrap_or(configuration.default_attempt_estimate);

        (1..=parameters.attempt_budget()).fold(Duration::ZERO, |total, attempt| {
            total
                .saturating_add(parameters.interval_strategy.calculate_interval(attempt))
                .saturating_add(per_attempt)
        })
    }

    fn configuration(&self) -> StrategyConfiguration {
        self.configuration.read().clone()
    }

    fn update_configuration(&self, configuration: StrategyConfiguration) -> StrategyResult<()> {
        configuration.check()?;
        debug!(?configuration, "Updating reconnection configuration");
        *self.configuration.write() = configuration;
        Ok(())
    }

    fn reset(&self) {
        self.history.lock().clear();
        *self.configuration.write() = StrategyConfiguration::default();
    }
}
