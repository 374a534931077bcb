//! Provisioning session driver
//!
//! [`ProvisioningStateMachine`] owns the current state and the session
//! context. Events are processed one at a time: the current state decides
//! the next state, the old state exits, the new one is installed and its
//! enter work is spawned. Enter work is tagged with the generation of the
//! state that spawned it; once that state has been left, its outcome is
//! logged and dropped.

use chrono::{DateTime, Utc};
use futures::{FutureExt, StreamExt, future::BoxFuture, stream::FuturesUnordered};
use serde::Serialize;
use tokio::{
    sync::{broadcast, mpsc},
    task::{JoinError, JoinHandle},
};
use tracing::{debug, info, warn};

use crate::{
    backend::{DeviceStorage, ProvisioningBackend},
    core::{
        context::ProvisioningContext,
        error::{ProvisioningFault, SessionError},
        types::{DiscoveredDevice, ProvisionedDevice, SessionId},
    },
    provisioning::{
        event::ProvisioningEvent,
        lifecycle::EnterOutcome,
        state::{ProvisioningState, StateKind},
    },
};

/// Buffered user events per session
const EVENT_QUEUE_CAPACITY: usize = 32;

/// Buffered notifications per subscriber
const NOTIFICATION_CAPACITY: usize = 64;

type PendingEnter = BoxFuture<'static, (u64, Result<EnterOutcome, JoinError>)>;

/// Broadcast for every accepted transition
#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningNotification {
    pub session_id: SessionId,
    pub from: StateKind,
    pub to: StateKind,
    /// Event that caused the transition; `None` for faults
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<ProvisioningEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

/// Summary of a finished provisioning session
#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningResult {
    pub session_id: SessionId,
    pub final_state: StateKind,
    pub selected_device: Option<DiscoveredDevice>,
    /// Stored record, present once persistence succeeded
    pub device: Option<ProvisionedDevice>,
    pub last_error: Option<String>,
    pub persistence_error: Option<String>,
    pub transitions: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ProvisioningResult {
    pub fn is_completed(&self) -> bool {
        self.final_state == StateKind::Completed
    }
}

/// Event-driven provisioning workflow for one device
pub struct ProvisioningStateMachine<B: ProvisioningBackend, S: DeviceStorage> {
    state: ProvisioningState,
    context: ProvisioningContext<B, S>,
    /// Bumped on every installed state; tags enter work with its owner
    generation: u64,
    pending: FuturesUnordered<PendingEnter>,
    notifications: broadcast::Sender<ProvisioningNotification>,
    transitions: usize,
    last_error: Option<String>,
    started_at: DateTime<Utc>,
}

impl<B: ProvisioningBackend, S: DeviceStorage> ProvisioningStateMachine<B, S> {
    pub fn new(context: ProvisioningContext<B, S>) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            state: ProvisioningState::Idle,
            context,
            generation: 0,
            pending: FuturesUnordered::new(),
            notifications,
            transitions: 0,
            last_error: None,
            started_at: Utc::now(),
        }
    }

    pub fn state(&self) -> &ProvisioningState {
        &self.state
    }

    pub fn context(&self) -> &ProvisioningContext<B, S> {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ProvisioningContext<B, S> {
        &mut self.context
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProvisioningNotification> {
        self.notifications.subscribe()
    }

    /// Whether enter work is still in flight
    pub fn has_pending_work(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Process one event
    ///
    /// Returns `true` if the event caused a transition. Rejected events leave
    /// state and context untouched and run no enter or exit work.
    pub fn deliver(&mut self, event: ProvisioningEvent) -> bool {
        let session = self.context.session_id();
        let Some(next) = self.state.handle(&event, &self.context) else {
            debug!(
                %session,
                state = %self.state.kind(),
                event = %event,
                "Event ignored in current state"
            );
            return false;
        };

        self.state.exit(&self.context);
        self.apply_event_data(&event);
        self.install(next, Some(event), None);
        true
    }

    /// Wait for the next piece of enter work and apply its outcome
    ///
    /// Returns `false` if nothing was in flight.
    pub async fn process_next(&mut self) -> bool {
        match self.pending.next().await {
            Some((generation, outcome)) => {
                self.apply_outcome(generation, outcome);
                true
            }
            None => false,
        }
    }

    /// Drive enter work until none is left
    pub async fn settle(&mut self) {
        while self.process_next().await {}
    }

    /// Run the session until `events` is closed and no work is in flight
    ///
    /// Reaching a final state does not end the loop, so `restart` sent after
    /// `Completed` or `Cancelled` starts over within the same session.
    pub async fn run(mut self, mut events: mpsc::Receiver<ProvisioningEvent>) -> ProvisioningResult {
        let session = self.context.session_id();
        info!(%session, "Provisioning session started");

        let mut events_open = true;
        loop {
            tokio::select! {
                biased;

                Some((generation, outcome)) = self.pending.next(), if !self.pending.is_empty() => {
                    self.apply_outcome(generation, outcome);
                }
                event = events.recv(), if events_open => match event {
                    Some(event) => {
                        self.deliver(event);
                    }
                    None => events_open = false,
                },
                else => {
                    if !self.state.is_final() {
                        warn!(%session, state = %self.state.kind(), "Event queue closed before session finished");
                    }
                    break;
                }
            }
        }

        let result = self.result();
        info!(
            %session,
            final_state = %result.final_state,
            transitions = result.transitions,
            "Provisioning session finished"
        );
        result
    }

    /// Run the session on its own task
    ///
    /// The task lives until [`ProvisioningHandle::join`] closes the event
    /// queue and the remaining enter work has drained.
    pub fn spawn(self) -> ProvisioningHandle {
        let (events, receiver) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let session_id = self.context.session_id();
        let notifications = self.notifications.clone();
        let task = tokio::spawn(self.run(receiver));

        ProvisioningHandle {
            session_id,
            events,
            notifications,
            task,
        }
    }

    /// Snapshot of the session so far
    pub fn result(&self) -> ProvisioningResult {
        ProvisioningResult {
            session_id: self.context.session_id(),
            final_state: self.state.kind(),
            selected_device: self.context.selected_device().cloned(),
            device: self.context.provisioned_device().cloned(),
            last_error: self.last_error.clone(),
            persistence_error: self.context.persistence_error().map(str::to_string),
            transitions: self.transitions,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }

    fn apply_event_data(&mut self, event: &ProvisioningEvent) {
        match event {
            ProvisioningEvent::DevicesFound(devices) => {
                self.context.set_discovered_devices(devices.clone());
            }
            ProvisioningEvent::DeviceSelected(device) => {
                self.context.select_device(device);
            }
            ProvisioningEvent::SelectDifferentDevice => self.context.clear_selection(),
            ProvisioningEvent::Restart => {
                self.context.reset();
                self.last_error = None;
            }
            _ => {}
        }
    }

    fn install(
        &mut self,
        next: ProvisioningState,
        event: Option<ProvisioningEvent>,
        fault: Option<&ProvisioningFault>,
    ) {
        let from = self.state.kind();
        let to = next.kind();

        if matches!(
            to,
            StateKind::Scanning
                | StateKind::Connecting
                | StateKind::Authenticating
                | StateKind::Configuring
                | StateKind::Verifying
        ) {
            self.context.record_attempt(to);
        }

        let error = next.error_description();
        if error.is_some() {
            self.last_error = error.clone();
        }

        self.state = next;
        self.generation += 1;
        self.transitions += 1;

        match (&event, fault) {
            (_, Some(fault)) => warn!(
                session = %self.context.session_id(),
                %from,
                %to,
                %fault,
                "Provisioning fault"
            ),
            (Some(event), None) => info!(
                session = %self.context.session_id(),
                %from,
                %to,
                %event,
                "State transition"
            ),
            (None, None) => {}
        }

        // No subscribers is fine
        let _ = self.notifications.send(ProvisioningNotification {
            session_id: self.context.session_id(),
            from,
            to,
            event,
            error,
            at: Utc::now(),
        });

        if let Some(work) = self.state.enter(&self.context) {
            let generation = self.generation;
            self.pending.push(
                tokio::spawn(work)
                    .map(move |outcome| (generation, outcome))
                    .boxed(),
            );
        }
    }

    fn apply_outcome(&mut self, generation: u64, outcome: Result<EnterOutcome, JoinError>) {
        let current = generation == self.generation;
        let outcome = outcome
            .unwrap_or_else(|e| EnterOutcome::Fault(ProvisioningFault::TaskAborted(e.to_string())));

        let session = self.context.session_id();
        match outcome {
            EnterOutcome::Event(event) if current => {
                self.deliver(event);
            }
            EnterOutcome::Event(event) => {
                debug!(
                    %session,
                    state = %self.state.kind(),
                    event = %event,
                    "Dropping outcome of a superseded state"
                );
            }
            EnterOutcome::Fault(fault) if current => self.fail(fault),
            EnterOutcome::Fault(fault) => {
                warn!(
                    %session,
                    state = %self.state.kind(),
                    %fault,
                    "Dropping fault of a superseded state"
                );
            }
            EnterOutcome::Persisted(result) if current => self.context.record_persistence(result),
            EnterOutcome::Persisted(result) => {
                debug!(
                    %session,
                    state = %self.state.kind(),
                    stored = result.is_ok(),
                    "Dropping persistence outcome of a superseded session"
                );
            }
            EnterOutcome::Settled => {}
        }
    }

    fn fail(&mut self, fault: ProvisioningFault) {
        self.state.exit(&self.context);
        self.install(ProvisioningState::error(fault.to_string()), None, Some(&fault));
    }

    #[cfg(test)]
    pub(crate) fn with_state(context: ProvisioningContext<B, S>, state: ProvisioningState) -> Self {
        let mut machine = Self::new(context);
        machine.state = state;
        machine
    }

    #[cfg(test)]
    pub(crate) fn force_state(&mut self, state: ProvisioningState) {
        self.install(state, None, None);
    }
}

/// Handle to a session running on its own task
#[derive(Debug)]
pub struct ProvisioningHandle {
    session_id: SessionId,
    events: mpsc::Sender<ProvisioningEvent>,
    notifications: broadcast::Sender<ProvisioningNotification>,
    task: JoinHandle<ProvisioningResult>,
}

impl ProvisioningHandle {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProvisioningNotification> {
        self.notifications.subscribe()
    }

    pub async fn send(&self, event: ProvisioningEvent) -> Result<(), SessionError> {
        self.events
            .send(event)
            .await
            .map_err(|_| SessionError::Closed)
    }

    pub async fn start(&self) -> Result<(), SessionError> {
        self.send(ProvisioningEvent::StartProvisioning).await
    }

    pub async fn select_device(&self, device: DiscoveredDevice) -> Result<(), SessionError> {
        self.send(ProvisioningEvent::DeviceSelected(device)).await
    }

    pub async fn retry(&self) -> Result<(), SessionError> {
        self.send(ProvisioningEvent::Retry).await
    }

    pub async fn cancel(&self) -> Result<(), SessionError> {
        self.send(ProvisioningEvent::Cancel).await
    }

    /// Close the event queue and wait for the session to finish
    pub async fn join(self) -> Result<ProvisioningResult, SessionError> {
        drop(self.events);
        self.task
            .await
            .map_err(|e| SessionError::Aborted(e.to_string()))
    }
}
