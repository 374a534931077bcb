//! Reconnection with configurable backoff

pub mod engine;
pub mod interval;
pub mod parameters;
pub mod result;
pub mod strategy;

pub use engine::{ReconnectionEvent, ReconnectionSession, ReconnectionStrategy, SessionState};
pub use interval::{IntervalSpec, IntervalStrategy};
pub use parameters::{DisconnectionReason, ReconnectionCondition, ReconnectionParameters};
pub use result::{
    AttemptDetail, AttemptOutcome, FinalConnectionState, LinkQuality, NetworkSnapshot,
    ReconnectionResult,
};
pub use strategy::{
    ConnectionContext, ConnectionStrategy, StrategyConfiguration, ValidationIssue,
    ValidationResult,
};
