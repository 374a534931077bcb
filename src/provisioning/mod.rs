//! Provisioning workflow
//!
//! Device onboarding is modelled as a state machine. [`state`] holds the
//! states and the pure transition function, [`lifecycle`] the work each state
//! performs when entered or left, and [`machine`] the driver that ties them to
//! the session context and the collaborator services.

pub mod event;
pub(crate) mod lifecycle;
pub mod machine;
pub mod state;

pub use event::ProvisioningEvent;
pub use machine::{
    ProvisioningHandle, ProvisioningNotification, ProvisioningResult, ProvisioningStateMachine,
};
pub use state::{FailureRecord, ProvisioningState, StateKind};
