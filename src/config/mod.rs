//! Configuration module

pub mod cli;
pub mod settings;

pub use cli::{CliArgs, FailureStep};
pub use settings::{ReconnectionPolicy, Settings};
