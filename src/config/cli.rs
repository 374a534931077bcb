//! Command-line argument parsing

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::backend::MockStep;

/// Provisioning step that fails once in the simulation
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStep {
    Scan,
    Connect,
    Authenticate,
    Configure,
    Verify,
}

impl From<FailureStep> for MockStep {
    fn from(step: FailureStep) -> Self {
        match step {
            FailureStep::Scan => MockStep::Scan,
            FailureStep::Connect => MockStep::Connect,
            FailureStep::Authenticate => MockStep::Authenticate,
            FailureStep::Configure => MockStep::Configure,
            FailureStep::Verify => MockStep::Verify,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[clap(name = "iot-provisioning", version, author)]
#[clap(about = "IoT device provisioning and reconnection engine (simulated collaborators)")]
pub struct CliArgs {
    /// Number of simulated devices advertised by the scanner
    #[clap(short = 'n', long, default_value = "3")]
    pub devices: usize,

    /// Name prefix of simulated devices
    #[clap(long, default_value = "sensor")]
    pub device_prefix: String,

    /// Index of the discovered device to provision
    #[clap(long, default_value = "0")]
    pub select: usize,

    /// SSID pushed to the device
    #[clap(long, default_value = "HomeNet")]
    pub ssid: String,

    /// Passphrase pushed to the device
    #[clap(long, default_value = "")]
    pub passphrase: String,

    /// Setup code printed on the device
    #[clap(short = 's', long)]
    pub setup_code: Option<String>,

    /// Display name for the provisioned device
    #[clap(long)]
    pub display_name: Option<String>,

    /// JSON file receiving provisioned devices
    #[clap(long, default_value = "provisioned-devices.json")]
    pub storage_path: PathBuf,

    /// Fail this step once, then retry
    #[clap(long, value_enum)]
    pub fail_step: Option<FailureStep>,

    /// Run a reconnection simulation for this service after provisioning
    #[clap(long)]
    pub reconnect_service: Option<String>,

    /// Failed attempts before the simulated transport comes back
    #[clap(long, default_value = "2")]
    pub reconnect_failures: u32,

    /// Retry limit for the reconnection simulation; -1 means no retries
    #[clap(long, allow_negative_numbers = true)]
    pub max_retries: Option<i32>,

    /// JSON reconnection policy file
    #[clap(long)]
    pub policy: Option<PathBuf>,

    /// Print notifications as JSON lines
    #[clap(long)]
    pub json: bool,
}
