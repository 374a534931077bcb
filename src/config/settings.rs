//! Runtime settings

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    backend::MockStep,
    config::CliArgs,
    core::{
        error::ConfigError,
        types::{DeviceConfiguration, NetworkConfiguration},
    },
    reconnection::{IntervalSpec, IntervalStrategy},
};

/// Reconnection behavior loaded from a policy file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectionPolicy {
    pub max_retries: i32,
    pub allow_degraded_connection: bool,
    pub interval: IntervalSpec,
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            allow_degraded_connection: false,
            interval: IntervalSpec::Exponential {
                initial_ms: 1_000,
                multiplier: 2.0,
                max_ms: 60_000,
            },
        }
    }
}

impl ReconnectionPolicy {
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = tokio::fs::read(path).await?;
        let policy: Self = serde_json::from_slice(&bytes)?;
        debug!(path = %path.display(), ?policy, "Loaded reconnection policy");
        Ok(policy)
    }

    pub fn interval_strategy(&self) -> IntervalStrategy {
        self.interval.clone().into()
    }
}

/// Runtime configuration settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub device_count: usize,
    pub device_prefix: String,
    pub select_index: usize,
    pub network: NetworkConfiguration,
    pub device: DeviceConfiguration,
    pub storage_path: PathBuf,
    pub fail_step: Option<MockStep>,
    pub reconnect_service: Option<String>,
    pub reconnect_failures: u32,
    pub max_retries: Option<i32>,
    pub policy_path: Option<PathBuf>,
    pub json: bool,
}

impl Settings {
    /// Policy from the configured file, or the default one
    ///
    /// A `--max-retries` given on the command line wins over the file.
    pub async fn reconnection_policy(&self) -> Result<ReconnectionPolicy, ConfigError> {
        let mut policy = match &self.policy_path {
            Some(path) => ReconnectionPolicy::load(path).await?,
            None => ReconnectionPolicy::default(),
        };
        if let Some(max_retries) = self.max_retries {
            policy.max_retries = max_retries;
        }
        Ok(policy)
    }
}

impl From<CliArgs> for Settings {
    fn from(args: CliArgs) -> Self {
        Settings {
            device_count: args.devices,
            device_prefix: args.device_prefix,
            select_index: args.select,
            network: NetworkConfiguration {
                ssid: args.ssid,
                passphrase: args.passphrase,
            },
            device: DeviceConfiguration {
                display_name: args.display_name,
                setup_code: args.setup_code,
            },
            storage_path: args.storage_path,
            fail_step: args.fail_step.map(MockStep::from),
            reconnect_service: args.reconnect_service,
            reconnect_failures: args.reconnect_failures,
            max_retries: args.max_retries,
            policy_path: args.policy,
            json: args.json,
        }
    }
}
