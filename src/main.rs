//! IoT Provisioning Engine - Main Entry Point
//!
//! Runs a provisioning session against simulated collaborators and,
//! optionally, a reconnection run against a simulated transport.

use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use iot_provisioning::{
    backend::{JsonFileStorage, MockBackend, MockTransport},
    config::{CliArgs, Settings},
    core::{
        context::ProvisioningContext,
        error::{CollaboratorError, ConnectionStrategyError},
        types::{DeviceId, DiscoveredDevice, TransportKind},
    },
    provisioning::{ProvisioningHandle, ProvisioningResult, ProvisioningStateMachine, StateKind},
    reconnection::{
        ConnectionContext, ConnectionStrategy, DisconnectionReason, ReconnectionParameters,
        ReconnectionResult, ReconnectionStrategy,
    },
};

const SIMULATED_TRANSPORTS: [TransportKind; 4] = [
    TransportKind::Ble,
    TransportKind::Wifi,
    TransportKind::Zigbee,
    TransportKind::Mqtt,
];

#[derive(Serialize)]
struct RunSummary {
    provisioning: ProvisioningResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    reconnection: Option<ReconnectionResult>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so JSON output on stdout stays machine readable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,iot_provisioning=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = CliArgs::parse();
    info!(?args, "Starting IoT provisioning simulation");
    let settings = Settings::from(args);

    if settings.device_count == 0 {
        error!("At least one simulated device is required");
        return Err("No simulated devices".into());
    }
    if settings.select_index >= settings.device_count {
        error!(
            select = settings.select_index,
            devices = settings.device_count,
            "Selected device index out of range"
        );
        return Err("Selected device index out of range".into());
    }

    let devices = simulated_devices(&settings);
    let target = devices[settings.select_index].clone();

    let backend = MockBackend::new();
    backend.set_devices(devices).await;
    if let Some(code) = &settings.device.setup_code {
        backend.set_setup_code(target.id.clone(), code.clone()).await;
    }
    if let Some(step) = settings.fail_step {
        info!(?step, "Injecting a single failure");
        backend
            .fail_next(step, CollaboratorError::Rejected("injected failure".into()))
            .await;
    }

    let storage = Arc::new(JsonFileStorage::new(&settings.storage_path));
    info!(path = %storage.path().display(), "Device storage initialized");

    let context = ProvisioningContext::new(Arc::new(backend), storage)
        .with_network_configuration(settings.network.clone())
        .with_device_configuration(settings.device.clone());
    let handle = ProvisioningStateMachine::new(context).spawn();

    if !drive_session(&handle, &target, settings.json).await? {
        if let Err(e) = handle.cancel().await {
            debug!(error = %e, "Session already finished");
        }
    }
    let provisioning = handle.join().await?;

    let reconnection = match (&settings.reconnect_service, provisioning.is_completed()) {
        (Some(service_id), true) => {
            Some(run_reconnection(&settings, service_id, target.transport).await?)
        }
        (Some(_), false) => {
            warn!("Skipping reconnection run, provisioning did not complete");
            None
        }
        (None, _) => None,
    };

    let completed = provisioning.is_completed();
    let summary = RunSummary {
        provisioning,
        reconnection,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if !completed {
        return Err("Provisioning did not complete".into());
    }
    Ok(())
}

fn simulated_devices(settings: &Settings) -> Vec<DiscoveredDevice> {
    (0..settings.device_count)
        .map(|i| DiscoveredDevice {
            id: DeviceId::new(format!("{}-{:04x}", settings.device_prefix, i + 1)),
            name: format!("{} {}", settings.device_prefix, i + 1),
            transport: SIMULATED_TRANSPORTS[i % SIMULATED_TRANSPORTS.len()],
            rssi: -40 - ((i % 50) as i16 * 7) % 50,
        })
        .collect()
}

/// Play the user: select the target device and retry the first failure
///
/// Returns `false` if the session has to be cancelled by the caller.
async fn drive_session(
    handle: &ProvisioningHandle,
    target: &DiscoveredDevice,
    json: bool,
) -> Result<bool, Box<dyn std::error::Error>> {
    let mut notifications = handle.subscribe();
    handle.start().await?;

    let mut retried = false;
    loop {
        let notification = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), cancelling provisioning");
                return Ok(false);
            }
            notification = notifications.recv() => notification,
        };

        let notification = match notification {
            Ok(notification) => notification,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Missed provisioning notifications");
                continue;
            }
            Err(RecvError::Closed) => return Ok(true),
        };

        if json {
            println!("{}", serde_json::to_string(&notification)?);
        }

        match notification.to {
            StateKind::DeviceSelection => handle.select_device(target.clone()).await?,
            StateKind::ScanTimeout
            | StateKind::ConnectionFailed
            | StateKind::AuthenticationFailed
            | StateKind::ConfigurationFailed
            | StateKind::VerificationFailed
            | StateKind::Error => {
                if retried {
                    warn!(state = %notification.to, "Second failure, giving up");
                    return Ok(false);
                }
                retried = true;
                debug!(state = %notification.to, "Retrying after failure");
                handle.retry().await?;
            }
            StateKind::Cancelled | StateKind::Completed => return Ok(true),
            _ => {}
        }
    }
}

async fn run_reconnection(
    settings: &Settings,
    service_id: &str,
    transport_kind: TransportKind,
) -> Result<ReconnectionResult, Box<dyn std::error::Error>> {
    let policy = settings.reconnection_policy().await?;

    let transport = Arc::new(MockTransport::new());
    for _ in 0..settings.reconnect_failures {
        transport.push_outcome(Err(ConnectionStrategyError::ConnectionFailed(
            "simulated outage".into(),
        )));
    }

    let strategy = ReconnectionStrategy::new(transport);
    let mut events = strategy.subscribe();

    let parameters = ReconnectionParameters::new(service_id, DisconnectionReason::NetworkLost)
        .with_configuration(serde_json::json!({ "ssid": settings.network.ssid }))
        .with_max_retries(policy.max_retries)
        .with_interval(policy.interval_strategy())
        .allow_degraded(policy.allow_degraded_connection);
    let context = ConnectionContext::new(transport_kind);

    info!(
        service_id,
        estimate = ?strategy.estimate_connection_time(&parameters, &context),
        "Simulating reconnection"
    );

    let run = strategy.execute_connection(parameters, &context);
    tokio::pin!(run);

    let result = loop {
        tokio::select! {
            result = &mut run => break result?,
            Ok(event) = events.recv() => {
                if settings.json {
                    println!("{}", serde_json::to_string(&event)?);
                } else {
                    debug!(?event, "Reconnection progress");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), cancelling reconnection");
                strategy.cancel_reconnection(service_id);
            }
        }
    };

    while let Ok(event) = events.try_recv() {
        if settings.json {
            println!("{}", serde_json::to_string(&event)?);
        }
    }

    Ok(result)
}
