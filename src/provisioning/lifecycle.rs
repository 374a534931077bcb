//! Enter and exit behavior of provisioning states

use chrono::Utc;
use futures::{FutureExt, future::BoxFuture};
use tracing::{debug, info, warn};

use crate::{
    backend::{DeviceStorage, ProvisioningBackend},
    core::{
        context::ProvisioningContext,
        error::{CollaboratorError, CollaboratorResult, ProvisioningFault},
        types::ProvisionedDevice,
    },
    provisioning::{event::ProvisioningEvent, state::ProvisioningState},
};

/// What a finished enter task hands back to the driver
#[derive(Debug)]
pub(crate) enum EnterOutcome {
    /// Feed this event back into the machine
    Event(ProvisioningEvent),
    /// Contract violation or unrecoverable collaborator failure
    Fault(ProvisioningFault),
    /// Result of persisting the provisioned device
    Persisted(Result<ProvisionedDevice, String>),
    /// Nothing to report
    Settled,
}

/// Map a collaborator result onto the success or failure event of a step
fn step_outcome(
    result: CollaboratorResult<()>,
    success: ProvisioningEvent,
    failure: fn(CollaboratorError) -> ProvisioningEvent,
) -> EnterOutcome {
    match result {
        Ok(()) => EnterOutcome::Event(success),
        Err(error @ CollaboratorError::Internal(_)) => {
            EnterOutcome::Fault(ProvisioningFault::Collaborator(error))
        }
        Err(error) => EnterOutcome::Event(failure(error)),
    }
}

fn fault(fault: ProvisioningFault) -> Option<BoxFuture<'static, EnterOutcome>> {
    Some(futures::future::ready(EnterOutcome::Fault(fault)).boxed())
}

impl ProvisioningState {
    /// Start the enter work of this state
    ///
    /// Everything the work needs is cloned out of the context up front, so the
    /// returned future can run detached from the driver. States without enter
    /// work return `None`.
    pub(crate) fn enter<B: ProvisioningBackend, S: DeviceStorage>(
        &self,
        context: &ProvisioningContext<B, S>,
    ) -> Option<BoxFuture<'static, EnterOutcome>> {
        let session = context.session_id();
        let backend = context.backend().clone();

        match self {
            ProvisioningState::Scanning => {
                debug!(%session, "Starting device scan");
                Some(
                    async move {
                        match backend.start_scanning().await {
                            Ok(devices) => {
                                info!(%session, count = devices.len(), "Scan finished");
                                EnterOutcome::Event(ProvisioningEvent::DevicesFound(devices))
                            }
                            Err(CollaboratorError::Timeout) => {
                                EnterOutcome::Event(ProvisioningEvent::ScanTimeout)
                            }
                            Err(error @ CollaboratorError::Internal(_)) => {
                                EnterOutcome::Fault(ProvisioningFault::Collaborator(error))
                            }
                            Err(error) => EnterOutcome::Event(ProvisioningEvent::ScanFailed(error)),
                        }
                    }
                    .boxed(),
                )
            }

            ProvisioningState::Connecting => {
                let Some(device) = context.selected_device().cloned() else {
                    return fault(ProvisioningFault::MissingSelectedDevice);
                };
                debug!(%session, device = %device.id, "Connecting to device");
                Some(
                    async move {
                        step_outcome(
                            backend.connect(&device).await,
                            ProvisioningEvent::DeviceConnected,
                            ProvisioningEvent::ConnectionFailed,
                        )
                    }
                    .boxed(),
                )
            }

            ProvisioningState::Authenticating => {
                let Some(device) = context.selected_device().cloned() else {
                    return fault(ProvisioningFault::MissingSelectedDevice);
                };
                let proof = context.pairing_proof(&device);
                debug!(
                    %session,
                    device = %device.id,
                    with_proof = proof.is_some(),
                    "Authenticating device"
                );
                Some(
                    async move {
                        step_outcome(
                            backend.authenticate(&device, proof).await,
                            ProvisioningEvent::AuthenticationSucceeded,
                            ProvisioningEvent::AuthenticationFailed,
                        )
                    }
                    .boxed(),
                )
            }

            ProvisioningState::Configuring => {
                let Some(device) = context.selected_device().cloned() else {
                    return fault(ProvisioningFault::MissingSelectedDevice);
                };
                let Some(network) = context.network_configuration().cloned() else {
                    return fault(ProvisioningFault::MissingNetworkConfiguration);
                };
                debug!(%session, device = %device.id, ssid = %network.ssid, "Configuring device");
                Some(
                    async move {
                        step_outcome(
                            backend.configure(&device, &network).await,
                            ProvisioningEvent::ConfigurationSucceeded,
                            ProvisioningEvent::ConfigurationFailed,
                        )
                    }
                    .boxed(),
                )
            }

            ProvisioningState::Verifying => {
                let Some(device) = context.selected_device().cloned() else {
                    return fault(ProvisioningFault::MissingSelectedDevice);
                };
                debug!(%session, device = %device.id, "Verifying device");
                Some(
                    async move {
                        step_outcome(
                            backend.verify(&device).await,
                            ProvisioningEvent::VerificationSucceeded,
                            ProvisioningEvent::VerificationFailed,
                        )
                    }
                    .boxed(),
                )
            }

            ProvisioningState::Cancelling => {
                let cleanup = context.cleanup();
                Some(
                    async move {
                        cleanup.await;
                        EnterOutcome::Event(ProvisioningEvent::Cancelled)
                    }
                    .boxed(),
                )
            }

            // Reached directly from states without an in-flight call
            ProvisioningState::Cancelled => {
                let cleanup = context.cleanup();
                Some(
                    async move {
                        cleanup.await;
                        EnterOutcome::Settled
                    }
                    .boxed(),
                )
            }

            ProvisioningState::Completed => {
                let Some(device) = context.selected_device().cloned() else {
                    return fault(ProvisioningFault::MissingSelectedDevice);
                };
                let provisioned = ProvisionedDevice {
                    display_name: context
                        .device_configuration()
                        .display_name
                        .clone()
                        .unwrap_or_else(|| device.name.clone()),
                    ssid: context.network_configuration().map(|n| n.ssid.clone()),
                    provisioned_at: Utc::now(),
                    device,
                };
                let storage = context.storage().clone();
                Some(
                    async move {
                        match storage.save_provisioned_device(&provisioned).await {
                            Ok(()) => {
                                info!(%session, device = %provisioned.device.id, "Provisioned device stored");
                                EnterOutcome::Persisted(Ok(provisioned))
                            }
                            Err(e) => {
                                warn!(%session, device = %provisioned.device.id, error = %e, "Failed to store provisioned device");
                                EnterOutcome::Persisted(Err(e.to_string()))
                            }
                        }
                    }
                    .boxed(),
                )
            }

            ProvisioningState::Idle
            | ProvisioningState::DeviceSelection
            | ProvisioningState::ScanTimeout(_)
            | ProvisioningState::ConnectionFailed(_)
            | ProvisioningState::AuthenticationFailed(_)
            | ProvisioningState::ConfigurationFailed(_)
            | ProvisioningState::VerificationFailed(_)
            | ProvisioningState::Error { .. } => None,
        }
    }

    /// Synchronous exit work, run before the next state is installed
    pub(crate) fn exit<B: ProvisioningBackend, S: DeviceStorage>(
        &self,
        context: &ProvisioningContext<B, S>,
    ) {
        if let ProvisioningState::Scanning = self {
            debug!(session = %context.session_id(), "Stopping device scan");
            context.backend().stop_scanning();
        }
    }
}
