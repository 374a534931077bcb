//! Collaborator abstraction layer

pub mod collaborators;
pub mod file_storage;
pub mod mock_backend;

pub use collaborators::{
    AuthenticationService, ConfigurationService, ConnectionService, DeviceStorage,
    ProvisioningBackend, ScanningService, TransportConnector, VerificationService,
};
pub use file_storage::JsonFileStorage;
pub use mock_backend::{MockBackend, MockStep, MockStorage, MockTransport};
