//! JSON file device storage

use std::path::{Path, PathBuf};

use tokio::{fs, sync::Mutex};
use tracing::debug;

use crate::{
    backend::DeviceStorage,
    core::{error::StorageResult, types::ProvisionedDevice},
};

/// Stores provisioned devices as a JSON array in a single file
///
/// A device provisioned again replaces its previous entry.
#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all stored devices; a missing file means none
    pub async fn load(&self) -> StorageResult<Vec<ProvisionedDevice>> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl DeviceStorage for JsonFileStorage {
    async fn save_provisioned_device(&self, device: &ProvisionedDevice) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;

        let mut devices = self.load().await?;
        devices.retain(|d| d.device.id != device.device.id);
        devices.push(device.clone());

        // Write next to the target and rename so readers never see a partial file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&devices)?).await?;
        fs::rename(&tmp, &self.path).await?;

        debug!(
            path = %self.path.display(),
            device = %device.device.id,
            "Stored provisioned device"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        error::StorageError,
        types::{DeviceId, DiscoveredDevice, TransportKind},
    };
    use pretty_assertions::assert_eq;

    fn provisioned(id: &str, name: &str) -> ProvisionedDevice {
        ProvisionedDevice {
            device: DiscoveredDevice {
                id: DeviceId::new(id),
                name: id.to_uppercase(),
                transport: TransportKind::Zigbee,
                rssi: -70,
            },
            display_name: name.to_string(),
            ssid: Some("HomeNet".into()),
            provisioned_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonFileStorage::new(dir.path().join("devices.json"));

        assert!(storage.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_and_replace() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonFileStorage::new(dir.path().join("devices.json"));

        storage
            .save_provisioned_device(&provisioned("plug", "Plug"))
            .await
            .unwrap();
        storage
            .save_provisioned_device(&provisioned("bulb", "Bulb"))
            .await
            .unwrap();
        let renamed = provisioned("plug", "Desk plug");
        storage.save_provisioned_device(&renamed).await.unwrap();

        let devices = storage.load().await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].display_name, "Bulb");
        assert_eq!(devices[1], renamed);
        assert!(!dir.path().join("devices.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");
        std::fs::write(&path, b"not json").unwrap();

        let storage = JsonFileStorage::new(&path);
        assert!(matches!(
            storage.load().await,
            Err(StorageError::Serialization(_))
        ));
    }
}
