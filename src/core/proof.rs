//! Setup-code proof derivation with SHA3-256
//!
//! A client proves possession of the setup code printed on a device by
//! sending `SHA3-256(device_id || ":" || setup_code)`. The code itself never
//! leaves the phone.

use sha3::{Digest, Sha3_256};

use crate::core::types::DeviceId;

/// 32-byte proof sent to the device during authentication
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PairingProof([u8; 32]);

impl PairingProof {
    /// Derive the proof for a device from its setup code
    pub fn derive(device_id: &DeviceId, setup_code: &str) -> Self {
        let mut hasher = Sha3_256::new();
        hasher.update(device_id.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(setup_code.as_bytes());
        Self(hasher.finalize().into())
    }

    #[cfg(test)]
    pub(crate) fn from_hex(encoded: &str) -> Option<Self> {
        let bytes = hex::decode(encoded).ok()?;
        let proof: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(proof))
    }

    #[cfg(test)]
    pub(crate) fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Check a received proof against the expected setup code
    pub fn verify(&self, device_id: &DeviceId, setup_code: &str) -> bool {
        let expected = Self::derive(device_id, setup_code);
        // Fold over all bytes so the comparison time does not depend on the first mismatch
        self.0
            .iter()
            .zip(expected.0.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl std::fmt::Debug for PairingProof {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PairingProof({})", self.to_hex())
    }
}
