use rand::RngCore;
use std::fmt;

/// Byte length of a container identifier.
pub const CONTAINER_ID_SIZE: usize = 8;

/// An 8-byte container identifier (random, assigned when the container is
/// allocated). The hex form doubles as the container's file name.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContainerId(pub [u8; CONTAINER_ID_SIZE]);

impl ContainerId {
    /// Generate a random container ID.
    pub fn generate() -> Self {
        let mut buf = [0u8; CONTAINER_ID_SIZE];
        rand::thread_rng().fill_bytes(&mut buf);
        ContainerId(buf)
    }

    /// Reconstruct a container ID from exactly [`CONTAINER_ID_SIZE`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; CONTAINER_ID_SIZE] = bytes.try_into().ok()?;
        Some(ContainerId(arr))
    }

    pub fn as_bytes(&self) -> &[u8; CONTAINER_ID_SIZE] {
        &self.0
    }

    /// Hex-encode the full container ID; this is the on-disk file name.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a container ID from a 16-character hex string.
    pub fn from_hex(hex_str: &str) -> std::result::Result<Self, String> {
        let bytes = hex::decode(hex_str).map_err(|e| format!("invalid hex: {e}"))?;
        ContainerId::from_bytes(&bytes)
            .ok_or_else(|| format!("expected {} bytes, got {}", CONTAINER_ID_SIZE, bytes.len()))
    }
}

impl fmt::Debug for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContainerId({})", self.to_hex())
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
