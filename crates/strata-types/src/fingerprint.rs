use blake2::digest::{Update, VariableOutput};
use blake2::Blake2bVar;
use std::fmt;

/// Byte length of a chunk fingerprint.
pub const FINGERPRINT_SIZE: usize = 32;

/// A 32-byte chunk fingerprint computed as unkeyed BLAKE2b-256 over the
/// ciphertext payload. Identical payloads always fingerprint identically,
/// which is what the dedup decision rests on.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub [u8; FINGERPRINT_SIZE]);

impl Fingerprint {
    /// Compute the fingerprint of a chunk payload.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Blake2bVar::new(FINGERPRINT_SIZE).expect("valid output size");
        hasher.update(data);
        let mut out = [0u8; FINGERPRINT_SIZE];
        hasher.finalize_variable(&mut out).expect("correct length");
        Fingerprint(out)
    }

    /// Reconstruct a fingerprint from exactly [`FINGERPRINT_SIZE`] bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; FINGERPRINT_SIZE] = bytes.try_into().ok()?;
        Some(Fingerprint(arr))
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_SIZE] {
        &self.0
    }

    /// Hex-encode the full fingerprint, e.g. for use as an index key.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}
