//! Identifier newtypes shared across the strata crates.

pub mod container_id;
pub mod fingerprint;

pub use container_id::{ContainerId, CONTAINER_ID_SIZE};
pub use fingerprint::{Fingerprint, FINGERPRINT_SIZE};
