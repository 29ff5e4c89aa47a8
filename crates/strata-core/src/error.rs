use thiserror::Error;

use strata_types::{ContainerId, Fingerprint};

pub type Result<T> = std::result::Result<T, StrataError>;

#[derive(Debug, Error)]
pub enum StrataError {
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("wire error: {0}")]
    Wire(#[from] strata_protocol::ProtocolError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("container {id} is corrupt: {reason}")]
    CorruptContainer { id: ContainerId, reason: String },

    #[error("container not found in store: {0}")]
    ContainerMissing(ContainerId),

    #[error("chunk {0} has no index entry")]
    ChunkNotIndexed(Fingerprint),

    #[error("chunk {fingerprint} missing from container {container}")]
    ChunkNotInContainer {
        fingerprint: Fingerprint,
        container: ContainerId,
    },

    #[error("invalid recipe name: '{0}'")]
    InvalidRecipeName(String),

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("container writer stopped before the session finished")]
    WriterStopped,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}
