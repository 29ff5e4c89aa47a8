use thiserror::Error;

/// Errors that stop the server from coming up. Once the accept loop runs,
/// failures stay inside their connection threads.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Engine(#[from] strata_core::error::StrataError),

    #[error("I/O during startup: {0}")]
    Io(#[from] std::io::Error),
}
