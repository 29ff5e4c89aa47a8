//! Per-connection session drivers.
//!
//! Each accepted connection runs exactly one session: upload, recipe
//! download, or chunk download, chosen by the login message. Sessions are
//! fully synchronous on their own thread and talk to the peer through a
//! [`Channel`].

pub mod recipe_exchange;
pub mod restore;
pub mod upload;

use std::sync::Arc;

use tracing::warn;

use crate::config::ServerConfig;
use crate::error::{Result, StrataError};
use crate::index::FingerprintIndex;
use crate::recipe::RecipeStore;
use crate::storage::ContainerStore;
use strata_protocol::{read_message, Channel, MessageHeader, MessageKind, ProtocolError};

/// Everything a session needs besides its connection. Cloned per session;
/// the fingerprint index is the one piece shared across all of them.
#[derive(Clone)]
pub struct SessionResources {
    pub config: ServerConfig,
    pub index: Arc<FingerprintIndex>,
    pub containers: ContainerStore,
    pub recipes: RecipeStore,
}

/// One read from a session loop. Connection loss is folded into the normal
/// end-of-stream signal: a peer that vanishes mid-transfer gets the same
/// teardown as one that closes cleanly.
pub(crate) enum SessionRead {
    Message(MessageHeader),
    End,
}

pub(crate) fn read_session_message(
    channel: &mut dyn Channel,
    buf: &mut Vec<u8>,
) -> Result<SessionRead> {
    match read_message(channel, buf) {
        Ok(Some(header)) => Ok(SessionRead::Message(header)),
        Ok(None) => Ok(SessionRead::End),
        Err(ProtocolError::Io(err)) => {
            warn!(error = %err, "connection lost mid-session");
            Ok(SessionRead::End)
        }
        Err(err) => Err(err.into()),
    }
}

/// Block for the peer's ready acknowledgment. Anything else, including a
/// close, is a violation of the stop-and-wait exchange.
pub(crate) fn expect_client_ready(channel: &mut dyn Channel, buf: &mut Vec<u8>) -> Result<()> {
    match read_message(channel, buf)? {
        Some(header) if header.kind == MessageKind::ClientReady => Ok(()),
        Some(header) => Err(StrataError::Protocol(format!(
            "expected client ready, got {:?}",
            header.kind
        ))),
        None => Err(StrataError::Protocol(
            "connection closed while awaiting client ready".into(),
        )),
    }
}

pub(crate) fn protocol_violation(session: &str, kind: MessageKind) -> StrataError {
    StrataError::Protocol(format!("{session} session cannot handle {kind:?}"))
}
