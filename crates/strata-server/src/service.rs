use std::net::TcpStream;

use tracing::warn;

use strata_core::error::{Result, StrataError};
use strata_core::session::recipe_exchange::{self, RecipeLogin};
use strata_core::session::restore;
use strata_core::session::upload::{self, UploadLogin};
use strata_protocol::{
    read_message, Channel, MessageHeader, MessageKind, StreamChannel, MESSAGE_HEADER_SIZE,
};

use crate::state::ServerState;

/// Serve one accepted connection: read the login, take the client's
/// session lock, and hand the channel to the matching session driver.
/// Errors are logged here; the accept loop never sees them.
pub fn handle_connection(stream: TcpStream, state: ServerState) {
    let peer = stream
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".into());
    let max_frame = state.config().max_frame_size();
    let mut channel = StreamChannel::with_frame_limit(stream, max_frame);

    let mut buf = Vec::new();
    let header = match read_message(&mut channel, &mut buf) {
        Ok(Some(header)) => header,
        // Connected and left without logging in.
        Ok(None) => return,
        Err(err) => {
            warn!(peer = %peer, error = %err, "login never arrived");
            return;
        }
    };
    let client_id = header.client_id;

    let lock = state.client_lock(client_id);
    let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

    if let Err(err) = dispatch(&mut channel, &header, &buf[MESSAGE_HEADER_SIZE..], &state) {
        warn!(client_id, peer = %peer, error = %err, "session ended with error");
    }
}

fn dispatch(
    channel: &mut dyn Channel,
    header: &MessageHeader,
    payload: &[u8],
    state: &ServerState,
) -> Result<()> {
    let resources = state.resources();
    match header.kind {
        MessageKind::UploadLogin => {
            let login = UploadLogin::decode(header, payload)?;
            upload::run(channel, login, resources)
        }
        MessageKind::DownloadRecipeLogin => {
            let login = RecipeLogin::decode(header, payload)?;
            recipe_exchange::run(channel, login, resources)
        }
        MessageKind::DownloadChunkLogin => restore::run(channel, header.client_id, resources),
        other => Err(StrataError::Protocol(format!("{other:?} is not a login"))),
    }
}
