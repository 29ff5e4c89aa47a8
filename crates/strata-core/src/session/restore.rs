use std::sync::Arc;

use tracing::info;

use crate::error::Result;
use crate::restore::{ChunkSink, RestoreDecoder};
use crate::session::{
    expect_client_ready, protocol_violation, read_session_message, SessionRead, SessionResources,
};
use strata_protocol::{write_message, Channel, MessageHeader, MessageKind, MESSAGE_HEADER_SIZE};

/// Drive one chunk-download session. The login carries no file name; the
/// requests themselves name the fingerprints to reconstruct.
///
/// After the login response and one client-ready, every incoming message
/// must be a chunk request. Each request is answered with reconstructed
/// chunk batches and an end-of-chunks marker; the client closing the
/// connection ends the session.
pub fn run(channel: &mut dyn Channel, client_id: u32, resources: &SessionResources) -> Result<()> {
    let config = &resources.config;
    let mut decoder = RestoreDecoder::new(
        Arc::clone(&resources.index),
        resources.containers.clone(),
        config.container_capping,
        config.read_cache_capacity,
    );

    let response = MessageHeader::new(MessageKind::LoginResponse, client_id);
    write_message(channel, response, &[])?;

    let mut buf = Vec::new();
    expect_client_ready(channel, &mut buf)?;
    info!(client_id, "chunk download session started");

    let mut served = 0u64;
    loop {
        let header = match read_session_message(channel, &mut buf)? {
            SessionRead::Message(header) => header,
            SessionRead::End => break,
        };
        match header.kind {
            MessageKind::ChunkRequest => {
                let mut sink = ChunkSink::new(channel, client_id, config.send_chunk_batch_size);
                decoder.process_request(
                    &buf[MESSAGE_HEADER_SIZE..],
                    header.item_count,
                    &mut sink,
                )?;
                served += u64::from(header.item_count);
            }
            other => return Err(protocol_violation("chunk download", other)),
        }
    }
    info!(client_id, chunks = served, "chunk download session finished");
    Ok(())
}
