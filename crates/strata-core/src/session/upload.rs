use crossbeam_channel::{bounded, Sender};
use tracing::info;

use crate::container::{ContainerBuilder, SealedContainer};
use crate::dedup;
use crate::error::{Result, StrataError};
use crate::pipeline;
use crate::recipe::{RecipePart, RecipeWriterSet};
use crate::session::{
    protocol_violation, read_session_message, SessionRead, SessionResources,
};
use strata_protocol::{
    decode_file_announcement, write_message, Channel, MessageHeader, MessageKind, RecipeHead,
    MESSAGE_HEADER_SIZE, RECIPE_ENTRY_SIZE,
};

/// Decoded upload login: which client, and the name and announced head of
/// the session's first file.
#[derive(Debug, Clone)]
pub struct UploadLogin {
    pub client_id: u32,
    pub file_name: String,
    pub head: RecipeHead,
}

impl UploadLogin {
    pub fn decode(header: &MessageHeader, payload: &[u8]) -> Result<Self> {
        let (file_name, head) = decode_file_announcement(payload)?;
        Ok(UploadLogin {
            client_id: header.client_id,
            file_name,
            head,
        })
    }
}

/// Drive one upload session to completion.
///
/// Sets up the recipe writers and the container pipeline, acknowledges the
/// login, then loops on the message exchange until the client closes.
/// Teardown runs regardless of how the exchange ended: the open container
/// is sealed and queued, the queue is closed, and the writer thread joined
/// before any error is surfaced.
pub fn run(
    channel: &mut dyn Channel,
    login: UploadLogin,
    resources: &SessionResources,
) -> Result<()> {
    let config = &resources.config;
    resources
        .index
        .add_logical(login.head.file_size, login.head.total_chunk_num);
    let mut writers = Some(resources.recipes.create_writers(&login.file_name, login.head)?);

    let (queue, drain) = bounded(config.container_queue_depth);
    let writer = pipeline::spawn(drain, resources.containers.clone())?;
    let mut builder = ContainerBuilder::new(config.max_container_size);

    let response = MessageHeader::new(MessageKind::LoginResponse, login.client_id);
    write_message(channel, response, &[])?;
    info!(client_id = login.client_id, file = %login.file_name, "upload session started");

    let exchange = exchange_loop(
        channel,
        resources,
        &mut writers,
        &mut builder,
        &queue,
        login.client_id,
    );

    // Chunks already indexed must reach disk even when the exchange
    // failed, so the flush and join run before any error propagates.
    let flush = match builder.seal() {
        Some(sealed) => queue.send(sealed).map_err(|_| StrataError::WriterStopped),
        None => Ok(()),
    };
    drop(queue);
    let drained = writer.join();

    exchange?;
    flush?;
    drained?;

    if let Some(set) = writers.take() {
        set.finalize()?;
    }

    let stats = resources.index.stats();
    info!(
        client_id = login.client_id,
        logical_chunks = stats.logical_chunks,
        unique_chunks = stats.unique_chunks,
        dedup_ratio = stats.dedup_ratio(),
        "upload session finished"
    );
    Ok(())
}

fn exchange_loop(
    channel: &mut dyn Channel,
    resources: &SessionResources,
    writers: &mut Option<RecipeWriterSet>,
    builder: &mut ContainerBuilder,
    queue: &Sender<SealedContainer>,
    client_id: u32,
) -> Result<()> {
    let config = &resources.config;
    let mut buf = Vec::new();
    loop {
        let header = match read_session_message(channel, &mut buf)? {
            SessionRead::Message(header) => header,
            SessionRead::End => return Ok(()),
        };
        let payload = &buf[MESSAGE_HEADER_SIZE..];
        match header.kind {
            MessageKind::ChunkBatch => {
                dedup::process_chunk_batch(
                    &resources.index,
                    builder,
                    queue,
                    payload,
                    header.item_count,
                    config.max_chunk_size,
                )?;
            }
            MessageKind::SecureRecipeBatch => {
                require_entry_bytes(payload, header.item_count)?;
                current(writers)?.append(RecipePart::Secure, payload)?;
                let flags =
                    dedup::process_existence_batch(&resources.index, payload, header.item_count)?;
                let reply = MessageHeader::with_items(
                    MessageKind::QueryResult,
                    client_id,
                    header.item_count,
                );
                write_message(channel, reply, &flags)?;
            }
            MessageKind::PlainRecipeBatch => {
                require_entry_bytes(payload, header.item_count)?;
                current(writers)?.append(RecipePart::Plain, payload)?;
            }
            MessageKind::KeyRecipeBatch => {
                require_entry_bytes(payload, header.item_count)?;
                current(writers)?.append(RecipePart::Key, payload)?;
            }
            MessageKind::RecipeEnd => {
                let head = RecipeHead::decode(payload)?;
                current(writers)?.record_total_size(head);
            }
            MessageKind::NewFile => {
                let (file_name, head) = decode_file_announcement(payload)?;
                if let Some(set) = writers.take() {
                    set.finalize()?;
                }
                resources
                    .index
                    .add_logical(head.file_size, head.total_chunk_num);
                *writers = Some(resources.recipes.create_writers(&file_name, head)?);
            }
            // End-of-stream markers within one file; the per-part state
            // already lives in the recipe writers.
            MessageKind::ChunkBatchEnd
            | MessageKind::SecureRecipeEnd
            | MessageKind::PlainRecipeEnd
            | MessageKind::KeyRecipeEnd => {}
            other => return Err(protocol_violation("upload", other)),
        }
    }
}

fn current(writers: &mut Option<RecipeWriterSet>) -> Result<&mut RecipeWriterSet> {
    writers.as_mut().ok_or_else(|| {
        StrataError::Protocol("recipe data with no open file in this session".into())
    })
}

fn require_entry_bytes(payload: &[u8], item_count: u32) -> Result<()> {
    if payload.len() != item_count as usize * RECIPE_ENTRY_SIZE {
        return Err(StrataError::Protocol(format!(
            "recipe batch of {} bytes does not hold {item_count} entries",
            payload.len()
        )));
    }
    Ok(())
}
