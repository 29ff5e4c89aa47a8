use std::thread::{self, JoinHandle};

use crate::error::Result;
use crate::restore::split_chunk_batch;
use crate::session::recipe_exchange::RecipeLogin;
use crate::session::upload::UploadLogin;
use crate::session::{recipe_exchange, restore, upload, SessionResources};
use strata_protocol::{
    memory_channel, read_message, write_message, Channel, MemoryChannel, MessageHeader,
    MessageKind, RecipeHead, MESSAGE_HEADER_SIZE,
};
use strata_types::Fingerprint;

pub fn send_msg(
    channel: &mut dyn Channel,
    kind: MessageKind,
    client_id: u32,
    item_count: u32,
    payload: &[u8],
) {
    let header = MessageHeader::with_items(kind, client_id, item_count);
    write_message(channel, header, payload).unwrap();
}

pub fn recv_msg(channel: &mut dyn Channel, buf: &mut Vec<u8>) -> MessageHeader {
    read_message(channel, buf)
        .unwrap()
        .expect("peer closed the channel")
}

pub fn announcement(name: &str, head: RecipeHead) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(name.as_bytes());
    payload.extend_from_slice(&head.encode());
    payload
}

pub fn chunk_batch_payload(chunks: &[&[u8]]) -> Vec<u8> {
    let mut payload = Vec::new();
    for chunk in chunks {
        payload.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
        payload.extend_from_slice(chunk);
    }
    payload
}

pub fn fingerprint_batch(fingerprints: &[Fingerprint]) -> Vec<u8> {
    let mut payload = Vec::new();
    for fingerprint in fingerprints {
        payload.extend_from_slice(fingerprint.as_bytes());
    }
    payload
}

pub fn announced_head(chunks: &[&[u8]]) -> RecipeHead {
    RecipeHead {
        file_size: chunks.iter().map(|c| c.len() as u64).sum(),
        total_chunk_num: chunks.len() as u64,
    }
}

pub fn spawn_upload(
    resources: &SessionResources,
    client_id: u32,
    name: &str,
    head: RecipeHead,
) -> (MemoryChannel, JoinHandle<Result<()>>) {
    let (client, mut server) = memory_channel();
    let login = UploadLogin {
        client_id,
        file_name: name.to_string(),
        head,
    };
    let resources = resources.clone();
    let handle = thread::spawn(move || upload::run(&mut server, login, &resources));
    (client, handle)
}

pub fn spawn_recipe_download(
    resources: &SessionResources,
    client_id: u32,
    name: &str,
) -> (MemoryChannel, JoinHandle<Result<()>>) {
    let (client, mut server) = memory_channel();
    let login = RecipeLogin {
        client_id,
        file_name: name.to_string(),
    };
    let resources = resources.clone();
    let handle = thread::spawn(move || recipe_exchange::run(&mut server, login, &resources));
    (client, handle)
}

pub fn spawn_chunk_download(
    resources: &SessionResources,
    client_id: u32,
) -> (MemoryChannel, JoinHandle<Result<()>>) {
    let (client, mut server) = memory_channel();
    let resources = resources.clone();
    let handle = thread::spawn(move || restore::run(&mut server, client_id, &resources));
    (client, handle)
}

/// Client side of one file's upload, from login response to recipe end.
/// Chunks go up in a single batch; returns the existence flags the server
/// echoed for the secure recipe entries.
pub fn drive_upload(channel: &mut dyn Channel, client_id: u32, chunks: &[&[u8]]) -> Vec<u8> {
    let mut buf = Vec::new();
    let response = recv_msg(channel, &mut buf);
    assert_eq!(response.kind, MessageKind::LoginResponse);

    let count = chunks.len() as u32;
    send_msg(
        channel,
        MessageKind::ChunkBatch,
        client_id,
        count,
        &chunk_batch_payload(chunks),
    );
    send_msg(channel, MessageKind::ChunkBatchEnd, client_id, 0, &[]);

    let fingerprints: Vec<Fingerprint> = chunks.iter().map(|c| Fingerprint::compute(c)).collect();
    let entries = fingerprint_batch(&fingerprints);
    send_msg(
        channel,
        MessageKind::SecureRecipeBatch,
        client_id,
        count,
        &entries,
    );
    let reply = recv_msg(channel, &mut buf);
    assert_eq!(reply.kind, MessageKind::QueryResult);
    assert_eq!(reply.item_count, count);
    let flags = buf[MESSAGE_HEADER_SIZE..].to_vec();
    send_msg(channel, MessageKind::SecureRecipeEnd, client_id, 0, &[]);

    send_msg(
        channel,
        MessageKind::PlainRecipeBatch,
        client_id,
        count,
        &entries,
    );
    send_msg(channel, MessageKind::PlainRecipeEnd, client_id, 0, &[]);

    let keys: Vec<u8> = (0..chunks.len())
        .flat_map(|i| [i as u8; 32])
        .collect();
    send_msg(channel, MessageKind::KeyRecipeBatch, client_id, count, &keys);
    send_msg(channel, MessageKind::KeyRecipeEnd, client_id, 0, &[]);

    send_msg(
        channel,
        MessageKind::RecipeEnd,
        client_id,
        0,
        &announced_head(chunks).encode(),
    );
    flags
}

/// Upload `chunks` as `name` through a full session and wait for it to
/// finish.
pub fn upload_file(resources: &SessionResources, client_id: u32, name: &str, chunks: &[&[u8]]) {
    let (mut client, handle) = spawn_upload(resources, client_id, name, announced_head(chunks));
    drive_upload(&mut client, client_id, chunks);
    drop(client);
    handle.join().unwrap().unwrap();
}

/// Drain reconstructed chunk batches up to the end-of-chunks marker.
pub fn collect_restored_chunks(channel: &mut dyn Channel) -> Vec<Vec<u8>> {
    let mut chunks = Vec::new();
    let mut buf = Vec::new();
    loop {
        let header = recv_msg(channel, &mut buf);
        match header.kind {
            MessageKind::RestoredChunkBatch => {
                let payload = &buf[MESSAGE_HEADER_SIZE..];
                chunks.extend(split_chunk_batch(payload, header.item_count).unwrap());
            }
            MessageKind::RestoredChunkEnd => return chunks,
            other => panic!("unexpected message {other:?}"),
        }
    }
}
