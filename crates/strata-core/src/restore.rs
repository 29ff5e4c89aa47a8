use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::container::ContainerView;
use crate::error::{Result, StrataError};
use crate::index::FingerprintIndex;
use crate::read_cache::ReadCache;
use crate::storage::ContainerStore;
use strata_protocol::{
    write_message, Channel, MessageHeader, MessageKind, CHUNK_LENGTH_PREFIX_SIZE,
};
use strata_types::{ContainerId, Fingerprint, FINGERPRINT_SIZE};

/// Accumulates reconstructed chunks as `[length: u32 LE][payload]` items
/// and ships them as one framed batch whenever a full send-batch is ready.
pub struct ChunkSink<'a> {
    channel: &'a mut dyn Channel,
    client_id: u32,
    batch_size: usize,
    buf: Vec<u8>,
    items: u32,
}

impl<'a> ChunkSink<'a> {
    pub fn new(channel: &'a mut dyn Channel, client_id: u32, batch_size: usize) -> Self {
        Self {
            channel,
            client_id,
            batch_size,
            buf: Vec::new(),
            items: 0,
        }
    }

    pub fn push_chunk(&mut self, payload: &[u8]) -> Result<()> {
        self.buf
            .extend_from_slice(&(payload.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(payload);
        self.items += 1;
        if self.items as usize == self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.items == 0 {
            return Ok(());
        }
        let header = MessageHeader::with_items(
            MessageKind::RestoredChunkBatch,
            self.client_id,
            self.items,
        );
        write_message(self.channel, header, &self.buf)?;
        self.buf.clear();
        self.items = 0;
        Ok(())
    }

    /// Flush the partial tail batch and send the end-of-chunks marker that
    /// closes one request.
    pub fn finish(&mut self) -> Result<()> {
        self.flush()?;
        let header = MessageHeader::new(MessageKind::RestoredChunkEnd, self.client_id);
        write_message(self.channel, header, &[])?;
        Ok(())
    }
}

/// Reconstructs requested chunks from stored containers.
///
/// Requests are processed in order but container fetches are grouped: the
/// decoder walks the resolved entries, collects up to `capping` distinct
/// container identifiers, fetches that working set (cache first), builds a
/// transient fingerprint-to-range index from the container headers, and
/// replays the buffered entries through it. The working set and offset
/// index are discarded after each group.
pub struct RestoreDecoder {
    index: Arc<FingerprintIndex>,
    store: ContainerStore,
    cache: ReadCache,
    capping: usize,
}

impl RestoreDecoder {
    pub fn new(
        index: Arc<FingerprintIndex>,
        store: ContainerStore,
        capping: usize,
        cache_capacity: usize,
    ) -> Self {
        Self {
            index,
            store,
            cache: ReadCache::new(cache_capacity),
            capping,
        }
    }

    /// Serve one chunk-request batch: `declared_count` fingerprints,
    /// emitted back through `sink` in request order, terminated by the
    /// sink's end marker.
    pub fn process_request(
        &mut self,
        payload: &[u8],
        declared_count: u32,
        sink: &mut ChunkSink<'_>,
    ) -> Result<()> {
        let expected = declared_count as usize * FINGERPRINT_SIZE;
        if payload.len() != expected {
            return Err(StrataError::Protocol(format!(
                "chunk request of {} bytes does not hold {declared_count} fingerprints",
                payload.len()
            )));
        }

        // Phase 1: resolve every fingerprint to its container before any
        // disk work. A recipe entry with no index entry is a consistency
        // fault, not an I/O problem.
        let mut resolved = Vec::with_capacity(declared_count as usize);
        for raw in payload.chunks_exact(FINGERPRINT_SIZE) {
            let fingerprint = Fingerprint::from_bytes(raw).expect("exact fingerprint width");
            let container = self
                .index
                .lookup(&fingerprint)?
                .ok_or(StrataError::ChunkNotIndexed(fingerprint))?;
            resolved.push((fingerprint, container));
        }

        // Phase 2: group by capped distinct-container working sets and
        // replay each group in order.
        let mut pending: Vec<(Fingerprint, ContainerId)> = Vec::new();
        let mut working_set: Vec<ContainerId> = Vec::new();
        for (fingerprint, container) in resolved {
            if !working_set.contains(&container) {
                if working_set.len() == self.capping {
                    self.replay_group(&mut pending, &mut working_set, sink)?;
                }
                working_set.push(container);
            }
            pending.push((fingerprint, container));
        }
        self.replay_group(&mut pending, &mut working_set, sink)?;

        // Phase 3: tail flush plus the per-request end marker.
        sink.finish()
    }

    /// Fetch the working set, build the transient offset index, emit the
    /// buffered entries, and reset both collections.
    fn replay_group(
        &mut self,
        pending: &mut Vec<(Fingerprint, ContainerId)>,
        working_set: &mut Vec<ContainerId>,
        sink: &mut ChunkSink<'_>,
    ) -> Result<()> {
        if pending.is_empty() {
            working_set.clear();
            return Ok(());
        }

        let mut buffers = Vec::with_capacity(working_set.len());
        for id in working_set.iter() {
            buffers.push(self.fetch_container(id)?);
        }

        // fingerprint -> (buffer slot, absolute offset, length)
        let mut offsets: HashMap<Fingerprint, (usize, usize, usize)> = HashMap::new();
        for (slot, (id, bytes)) in working_set.iter().zip(&buffers).enumerate() {
            let view = ContainerView::parse(id, bytes.as_slice())?;
            for entry in view.entries() {
                offsets.insert(
                    entry.fingerprint,
                    (slot, view.absolute_offset(&entry), entry.length as usize),
                );
            }
        }

        for (fingerprint, container) in pending.drain(..) {
            let (slot, offset, length) =
                *offsets
                    .get(&fingerprint)
                    .ok_or(StrataError::ChunkNotInContainer {
                        fingerprint,
                        container,
                    })?;
            sink.push_chunk(&buffers[slot][offset..offset + length])?;
        }

        debug!(
            containers = working_set.len(),
            "restore working set replayed"
        );
        working_set.clear();
        Ok(())
    }

    fn fetch_container(&mut self, id: &ContainerId) -> Result<Arc<Vec<u8>>> {
        if let Some(bytes) = self.cache.get(id) {
            return Ok(bytes);
        }
        let bytes = Arc::new(self.store.read(id)?);
        self.cache.insert(*id, bytes.clone());
        Ok(bytes)
    }
}

/// Split a restored-chunk batch payload back into chunk payloads. Shared
/// by tests and any in-process consumer of the restore stream.
pub fn split_chunk_batch(payload: &[u8], item_count: u32) -> Result<Vec<Vec<u8>>> {
    let mut chunks = Vec::with_capacity(item_count as usize);
    let mut cursor = 0usize;
    for i in 0..item_count {
        if cursor + CHUNK_LENGTH_PREFIX_SIZE > payload.len() {
            return Err(StrataError::Protocol(format!(
                "restored chunk {i} of {item_count}: length prefix past the batch"
            )));
        }
        let len = u32::from_le_bytes(
            payload[cursor..cursor + CHUNK_LENGTH_PREFIX_SIZE]
                .try_into()
                .expect("4-byte slice"),
        ) as usize;
        cursor += CHUNK_LENGTH_PREFIX_SIZE;
        if cursor + len > payload.len() {
            return Err(StrataError::Protocol(format!(
                "restored chunk {i} of {item_count} overruns the batch"
            )));
        }
        chunks.push(payload[cursor..cursor + len].to_vec());
        cursor += len;
    }
    Ok(chunks)
}
