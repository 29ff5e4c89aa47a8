use crossbeam_channel::Sender;
use tracing::{debug, warn};

use crate::container::{ContainerBuilder, SealedContainer};
use crate::error::{Result, StrataError};
use crate::index::FingerprintIndex;
use strata_protocol::CHUNK_LENGTH_PREFIX_SIZE;
use strata_types::{Fingerprint, FINGERPRINT_SIZE};

/// Existence-query status bytes.
pub const QUERY_PRESENT: u8 = 0;
pub const QUERY_ABSENT: u8 = 1;

/// Per-batch tally returned to the session for its summary counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchOutcome {
    pub unique: usize,
    pub duplicate: usize,
}

/// Decode one chunk batch and run the unique/duplicate decision per chunk.
///
/// The wire layout is `declared_count` repetitions of
/// `[length: u32 LE][payload]`. Every prefix is bounds-checked against the
/// buffer and the configured maximum chunk size before anything is copied;
/// a malformed batch is a protocol violation and poisons nothing.
///
/// For each chunk the index write lock is held across the
/// lookup-append-insert sequence, so concurrent sessions can never both
/// treat one fingerprint as new. Sealed containers are handed to the write
/// queue inside that section; a full queue blocks here, which is the
/// backpressure path onto the network.
pub fn process_chunk_batch(
    index: &FingerprintIndex,
    builder: &mut ContainerBuilder,
    queue: &Sender<SealedContainer>,
    payload: &[u8],
    declared_count: u32,
    max_chunk_size: usize,
) -> Result<BatchOutcome> {
    let mut outcome = BatchOutcome::default();
    let mut cursor = 0usize;

    for i in 0..declared_count {
        if cursor + CHUNK_LENGTH_PREFIX_SIZE > payload.len() {
            return Err(StrataError::Protocol(format!(
                "chunk {i} of {declared_count}: length prefix past the {}-byte batch",
                payload.len()
            )));
        }
        let len = u32::from_le_bytes(
            payload[cursor..cursor + CHUNK_LENGTH_PREFIX_SIZE]
                .try_into()
                .expect("4-byte slice"),
        ) as usize;
        cursor += CHUNK_LENGTH_PREFIX_SIZE;
        if len == 0 {
            return Err(StrataError::Protocol(format!(
                "chunk {i} of {declared_count} has zero length"
            )));
        }
        if len > max_chunk_size {
            return Err(StrataError::Protocol(format!(
                "chunk {i} of {declared_count} is {len} bytes, over the {max_chunk_size}-byte limit"
            )));
        }
        if cursor + len > payload.len() {
            return Err(StrataError::Protocol(format!(
                "chunk {i} of {declared_count} overruns the {}-byte batch",
                payload.len()
            )));
        }
        let chunk = &payload[cursor..cursor + len];
        cursor += len;

        let fingerprint = Fingerprint::compute(chunk);
        let mut guard = index.begin_write();
        let existing = match guard.lookup(&fingerprint) {
            Ok(found) => found,
            Err(e) => {
                warn!(
                    fingerprint = %fingerprint,
                    error = %e,
                    "index lookup failed, treating chunk as new"
                );
                None
            }
        };
        match existing {
            Some(_) => outcome.duplicate += 1,
            None => {
                let (sealed, container) = builder.append(fingerprint, chunk);
                if let Some(sealed) = sealed {
                    queue.send(sealed).map_err(|_| StrataError::WriterStopped)?;
                }
                if let Err(e) = guard.insert(&fingerprint, container) {
                    warn!(
                        fingerprint = %fingerprint,
                        error = %e,
                        "index insert failed, chunk stored but not indexed"
                    );
                }
                guard.add_unique(chunk.len() as u64);
                outcome.unique += 1;
            }
        }
    }

    if cursor != payload.len() {
        return Err(StrataError::Protocol(format!(
            "chunk batch has {} bytes past its {declared_count} declared chunks",
            payload.len() - cursor
        )));
    }

    debug!(
        unique = outcome.unique,
        duplicate = outcome.duplicate,
        "chunk batch processed"
    );
    Ok(outcome)
}

/// Answer an existence query: one status byte per fingerprint, in request
/// order, without mutating the index. An index-store failure counts as
/// absent, which only costs the client a redundant upload.
pub fn process_existence_batch(
    index: &FingerprintIndex,
    payload: &[u8],
    declared_count: u32,
) -> Result<Vec<u8>> {
    let expected = declared_count as usize * FINGERPRINT_SIZE;
    if payload.len() != expected {
        return Err(StrataError::Protocol(format!(
            "existence batch of {} bytes does not hold {declared_count} fingerprints",
            payload.len()
        )));
    }

    let mut flags = Vec::with_capacity(declared_count as usize);
    for raw in payload.chunks_exact(FINGERPRINT_SIZE) {
        let fingerprint = Fingerprint::from_bytes(raw).expect("exact fingerprint width");
        let flag = match index.lookup(&fingerprint) {
            Ok(Some(_)) => QUERY_PRESENT,
            Ok(None) => QUERY_ABSENT,
            Err(e) => {
                warn!(
                    fingerprint = %fingerprint,
                    error = %e,
                    "index lookup failed, reporting fingerprint absent"
                );
                QUERY_ABSENT
            }
        };
        flags.push(flag);
    }
    Ok(flags)
}
