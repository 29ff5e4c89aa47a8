use crate::error::{Result, StrataError};
use strata_types::{ContainerId, Fingerprint, FINGERPRINT_SIZE};

/// Leading chunk-count word, big-endian.
pub const CONTAINER_COUNT_SIZE: usize = 4;
/// One header entry: fingerprint + body offset + payload length.
pub const CONTAINER_ENTRY_SIZE: usize = FINGERPRINT_SIZE + 8;

/// A finished container ready for the write queue: identifier plus the
/// exact byte layout that lands on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedContainer {
    pub id: ContainerId,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
struct HeaderEntry {
    fingerprint: Fingerprint,
    offset: u32,
    length: u32,
}

/// Packs chunk payloads into capacity-bounded containers.
///
/// Header entries and body bytes accumulate separately and are only laid
/// out in wire order at seal time:
///
/// ```text
/// [count: u32 BE]
/// [count x (fingerprint[32], body offset: u32 BE, length: u32 BE)]
/// [body: concatenated payloads]
/// ```
///
/// Offsets are body-relative; a payload's absolute position in the file is
/// `4 + count*40 + offset`.
pub struct ContainerBuilder {
    max_size: usize,
    id: ContainerId,
    entries: Vec<HeaderEntry>,
    body: Vec<u8>,
}

impl ContainerBuilder {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            id: ContainerId::generate(),
            entries: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Identifier the next appended chunk will be assigned to.
    pub fn current_id(&self) -> ContainerId {
        self.id
    }

    pub fn chunk_count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when appending `payload_len` more bytes would push the sealed
    /// layout to `max_size` or beyond.
    pub fn would_overflow(&self, payload_len: usize) -> bool {
        payload_len
            + CONTAINER_ENTRY_SIZE
            + self.body.len()
            + self.entries.len() * CONTAINER_ENTRY_SIZE
            + CONTAINER_COUNT_SIZE
            >= self.max_size
    }

    /// Append one chunk, sealing the current container first if it lacks
    /// capacity. Returns the sealed container (if any) and the identifier
    /// of the container the chunk landed in.
    pub fn append(
        &mut self,
        fingerprint: Fingerprint,
        payload: &[u8],
    ) -> (Option<SealedContainer>, ContainerId) {
        let sealed = if self.would_overflow(payload.len()) {
            self.seal()
        } else {
            None
        };
        let offset = self.body.len() as u32;
        self.entries.push(HeaderEntry {
            fingerprint,
            offset,
            length: payload.len() as u32,
        });
        self.body.extend_from_slice(payload);
        (sealed, self.id)
    }

    /// Seal the current container and start a fresh one under a new random
    /// identifier. Sealing with zero chunks is a no-op.
    pub fn seal(&mut self) -> Option<SealedContainer> {
        if self.entries.is_empty() {
            return None;
        }
        let mut bytes = Vec::with_capacity(
            CONTAINER_COUNT_SIZE + self.entries.len() * CONTAINER_ENTRY_SIZE + self.body.len(),
        );
        bytes.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());
        for entry in &self.entries {
            bytes.extend_from_slice(entry.fingerprint.as_bytes());
            bytes.extend_from_slice(&entry.offset.to_be_bytes());
            bytes.extend_from_slice(&entry.length.to_be_bytes());
        }
        bytes.extend_from_slice(&self.body);

        let sealed = SealedContainer { id: self.id, bytes };
        self.entries.clear();
        self.body.clear();
        self.id = ContainerId::generate();
        Some(sealed)
    }
}

/// One decoded header entry of a stored container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerEntry {
    pub fingerprint: Fingerprint,
    /// Body-relative payload offset.
    pub offset: u32,
    pub length: u32,
}

/// Validated zero-copy view over a container's byte layout. Parsing checks
/// the header region and every entry's payload range up front, so accessors
/// never go out of bounds.
pub struct ContainerView<'a> {
    bytes: &'a [u8],
    count: usize,
    body_start: usize,
}

impl<'a> ContainerView<'a> {
    pub fn parse(id: &ContainerId, bytes: &'a [u8]) -> Result<Self> {
        let corrupt = |reason: String| StrataError::CorruptContainer { id: *id, reason };

        if bytes.len() < CONTAINER_COUNT_SIZE {
            return Err(corrupt(format!(
                "{} bytes is shorter than the count word",
                bytes.len()
            )));
        }
        let count =
            u32::from_be_bytes(bytes[..4].try_into().expect("4-byte slice")) as usize;
        let header_len = count
            .checked_mul(CONTAINER_ENTRY_SIZE)
            .and_then(|n| n.checked_add(CONTAINER_COUNT_SIZE))
            .ok_or_else(|| corrupt(format!("chunk count {count} overflows the header")))?;
        if header_len > bytes.len() {
            return Err(corrupt(format!(
                "{count} header entries overrun the {}-byte file",
                bytes.len()
            )));
        }

        let view = Self {
            bytes,
            count,
            body_start: header_len,
        };
        let body_len = bytes.len() - header_len;
        for i in 0..count {
            let entry = view.entry(i);
            let end = entry.offset as usize + entry.length as usize;
            if end > body_len {
                return Err(corrupt(format!(
                    "entry {i} ({}) spans {}..{end} past the {body_len}-byte body",
                    entry.fingerprint, entry.offset
                )));
            }
        }
        Ok(view)
    }

    pub fn chunk_count(&self) -> usize {
        self.count
    }

    fn entry(&self, i: usize) -> ContainerEntry {
        let at = CONTAINER_COUNT_SIZE + i * CONTAINER_ENTRY_SIZE;
        let fingerprint = Fingerprint::from_bytes(&self.bytes[at..at + FINGERPRINT_SIZE])
            .expect("fingerprint width checked at parse");
        let offset = u32::from_be_bytes(
            self.bytes[at + FINGERPRINT_SIZE..at + FINGERPRINT_SIZE + 4]
                .try_into()
                .expect("4-byte slice"),
        );
        let length = u32::from_be_bytes(
            self.bytes[at + FINGERPRINT_SIZE + 4..at + CONTAINER_ENTRY_SIZE]
                .try_into()
                .expect("4-byte slice"),
        );
        ContainerEntry {
            fingerprint,
            offset,
            length,
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = ContainerEntry> + '_ {
        (0..self.count).map(|i| self.entry(i))
    }

    /// Absolute position of an entry's payload within the container bytes.
    pub fn absolute_offset(&self, entry: &ContainerEntry) -> usize {
        self.body_start + entry.offset as usize
    }

    pub fn payload(&self, entry: &ContainerEntry) -> &'a [u8] {
        let start = self.absolute_offset(entry);
        &self.bytes[start..start + entry.length as usize]
    }
}
