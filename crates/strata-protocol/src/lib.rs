//! Wire-format types and framing for edge ↔ server communication.
//!
//! This crate is intentionally minimal: message tags, the fixed-size message
//! header codec, the login/recipe-head payload layouts, and the [`Channel`]
//! transport seam with a length-delimited stream implementation. No storage
//! I/O, no crypto.

use std::io::{self, Read, Write};

use thiserror::Error;

// ── Wire constants ─────────────────────────────────────────────────────────

/// Byte length of the fixed header preceding every message payload.
pub const MESSAGE_HEADER_SIZE: usize = 16;

/// Byte length of the file name carried by login and new-file payloads
/// (a 64-character hex digest string).
pub const FILE_NAME_SIZE: usize = 64;

/// Byte length of the recipe head (file size + total chunk count).
pub const RECIPE_HEAD_SIZE: usize = 16;

/// Byte length of one recipe entry (plain, secure and key alike).
pub const RECIPE_ENTRY_SIZE: usize = 32;

/// Byte length of the per-chunk length prefix inside chunk batches.
pub const CHUNK_LENGTH_PREFIX_SIZE: usize = 4;

/// Default upper bound on a single frame accepted from the wire. Large
/// enough for a full chunk batch at the default batch size with room to
/// spare; a deployment with bigger batches raises it via
/// [`StreamChannel::with_frame_limit`].
pub const DEFAULT_MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

// ── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown message tag {0}")]
    UnknownTag(u32),

    #[error("message shorter than its {MESSAGE_HEADER_SIZE}-byte header ({0} bytes)")]
    TruncatedHeader(usize),

    #[error("declared payload length {declared} does not match frame payload {actual}")]
    LengthMismatch { declared: u32, actual: usize },

    #[error("frame of {0} bytes exceeds the u32 length field")]
    FrameTooLarge(usize),

    #[error("malformed login payload: {0}")]
    MalformedLogin(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

// ── Message tags ───────────────────────────────────────────────────────────

/// Every message on a connection starts with one of these tags. Values are
/// part of the wire contract and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageKind {
    // client → server
    UploadLogin = 1,
    DownloadRecipeLogin = 2,
    DownloadChunkLogin = 3,
    ChunkBatch = 4,
    ChunkBatchEnd = 5,
    SecureRecipeBatch = 6,
    SecureRecipeEnd = 7,
    PlainRecipeBatch = 8,
    PlainRecipeEnd = 9,
    KeyRecipeBatch = 10,
    KeyRecipeEnd = 11,
    RecipeEnd = 12,
    NewFile = 13,
    ClientReady = 14,
    ChunkRequest = 15,

    // server → client
    LoginResponse = 100,
    FileNotFound = 101,
    QueryResult = 102,
    PlainRecipeStream = 103,
    SecureRecipeStream = 104,
    KeyRecipeStream = 105,
    RecipeStreamEnd = 106,
    RestoredChunkBatch = 107,
    RestoredChunkEnd = 108,
}

impl MessageKind {
    pub fn from_u32(tag: u32) -> Result<Self, ProtocolError> {
        use MessageKind::*;
        Ok(match tag {
            1 => UploadLogin,
            2 => DownloadRecipeLogin,
            3 => DownloadChunkLogin,
            4 => ChunkBatch,
            5 => ChunkBatchEnd,
            6 => SecureRecipeBatch,
            7 => SecureRecipeEnd,
            8 => PlainRecipeBatch,
            9 => PlainRecipeEnd,
            10 => KeyRecipeBatch,
            11 => KeyRecipeEnd,
            12 => RecipeEnd,
            13 => NewFile,
            14 => ClientReady,
            15 => ChunkRequest,
            100 => LoginResponse,
            101 => FileNotFound,
            102 => QueryResult,
            103 => PlainRecipeStream,
            104 => SecureRecipeStream,
            105 => KeyRecipeStream,
            106 => RecipeStreamEnd,
            107 => RestoredChunkBatch,
            108 => RestoredChunkEnd,
            other => return Err(ProtocolError::UnknownTag(other)),
        })
    }
}

// ── Message header ─────────────────────────────────────────────────────────

/// The 16-byte header preceding every payload: four `u32` little-endian
/// fields (tag, client id, payload byte length, item count).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub kind: MessageKind,
    pub client_id: u32,
    pub payload_len: u32,
    pub item_count: u32,
}

impl MessageHeader {
    /// A header with no payload. `payload_len` is filled in by
    /// [`write_message`].
    pub fn new(kind: MessageKind, client_id: u32) -> Self {
        MessageHeader {
            kind,
            client_id,
            payload_len: 0,
            item_count: 0,
        }
    }

    pub fn with_items(kind: MessageKind, client_id: u32, item_count: u32) -> Self {
        MessageHeader {
            kind,
            client_id,
            payload_len: 0,
            item_count,
        }
    }

    pub fn encode(&self) -> [u8; MESSAGE_HEADER_SIZE] {
        let mut out = [0u8; MESSAGE_HEADER_SIZE];
        out[0..4].copy_from_slice(&(self.kind as u32).to_le_bytes());
        out[4..8].copy_from_slice(&self.client_id.to_le_bytes());
        out[8..12].copy_from_slice(&self.payload_len.to_le_bytes());
        out[12..16].copy_from_slice(&self.item_count.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < MESSAGE_HEADER_SIZE {
            return Err(ProtocolError::TruncatedHeader(bytes.len()));
        }
        let field = |i: usize| {
            let arr: [u8; 4] = bytes[i * 4..i * 4 + 4].try_into().expect("4-byte slice");
            u32::from_le_bytes(arr)
        };
        Ok(MessageHeader {
            kind: MessageKind::from_u32(field(0))?,
            client_id: field(1),
            payload_len: field(2),
            item_count: field(3),
        })
    }
}

// ── Recipe head and login payloads ─────────────────────────────────────────

/// File size and chunk count announced ahead of a file's recipe entries.
/// Written at offset 0 of every recipe file as two `u64` little-endian
/// values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecipeHead {
    pub file_size: u64,
    pub total_chunk_num: u64,
}

impl RecipeHead {
    pub fn encode(&self) -> [u8; RECIPE_HEAD_SIZE] {
        let mut out = [0u8; RECIPE_HEAD_SIZE];
        out[0..8].copy_from_slice(&self.file_size.to_le_bytes());
        out[8..16].copy_from_slice(&self.total_chunk_num.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < RECIPE_HEAD_SIZE {
            return Err(ProtocolError::MalformedLogin(format!(
                "recipe head needs {RECIPE_HEAD_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let file_size = u64::from_le_bytes(bytes[0..8].try_into().expect("8-byte slice"));
        let total_chunk_num = u64::from_le_bytes(bytes[8..16].try_into().expect("8-byte slice"));
        Ok(RecipeHead {
            file_size,
            total_chunk_num,
        })
    }
}

/// True if `name` is a valid recipe file name: exactly 64 ASCII hex digits.
/// Anything else is rejected before it can reach a filesystem path.
pub fn is_valid_file_name(name: &str) -> bool {
    name.len() == FILE_NAME_SIZE && name.chars().all(|c| c.is_ascii_hexdigit())
}

/// Decode the 64-byte file name at the start of a login / new-file payload.
pub fn decode_file_name(payload: &[u8]) -> Result<String, ProtocolError> {
    if payload.len() < FILE_NAME_SIZE {
        return Err(ProtocolError::MalformedLogin(format!(
            "file name needs {FILE_NAME_SIZE} bytes, got {}",
            payload.len()
        )));
    }
    let name = std::str::from_utf8(&payload[..FILE_NAME_SIZE])
        .map_err(|_| ProtocolError::MalformedLogin("file name is not UTF-8".into()))?;
    if !is_valid_file_name(name) {
        return Err(ProtocolError::MalformedLogin(
            "file name is not a 64-digit hex string".into(),
        ));
    }
    Ok(name.to_string())
}

/// Decode an upload-login or new-file payload: 64-byte file name followed
/// by the announced recipe head.
pub fn decode_file_announcement(payload: &[u8]) -> Result<(String, RecipeHead), ProtocolError> {
    let name = decode_file_name(payload)?;
    let head = RecipeHead::decode(&payload[FILE_NAME_SIZE..])?;
    Ok((name, head))
}

// ── Transport ──────────────────────────────────────────────────────────────

/// One message-oriented connection to a peer.
///
/// `send` transmits one whole frame; `receive` blocks for the next whole
/// frame, returning `Ok(None)` on orderly peer close. TLS (or any other
/// secure transport) plugs in behind this trait; tests and in-process
/// wiring use [`memory_channel`].
pub trait Channel: Send {
    fn send(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Receive the next frame into `buf` (overwriting it) and return its
    /// length, or `None` once the peer has closed the connection.
    fn receive(&mut self, buf: &mut Vec<u8>) -> io::Result<Option<usize>>;
}

/// Length-delimited framing over any byte stream: each frame is preceded by
/// a `u32` little-endian byte count.
pub struct StreamChannel<S> {
    stream: S,
    max_frame: usize,
}

impl<S: Read + Write + Send> StreamChannel<S> {
    pub fn new(stream: S) -> Self {
        Self::with_frame_limit(stream, DEFAULT_MAX_FRAME_SIZE)
    }

    pub fn with_frame_limit(stream: S, max_frame: usize) -> Self {
        StreamChannel { stream, max_frame }
    }
}

impl<S: Read + Write + Send> Channel for StreamChannel<S> {
    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        if frame.len() > self.max_frame {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("outgoing frame of {} bytes exceeds limit", frame.len()),
            ));
        }
        let len = frame.len() as u32;
        self.stream.write_all(&len.to_le_bytes())?;
        self.stream.write_all(frame)?;
        self.stream.flush()
    }

    fn receive(&mut self, buf: &mut Vec<u8>) -> io::Result<Option<usize>> {
        let mut len_buf = [0u8; 4];
        let mut filled = 0;
        while filled < len_buf.len() {
            match self.stream.read(&mut len_buf[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed inside a frame length prefix",
                    ))
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > self.max_frame {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("incoming frame of {len} bytes exceeds limit of {}", self.max_frame),
            ));
        }
        buf.resize(len, 0);
        self.stream.read_exact(&mut buf[..len])?;
        Ok(Some(len))
    }
}

/// In-memory connected channel pair. Frames sent on one end arrive on the
/// other; dropping an end reads as orderly close on its peer.
pub struct MemoryChannel {
    tx: crossbeam_channel::Sender<Vec<u8>>,
    rx: crossbeam_channel::Receiver<Vec<u8>>,
}

pub fn memory_channel() -> (MemoryChannel, MemoryChannel) {
    let (a_tx, a_rx) = crossbeam_channel::unbounded();
    let (b_tx, b_rx) = crossbeam_channel::unbounded();
    (
        MemoryChannel { tx: a_tx, rx: b_rx },
        MemoryChannel { tx: b_tx, rx: a_rx },
    )
}

impl Channel for MemoryChannel {
    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        self.tx
            .send(frame.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer closed"))
    }

    fn receive(&mut self, buf: &mut Vec<u8>) -> io::Result<Option<usize>> {
        match self.rx.recv() {
            Ok(frame) => {
                buf.clear();
                buf.extend_from_slice(&frame);
                Ok(Some(frame.len()))
            }
            Err(_) => Ok(None),
        }
    }
}

// ── Message-level send/receive ─────────────────────────────────────────────

/// Send one `[header][payload]` message as a single frame. The header's
/// `payload_len` is overwritten with the actual payload length.
pub fn write_message(
    channel: &mut dyn Channel,
    mut header: MessageHeader,
    payload: &[u8],
) -> Result<(), ProtocolError> {
    if payload.len() > u32::MAX as usize {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }
    header.payload_len = payload.len() as u32;
    let mut frame = Vec::with_capacity(MESSAGE_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&header.encode());
    frame.extend_from_slice(payload);
    channel.send(&frame)?;
    Ok(())
}

/// Read one message; `Ok(None)` means the peer closed the connection. On
/// success the payload occupies `buf[MESSAGE_HEADER_SIZE..][..payload_len]`.
pub fn read_message(
    channel: &mut dyn Channel,
    buf: &mut Vec<u8>,
) -> Result<Option<MessageHeader>, ProtocolError> {
    let frame_len = match channel.receive(buf)? {
        Some(n) => n,
        None => return Ok(None),
    };
    if frame_len < MESSAGE_HEADER_SIZE {
        return Err(ProtocolError::TruncatedHeader(frame_len));
    }
    let header = MessageHeader::decode(&buf[..MESSAGE_HEADER_SIZE])?;
    let actual = frame_len - MESSAGE_HEADER_SIZE;
    if header.payload_len as usize != actual {
        return Err(ProtocolError::LengthMismatch {
            declared: header.payload_len,
            actual,
        });
    }
    Ok(Some(header))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pipe {
        r: io::Cursor<Vec<u8>>,
        w: Vec<u8>,
    }

    impl Read for Pipe {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.r.read(buf)
        }
    }

    impl Write for Pipe {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.w.write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn pipe_from(bytes: Vec<u8>) -> Pipe {
        Pipe {
            r: io::Cursor::new(bytes),
            w: Vec::new(),
        }
    }

    // ── Header codec ───────────────────────────────────────────────────

    #[test]
    fn header_round_trip() {
        let header = MessageHeader {
            kind: MessageKind::ChunkBatch,
            client_id: 7,
            payload_len: 1024,
            item_count: 13,
        };
        let decoded = MessageHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn header_golden_bytes() {
        let header = MessageHeader {
            kind: MessageKind::UploadLogin,
            client_id: 2,
            payload_len: 80,
            item_count: 0,
        };
        let expected: [u8; 16] = [
            1, 0, 0, 0, // tag
            2, 0, 0, 0, // client id
            80, 0, 0, 0, // payload length
            0, 0, 0, 0, // item count
        ];
        assert_eq!(header.encode(), expected);
    }

    #[test]
    fn header_decode_rejects_unknown_tag() {
        let mut bytes = MessageHeader::new(MessageKind::ClientReady, 0).encode();
        bytes[0..4].copy_from_slice(&999u32.to_le_bytes());
        match MessageHeader::decode(&bytes) {
            Err(ProtocolError::UnknownTag(999)) => {}
            other => panic!("expected UnknownTag, got {other:?}"),
        }
    }

    #[test]
    fn header_decode_rejects_short_input() {
        match MessageHeader::decode(&[0u8; 15]) {
            Err(ProtocolError::TruncatedHeader(15)) => {}
            other => panic!("expected TruncatedHeader, got {other:?}"),
        }
    }

    #[test]
    fn all_tags_round_trip() {
        for tag in (1..=15).chain(100..=108) {
            let kind = MessageKind::from_u32(tag).unwrap();
            assert_eq!(kind as u32, tag);
        }
    }

    // ── Recipe head and login payloads ─────────────────────────────────

    #[test]
    fn recipe_head_round_trip() {
        let head = RecipeHead {
            file_size: 123_456_789,
            total_chunk_num: 42,
        };
        assert_eq!(RecipeHead::decode(&head.encode()).unwrap(), head);
    }

    #[test]
    fn recipe_head_rejects_short_input() {
        assert!(RecipeHead::decode(&[0u8; 15]).is_err());
    }

    #[test]
    fn file_announcement_round_trip() {
        let name = "ab".repeat(32);
        let head = RecipeHead {
            file_size: 1000,
            total_chunk_num: 3,
        };
        let mut payload = name.clone().into_bytes();
        payload.extend_from_slice(&head.encode());
        let (got_name, got_head) = decode_file_announcement(&payload).unwrap();
        assert_eq!(got_name, name);
        assert_eq!(got_head, head);
    }

    #[test]
    fn file_name_rejects_non_hex() {
        let mut payload = vec![b'z'; FILE_NAME_SIZE];
        assert!(decode_file_name(&payload).is_err());
        payload = vec![b'a'; FILE_NAME_SIZE - 1];
        assert!(decode_file_name(&payload).is_err());
    }

    #[test]
    fn file_name_rejects_path_characters() {
        let mut name = vec![b'a'; FILE_NAME_SIZE];
        name[0] = b'/';
        assert!(decode_file_name(&name).is_err());
        name[0] = b'.';
        assert!(decode_file_name(&name).is_err());
    }

    // ── Stream framing ─────────────────────────────────────────────────

    #[test]
    fn stream_channel_frame_round_trip() {
        let mut writer = StreamChannel::new(pipe_from(Vec::new()));
        writer.send(b"hello").unwrap();
        writer.send(b"").unwrap();

        let mut reader = StreamChannel::new(pipe_from(writer.stream.w));
        let mut buf = Vec::new();
        assert_eq!(reader.receive(&mut buf).unwrap(), Some(5));
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(reader.receive(&mut buf).unwrap(), Some(0));
        assert_eq!(reader.receive(&mut buf).unwrap(), None);
    }

    #[test]
    fn stream_channel_rejects_oversized_frame() {
        let mut writer = StreamChannel::new(pipe_from(Vec::new()));
        writer.send(&vec![0u8; 100]).unwrap();

        let mut reader = StreamChannel::with_frame_limit(pipe_from(writer.stream.w), 50);
        let mut buf = Vec::new();
        let err = reader.receive(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn stream_channel_truncated_prefix_is_error() {
        let mut reader = StreamChannel::new(pipe_from(vec![5, 0]));
        let mut buf = Vec::new();
        let err = reader.receive(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    // ── Memory channel ─────────────────────────────────────────────────

    #[test]
    fn memory_channel_round_trip() {
        let (mut a, mut b) = memory_channel();
        a.send(b"ping").unwrap();
        let mut buf = Vec::new();
        assert_eq!(b.receive(&mut buf).unwrap(), Some(4));
        assert_eq!(&buf, b"ping");
    }

    #[test]
    fn memory_channel_close_on_drop() {
        let (a, mut b) = memory_channel();
        drop(a);
        let mut buf = Vec::new();
        assert_eq!(b.receive(&mut buf).unwrap(), None);
        assert!(b.send(b"x").is_err());
    }

    // ── Message-level send/receive ─────────────────────────────────────

    #[test]
    fn message_round_trip() {
        let (mut a, mut b) = memory_channel();
        let header = MessageHeader::with_items(MessageKind::ChunkBatch, 9, 2);
        write_message(&mut a, header, b"payload").unwrap();

        let mut buf = Vec::new();
        let got = read_message(&mut b, &mut buf).unwrap().unwrap();
        assert_eq!(got.kind, MessageKind::ChunkBatch);
        assert_eq!(got.client_id, 9);
        assert_eq!(got.item_count, 2);
        assert_eq!(got.payload_len, 7);
        assert_eq!(&buf[MESSAGE_HEADER_SIZE..], b"payload");
    }

    #[test]
    fn message_length_mismatch_rejected() {
        let (mut a, mut b) = memory_channel();
        let mut frame = MessageHeader::new(MessageKind::ClientReady, 0).encode().to_vec();
        frame[8] = 99; // declared payload length with an empty payload
        a.send(&frame).unwrap();

        let mut buf = Vec::new();
        match read_message(&mut b, &mut buf) {
            Err(ProtocolError::LengthMismatch { declared: 99, actual: 0 }) => {}
            other => panic!("expected LengthMismatch, got {other:?}"),
        }
    }

    #[test]
    fn message_short_frame_rejected() {
        let (mut a, mut b) = memory_channel();
        a.send(&[1, 2, 3]).unwrap();
        let mut buf = Vec::new();
        match read_message(&mut b, &mut buf) {
            Err(ProtocolError::TruncatedHeader(3)) => {}
            other => panic!("expected TruncatedHeader, got {other:?}"),
        }
    }

    #[test]
    fn message_close_reads_as_none() {
        let (a, mut b) = memory_channel();
        drop(a);
        let mut buf = Vec::new();
        assert!(read_message(&mut b, &mut buf).unwrap().is_none());
    }
}
