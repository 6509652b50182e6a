//! Wire records exchanged with the gaze server.
//!
//! Every record is a fixed-size little-endian frame: an 8-byte header
//! (`kind: u32`, `payload_len: u32`) followed by exactly `payload_len` bytes.
//! Each request type names the single response type it expects, so a decoded
//! response is always checked against the request that produced it.

use crate::gaze::{Eye, GazeDirection, GazeSample};

/// Version tag sent in the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// Size of the frame header.
pub const HEADER_LEN: usize = 8;

/// Request kinds.
pub mod request_kind {
    pub const HANDSHAKE: u32 = 1;
    pub const GET_GAZES: u32 = 2;
}

/// Response kinds.
pub mod response_kind {
    pub const ERROR: u32 = 0;
    pub const HANDSHAKE_OK: u32 = 1;
    pub const GET_GAZES_OK: u32 = 2;
}

/// Errors decoding a completely read response frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame is {actual} bytes, expected {expected}")]
    FrameSize { expected: usize, actual: usize },

    #[error("response kind {actual}, expected {expected}")]
    KindMismatch { expected: u32, actual: u32 },

    #[error("header announces {actual} payload bytes, expected {expected}")]
    PayloadLength { expected: usize, actual: usize },
}

/// Frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub kind: u32,
    pub payload_len: u32,
}

impl Header {
    pub fn new(kind: u32, payload_len: usize) -> Self {
        Self {
            kind,
            payload_len: payload_len as u32,
        }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.kind.to_le_bytes());
        buf.extend_from_slice(&self.payload_len.to_le_bytes());
    }

    /// Decode from the first [`HEADER_LEN`] bytes of `frame`.
    pub fn decode(frame: &[u8]) -> Option<Self> {
        if frame.len() < HEADER_LEN {
            return None;
        }
        Some(Self {
            kind: read_u32(frame, 0),
            payload_len: read_u32(frame, 4),
        })
    }
}

/// A request record.
pub trait Request {
    const KIND: u32;
    const PAYLOAD_LEN: usize;
    const SIZE: usize = HEADER_LEN + Self::PAYLOAD_LEN;

    /// The only response kind a server may answer this request with.
    type Response: Response;

    fn encode_payload(&self, buf: &mut Vec<u8>);

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        Header::new(Self::KIND, Self::PAYLOAD_LEN).encode(&mut buf);
        self.encode_payload(&mut buf);
        buf
    }
}

/// A response record.
pub trait Response: Sized {
    const KIND: u32;
    const PAYLOAD_LEN: usize;
    const SIZE: usize = HEADER_LEN + Self::PAYLOAD_LEN;

    /// Decode a payload of exactly `PAYLOAD_LEN` bytes.
    fn decode_payload(payload: &[u8]) -> Self;

    fn encode_payload(&self, buf: &mut Vec<u8>);

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        Header::new(Self::KIND, Self::PAYLOAD_LEN).encode(&mut buf);
        self.encode_payload(&mut buf);
        buf
    }
}

/// Accept `frame` as an `R` only if its size, kind and payload length match.
pub fn decode_response<R: Response>(frame: &[u8]) -> Result<R, ProtocolError> {
    if frame.len() != R::SIZE {
        return Err(ProtocolError::FrameSize {
            expected: R::SIZE,
            actual: frame.len(),
        });
    }
    let header = Header::decode(frame).ok_or(ProtocolError::FrameSize {
        expected: R::SIZE,
        actual: frame.len(),
    })?;
    if header.kind != R::KIND {
        return Err(ProtocolError::KindMismatch {
            expected: R::KIND,
            actual: header.kind,
        });
    }
    if header.payload_len as usize != R::PAYLOAD_LEN {
        return Err(ProtocolError::PayloadLength {
            expected: R::PAYLOAD_LEN,
            actual: header.payload_len as usize,
        });
    }
    Ok(R::decode_payload(&frame[HEADER_LEN..]))
}

/// An `ERROR` frame padded to `size` bytes, as a server sends it in place of
/// the expected response.
pub fn error_frame(size: usize) -> Vec<u8> {
    let payload_len = size.saturating_sub(HEADER_LEN);
    let mut buf = Vec::with_capacity(size.max(HEADER_LEN));
    Header::new(response_kind::ERROR, payload_len).encode(&mut buf);
    buf.resize(HEADER_LEN + payload_len, 0);
    buf
}

// ── Handshake ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub protocol_version: u32,
    pub process_id: u32,
}

impl HandshakeRequest {
    /// Handshake for this process at the given protocol version.
    pub fn current(protocol_version: u32) -> Self {
        Self {
            protocol_version,
            process_id: std::process::id(),
        }
    }

    pub fn decode(frame: &[u8]) -> Option<Self> {
        let header = Header::decode(frame)?;
        if frame.len() != Self::SIZE
            || header.kind != Self::KIND
            || header.payload_len as usize != Self::PAYLOAD_LEN
        {
            return None;
        }
        Some(Self {
            protocol_version: read_u32(frame, HEADER_LEN),
            process_id: read_u32(frame, HEADER_LEN + 4),
        })
    }
}

impl Request for HandshakeRequest {
    const KIND: u32 = request_kind::HANDSHAKE;
    const PAYLOAD_LEN: usize = 8;
    type Response = HandshakeResponse;

    fn encode_payload(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.protocol_version.to_le_bytes());
        buf.extend_from_slice(&self.process_id.to_le_bytes());
    }
}

/// Result code carried by `HANDSHAKE_OK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeResult {
    Success,
    VersionMismatch,
    Rejected,
    Unknown(u32),
}

impl HandshakeResult {
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::VersionMismatch,
            2 => Self::Rejected,
            other => Self::Unknown(other),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Self::Success => 0,
            Self::VersionMismatch => 1,
            Self::Rejected => 2,
            Self::Unknown(code) => code,
        }
    }
}

impl std::fmt::Display for HandshakeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::VersionMismatch => f.write_str("protocol version mismatch"),
            Self::Rejected => f.write_str("rejected by server"),
            Self::Unknown(code) => write!(f, "unknown result code {code}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub result: HandshakeResult,
}

impl Response for HandshakeResponse {
    const KIND: u32 = response_kind::HANDSHAKE_OK;
    const PAYLOAD_LEN: usize = 4;

    fn decode_payload(payload: &[u8]) -> Self {
        Self {
            result: HandshakeResult::from_code(read_u32(payload, 0)),
        }
    }

    fn encode_payload(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.result.code().to_le_bytes());
    }
}

// ── Gazes ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetGazesRequest;

impl GetGazesRequest {
    pub fn matches(frame: &[u8]) -> bool {
        frame.len() == Self::SIZE
            && Header::decode(frame).is_some_and(|h| h.kind == Self::KIND && h.payload_len == 0)
    }
}

impl Request for GetGazesRequest {
    const KIND: u32 = request_kind::GET_GAZES;
    const PAYLOAD_LEN: usize = 0;
    type Response = GazesResponse;

    fn encode_payload(&self, _buf: &mut Vec<u8>) {}
}

/// One eye as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EyeRecord {
    pub direction: [f32; 3],
    pub gaze_valid: bool,
    pub blink_valid: bool,
    pub blink: bool,
}

impl EyeRecord {
    pub const LEN: usize = 16;

    pub fn tracking(direction: [f32; 3]) -> Self {
        Self {
            direction,
            gaze_valid: true,
            blink_valid: true,
            blink: false,
        }
    }

    /// Convert to a sample. A reported blink invalidates the gaze when
    /// `blink_invalidates` is set. So does a direction that is not finite
    /// or has no length, whatever the flags say.
    pub fn sample(&self, blink_invalidates: bool) -> GazeSample {
        let blinking = self.blink_valid && self.blink;
        let direction = GazeDirection::from_array(self.direction);
        GazeSample {
            direction,
            valid: self.gaze_valid
                && !(blink_invalidates && blinking)
                && direction.normalized().is_some(),
        }
    }

    fn decode(bytes: &[u8]) -> Self {
        Self {
            direction: [read_f32(bytes, 0), read_f32(bytes, 4), read_f32(bytes, 8)],
            gaze_valid: bytes[12] != 0,
            blink_valid: bytes[13] != 0,
            blink: bytes[14] != 0,
        }
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        for c in self.direction {
            buf.extend_from_slice(&c.to_le_bytes());
        }
        buf.extend_from_slice(&[
            self.gaze_valid as u8,
            self.blink_valid as u8,
            self.blink as u8,
            0,
        ]);
    }
}

/// `GET_GAZES_OK`: left eye record followed by the right one.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GazesResponse {
    pub left: EyeRecord,
    pub right: EyeRecord,
}

impl GazesResponse {
    pub fn eye(&self, eye: Eye) -> &EyeRecord {
        match eye {
            Eye::Left => &self.left,
            Eye::Right => &self.right,
        }
    }
}

impl Response for GazesResponse {
    const KIND: u32 = response_kind::GET_GAZES_OK;
    const PAYLOAD_LEN: usize = 2 * EyeRecord::LEN;

    fn decode_payload(payload: &[u8]) -> Self {
        Self {
            left: EyeRecord::decode(&payload[..EyeRecord::LEN]),
            right: EyeRecord::decode(&payload[EyeRecord::LEN..]),
        }
    }

    fn encode_payload(&self, buf: &mut Vec<u8>) {
        self.left.encode(buf);
        self.right.encode(buf);
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(raw)
}

fn read_f32(bytes: &[u8], at: usize) -> f32 {
    f32::from_bits(read_u32(bytes, at))
}
