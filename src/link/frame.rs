//! Wire codec for the UDP link
//!
//! Two frame shapes travel on the wire, both little-endian:
//!
//! **Data frame** — `n × 4` bytes of IEEE-754 `f32` values followed by a
//! 2-byte CRC-16/CCITT-FALSE over those bytes:
//!
//! ```text
//! ┌───────────────────────────┬──────────────┐
//! │ n × f32 (little-endian)   │ CRC-16 (LE)  │
//! └───────────────────────────┴──────────────┘
//! ```
//!
//! **Handshake descriptor** — 7 bytes exchanged once per session:
//!
//! ```text
//! ┌─────────────────┬────────────────┬──────────┬───────────────┐
//! │ num_outputs u16 │ num_inputs u16 │ tag byte │ max_age u16   │
//! └─────────────────┴────────────────┴──────────┴───────────────┘
//! ```
//!
//! The total data-frame size is fixed for the session; any received
//! datagram that does not match the negotiated shape is classified and
//! dropped by the receive pipeline, never surfaced to the peer.

use crate::error::{Error, Result};
use crate::link::crc::crc16_ccitt;

/// Scalar type tags advertised in the handshake
///
/// The transport currently transmits only `f32` payloads; the tag is
/// carried for diagnostics and forward compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl ScalarType {
    /// Wire tag character for this type
    pub fn tag(self) -> u8 {
        match self {
            ScalarType::I8 => b'b',
            ScalarType::U8 => b'B',
            ScalarType::I16 => b'h',
            ScalarType::U16 => b'H',
            ScalarType::I32 => b'i',
            ScalarType::U32 => b'I',
            ScalarType::I64 => b'q',
            ScalarType::U64 => b'Q',
            ScalarType::F32 => b'f',
            ScalarType::F64 => b'd',
        }
    }

    /// Parse a wire tag character
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'b' => Some(ScalarType::I8),
            b'B' => Some(ScalarType::U8),
            b'h' => Some(ScalarType::I16),
            b'H' => Some(ScalarType::U16),
            b'i' => Some(ScalarType::I32),
            b'I' => Some(ScalarType::U32),
            b'q' => Some(ScalarType::I64),
            b'Q' => Some(ScalarType::U64),
            b'f' => Some(ScalarType::F32),
            b'd' => Some(ScalarType::F64),
            _ => None,
        }
    }

    /// Size of one scalar of this type on the wire
    pub fn size_bytes(self) -> usize {
        match self {
            ScalarType::I8 | ScalarType::U8 => 1,
            ScalarType::I16 | ScalarType::U16 => 2,
            ScalarType::I32 | ScalarType::U32 | ScalarType::F32 => 4,
            ScalarType::I64 | ScalarType::U64 | ScalarType::F64 => 8,
        }
    }
}

impl std::fmt::Display for ScalarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag() as char)
    }
}

/// CRC trailer size on every data frame
pub const CRC_LEN: usize = 2;

/// Bytes per payload value
pub const VALUE_LEN: usize = 4;

/// Encode a data frame: little-endian `f32` values plus CRC trailer
pub fn encode_data(values: &[f32]) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(values.len() * VALUE_LEN + CRC_LEN);
    for v in values {
        buffer.extend_from_slice(&v.to_le_bytes());
    }
    let crc = crc16_ccitt(&buffer);
    buffer.extend_from_slice(&crc.to_le_bytes());
    buffer
}

/// Classification of a received datagram
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeOutcome {
    /// CRC and shape both valid; decoded payload values
    Payload(Vec<f32>),
    /// CRC trailer did not match the payload bytes
    Corrupted,
    /// Datagram shorter than the CRC trailer, or payload length not
    /// `num_inputs × 4`
    ShapeInvalid,
}

/// Decode and classify a received datagram against the negotiated shape
///
/// Checks run in order: minimum length, CRC, payload length. The caller
/// maps each outcome onto its counter; nothing is reported to the peer.
pub fn decode_data(datagram: &[u8], num_inputs: u16) -> DecodeOutcome {
    if datagram.len() < CRC_LEN {
        return DecodeOutcome::ShapeInvalid;
    }

    let (payload, trailer) = datagram.split_at(datagram.len() - CRC_LEN);
    let received_crc = u16::from_le_bytes([trailer[0], trailer[1]]);
    if crc16_ccitt(payload) != received_crc {
        return DecodeOutcome::Corrupted;
    }

    if payload.len() != num_inputs as usize * VALUE_LEN {
        return DecodeOutcome::ShapeInvalid;
    }

    let values = payload
        .chunks_exact(VALUE_LEN)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    DecodeOutcome::Payload(values)
}

/// Fixed size of the handshake descriptor on the wire
pub const DESCRIPTOR_LEN: usize = 7;

/// Session descriptor exchanged once during the handshake
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Descriptor {
    /// Values this endpoint sends per datagram
    pub num_outputs: u16,
    /// Values this endpoint expects per received datagram
    pub num_inputs: u16,
    /// Advertised scalar type of outgoing payloads
    pub send_type: ScalarType,
    /// Advertised maximum data age, whole seconds
    pub max_age: u16,
}

impl Descriptor {
    /// Build a descriptor from session parameters
    ///
    /// The configured age is a fractional seconds value; the wire field is
    /// a truncating cast, so values above 65535 s wrap.
    pub fn new(num_outputs: u16, num_inputs: u16, send_type: ScalarType, max_age_seconds: f64) -> Self {
        Self {
            num_outputs,
            num_inputs,
            send_type,
            max_age: (max_age_seconds as u64) as u16,
        }
    }

    /// Pack into the 7-byte wire layout
    pub fn encode(&self) -> [u8; DESCRIPTOR_LEN] {
        let mut buf = [0u8; DESCRIPTOR_LEN];
        buf[0..2].copy_from_slice(&self.num_outputs.to_le_bytes());
        buf[2..4].copy_from_slice(&self.num_inputs.to_le_bytes());
        buf[4] = self.send_type.tag();
        buf[5..7].copy_from_slice(&self.max_age.to_le_bytes());
        buf
    }

    /// Unpack from wire bytes; the byte count must be exactly 7
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != DESCRIPTOR_LEN {
            return Err(Error::Handshake(format!(
                "descriptor must be {} bytes, got {}",
                DESCRIPTOR_LEN,
                bytes.len()
            )));
        }
        let send_type = ScalarType::from_tag(bytes[4]).ok_or_else(|| {
            Error::Handshake(format!("unknown scalar type tag 0x{:02X}", bytes[4]))
        })?;
        Ok(Self {
            num_outputs: u16::from_le_bytes([bytes[0], bytes[1]]),
            num_inputs: u16::from_le_bytes([bytes[2], bytes[3]]),
            send_type,
            max_age: u16::from_le_bytes([bytes[5], bytes[6]]),
        })
    }
}
