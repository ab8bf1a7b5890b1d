//! nearcard wire format — the packets carried in broadcast adverts.
//!
//! An encoded contact is split into packets of at most
//! [`PACKET_DATA_LEN`] characters. Each packet travels as one frame:
//!
//! ```text
//! session(2) | index(1) | total(1) | chunk(0..=9 chars, UTF-8)
//! ```
//!
//! Session bytes, index and total are single bytes in 0..=127 so the
//! whole header is printable-range ASCII. Changing any of this breaks
//! interop with every device already in the field.

use std::fmt;

use rand::Rng;
use static_assertions::assert_eq_size;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Payload characters carried by one packet.
pub const PACKET_DATA_LEN: usize = 9;

/// Length of the per-session device identifier in bytes.
pub const SESSION_ID_LEN: usize = 2;

/// First code point used for header bytes.
pub const CHARSET_START: u8 = 0;

/// Last code point used for header bytes.
pub const CHARSET_END: u8 = 127;

/// Largest packet count the one-byte total can express.
pub const MAX_PACKETS: usize = (CHARSET_END - CHARSET_START) as usize;

/// Header size in bytes.
pub const HEADER_LEN: usize = 4;

/// Upper bound on a frame's size: header plus nine four-byte characters.
pub const MAX_FRAME_LEN: usize = HEADER_LEN + PACKET_DATA_LEN * 4;

/// Protocol name the service identifier is derived from.
/// Must never change once devices are deployed.
pub const SERVICE_NAME: &[u8] = b"nearcard.contact_exchange";

// ── Service identifier ────────────────────────────────────────────────────────

/// Identifier all devices speaking this protocol advertise under, so the
/// radio layer can filter frames before they reach the reassembly cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceId(pub [u8; 16]);

impl ServiceId {
    /// Derive a service id from a canonical protocol name.
    pub fn from_name(name: &[u8]) -> Self {
        let hash = blake3::hash(name);
        let mut id = [0u8; 16];
        id.copy_from_slice(&hash.as_bytes()[..16]);
        Self(id)
    }

    /// The contact exchange service.
    pub fn contact_exchange() -> Self {
        Self::from_name(SERVICE_NAME)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let h = hex::encode(self.0);
        write!(
            f,
            "{}-{}-{}-{}-{}",
            &h[0..8],
            &h[8..12],
            &h[12..16],
            &h[16..20],
            &h[20..32]
        )
    }
}

// ── Session identifier ────────────────────────────────────────────────────────

/// Short identifier scoping the packets of one broadcast session.
///
/// Drawn fresh each time broadcasting starts. Two senders may pick the same
/// id; nothing prevents it and their packets will then interleave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub [u8; SESSION_ID_LEN]);

impl SessionId {
    /// Pick a random session id from the header charset.
    pub fn random() -> Self {
        Self::random_with(&mut rand::thread_rng())
    }

    pub fn random_with<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut id = [0u8; SESSION_ID_LEN];
        for b in id.iter_mut() {
            *b = rng.gen_range(CHARSET_START..=CHARSET_END);
        }
        Self(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

// ── Frame header ──────────────────────────────────────────────────────────────

/// Fixed four-byte prefix of every frame.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct FrameHeader {
    /// Session id of the sender.
    pub session: [u8; SESSION_ID_LEN],
    /// Zero-based packet position, offset by `CHARSET_START`.
    pub index: u8,
    /// Number of packets in the session's payload, offset by `CHARSET_START`.
    pub total: u8,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(FrameHeader, [u8; HEADER_LEN]);

// ── Packet ────────────────────────────────────────────────────────────────────

/// One chunk of an encoded contact plus its position metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketPart {
    pub session: SessionId,
    pub index: u8,
    pub total: u8,
    pub chunk: String,
}

impl PacketPart {
    /// Serialize into the on-air frame.
    pub fn to_frame(&self) -> Vec<u8> {
        let header = FrameHeader {
            session: self.session.0,
            index: self.index + CHARSET_START,
            total: self.total + CHARSET_START,
        };
        let mut out = Vec::with_capacity(HEADER_LEN + self.chunk.len());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(self.chunk.as_bytes());
        out
    }

    /// Parse a received frame.
    pub fn parse(frame: &[u8]) -> Result<Self, WireError> {
        let header = FrameHeader::read_from_prefix(frame).ok_or(WireError::TooShort(frame.len()))?;

        let session = header.session;
        for b in session.iter().chain([header.index, header.total].iter()) {
            if !(CHARSET_START..=CHARSET_END).contains(b) {
                return Err(WireError::HeaderOutOfRange(*b));
            }
        }

        let index = header.index - CHARSET_START;
        let total = header.total - CHARSET_START;
        if index >= total {
            return Err(WireError::IndexOutOfRange { index, total });
        }

        let chunk = std::str::from_utf8(&frame[HEADER_LEN..])
            .map_err(|_| WireError::InvalidUtf8)?
            .to_string();

        Ok(Self {
            session: SessionId(session),
            index,
            total,
            chunk,
        })
    }
}

// ── Framing ───────────────────────────────────────────────────────────────────

/// Number of packets needed to carry `payload`.
pub fn packet_count(payload: &str) -> usize {
    payload.chars().count().div_ceil(PACKET_DATA_LEN)
}

/// Split an encoded payload into ordered packets for one session.
///
/// Every packet but the last carries exactly [`PACKET_DATA_LEN`]
/// characters; the last carries the remainder.
pub fn frame(session: SessionId, payload: &str) -> Result<Vec<PacketPart>, WireError> {
    let chars: Vec<char> = payload.chars().collect();
    let packets = chars.len().div_ceil(PACKET_DATA_LEN);
    if packets > MAX_PACKETS {
        return Err(WireError::PayloadTooLarge {
            packets,
            max: MAX_PACKETS,
        });
    }

    let total = packets as u8;
    Ok(chars
        .chunks(PACKET_DATA_LEN)
        .enumerate()
        .map(|(i, chunk)| PacketPart {
            session,
            index: i as u8,
            total,
            chunk: chunk.iter().collect(),
        })
        .collect())
}

/// Concatenate chunks in index order, whatever order they arrived in.
pub fn reassemble<'a>(parts: impl IntoIterator<Item = &'a PacketPart>) -> String {
    let mut parts: Vec<&PacketPart> = parts.into_iter().collect();
    parts.sort_by_key(|p| p.index);
    parts.dedup_by_key(|p| p.index);
    parts.iter().map(|p| p.chunk.as_str()).collect()
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when building or interpreting frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("frame of {0} bytes is shorter than the {HEADER_LEN}-byte header")]
    TooShort(usize),

    #[error("header byte 0x{0:02x} outside the 0..=127 charset")]
    HeaderOutOfRange(u8),

    #[error("packet index {index} not below total {total}")]
    IndexOutOfRange { index: u8, total: u8 },

    #[error("chunk is not valid UTF-8")]
    InvalidUtf8,

    #[error("payload needs {packets} packets, maximum is {max}")]
    PayloadTooLarge { packets: usize, max: usize },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
