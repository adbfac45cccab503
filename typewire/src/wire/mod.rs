//! Wire format for message framing.
//!
//! Frame format: `[magic:2][length:4][typeId:2][payload:N]`
//!
//! - **magic**: constant `0x0228` (little-endian u16)
//! - **length**: payload byte count (little-endian u32)
//! - **typeId**: the sender's assigned type id (little-endian u16)
//! - **payload**: `length` bytes of codec output
//!
//! The header is exactly [`HEADER_SIZE`] bytes; the payload follows
//! immediately. There is no checksum and no resynchronization: any framing
//! violation is fatal to the connection.

mod transport;

pub use transport::{FrameReader, FrameWriter, RawMessage};

/// Frame magic constant.
pub const MAGIC: u16 = 0x0228;

/// Header size: 2 (magic) + 4 (length) + 2 (type id) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Fatal framing violations.
///
/// Both variants tear the connection down; a desynchronized stream is never
/// reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The first two bytes of a frame were not [`MAGIC`].
    #[error("invalid magic code {found:#06x} (expected {MAGIC:#06x})")]
    InvalidMagicCode {
        /// The bytes actually read, little-endian.
        found: u16,
    },

    /// The length field does not fit a signed 32-bit payload size.
    #[error("payload length {length} overflows the frame size limit")]
    LengthOverflow {
        /// The offending length field.
        length: u32,
    },
}

/// Transport failures surfaced by a single framed read or write.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// A framing violation; the stream position can no longer be trusted.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The underlying stream failed (includes an unexpected EOF mid-frame
    /// and a write that exceeded its timeout).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation was cancelled. Not a failure: cancellation propagates
    /// distinctly and always results in a graceful disconnect.
    #[error("operation cancelled")]
    Cancelled,
}

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload byte count.
    pub length: u32,
    /// Type id assigned by the sender's type table.
    pub type_id: u16,
}

impl FrameHeader {
    /// Serialize the header (magic included) into `buf`.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is smaller than [`HEADER_SIZE`].
    pub fn serialize_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..2].copy_from_slice(&MAGIC.to_le_bytes());
        buf[2..6].copy_from_slice(&self.length.to_le_bytes());
        buf[6..8].copy_from_slice(&self.type_id.to_le_bytes());
    }

    /// Parse a header from exactly [`HEADER_SIZE`] bytes, validating magic
    /// before anything else is interpreted.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidMagicCode`] on a magic mismatch and
    /// [`ProtocolError::LengthOverflow`] when the length field cannot be a
    /// valid payload size.
    pub fn deserialize(buf: &[u8; HEADER_SIZE]) -> Result<Self, ProtocolError> {
        let magic = u16::from_le_bytes([buf[0], buf[1]]);
        if magic != MAGIC {
            return Err(ProtocolError::InvalidMagicCode { found: magic });
        }

        let length = u32::from_le_bytes([buf[2], buf[3], buf[4], buf[5]]);
        if i32::try_from(length).is_err() {
            return Err(ProtocolError::LengthOverflow { length });
        }

        let type_id = u16::from_le_bytes([buf[6], buf[7]]);
        Ok(Self { length, type_id })
    }
}
