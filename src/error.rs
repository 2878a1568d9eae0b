//! # Error Types
//!
//! Error handling for protocol detection and the OpenWire codec.
//!
//! Every error is scoped to a single connection. The gateway tears down the
//! offending session and keeps serving every other connection.
//!
//! ## Error Categories
//! - **Detection Errors**: no registered signature matched within the byte or time budget
//! - **Codec Errors**: unknown type codes, bit/byte underruns, reference cache desync
//! - **Negotiation Errors**: unsupported versions, repeated negotiation
//! - **I/O Errors**: transport failures surfaced by the TCP front end
//! - **Configuration Errors**: invalid or unreadable configuration
//!
//! ## Example Usage
//! ```rust
//! use openwire_gateway::error::{ProtocolError, Result};
//! use openwire_gateway::openwire::OpenWireFormat;
//! use tracing::{info, error};
//!
//! fn decode(frame: &[u8]) -> Result<()> {
//!     let mut format = OpenWireFormat::default();
//!     let command = format.unmarshal(frame)?;
//!     info!(type_code = command.data_structure_type(), "decoded");
//!     Ok(())
//! }
//!
//! fn main() {
//!     if let Err(e) = decode(&[0, 0, 0, 1, 0xEE]) {
//!         error!(error = %e, "Dropping connection");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    pub const ERR_STRING_NOT_UTF8: &str = "String field is not valid UTF-8";
    pub const ERR_TRAILING_BYTES: &str = "Frame has trailing bytes after the command body";
    pub const ERR_NEGATIVE_LENGTH: &str = "Negative length prefix";
    pub const ERR_BOOLEAN_STREAM_TOO_LARGE: &str = "Boolean stream exceeds 65535 bytes";
    pub const ERR_BAD_MAGIC: &str = "Magic bytes do not identify an OpenWire peer";
    pub const ERR_SIZE_PREFIX_REQUIRED: &str = "Stream decoding requires the size prefix";
    pub const ERR_DETECTION_MISMATCH: &str = "No signature matches the connection prologue";
    pub const ERR_DETECTION_BUFFER_FULL: &str = "Detection buffer reached its maximum size";
    pub const ERR_DETECTION_TIMEOUT: &str = "Detection timed out while buffering";
    pub const ERR_DETECTION_DONE: &str = "Detection already completed for this connection";
    pub const ERR_CODEC_NOT_READY: &str = "Connection has not selected a codec yet";
    pub const ERR_FRAME_KIND: &str = "Frame does not belong to the connection's protocol";
    pub const ERR_DUPLICATE_CONNECTION: &str = "Connection handle already open";
    pub const ERR_NESTING_TOO_DEEP: &str = "Objects or exception causes nested too deeply";
    pub const ERR_MAP_TOO_DEEP: &str = "Property map nested too deeply";
    pub const ERR_UNREAD_PRESENCE_BITS: &str = "Boolean stream longer than the fields it describes";
}

/// ProtocolError is the primary error type for detection and codec operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol detection exhausted: {0}")]
    DetectionExhausted(&'static str),

    #[error("Unknown data structure type code: {0}")]
    UnknownTypeCode(u8),

    #[error("Unexpected data structure: expected {expected}, found type code {found}")]
    UnexpectedType { expected: &'static str, found: u8 },

    #[error("Boolean stream underrun")]
    BitStreamUnderrun,

    #[error("Buffer underrun: needed {needed} bytes, {available} available")]
    BufferUnderrun { needed: usize, available: usize },

    #[error("Reference cache desynchronised at index {0}")]
    CacheDesync(i16),

    #[error("Frame too large: {0} bytes")]
    OversizedFrame(usize),

    #[error("String value too long to encode: {0} bytes")]
    StringTooLong(usize),

    #[error("Invalid data: {0}")]
    InvalidData(&'static str),

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u32),

    #[error("Wire format already negotiated for this session")]
    AlreadyNegotiated,

    #[error("Tight marshal wrote {written} bytes, pass one sized {expected}")]
    MarshalSizeMismatch { expected: usize, written: usize },

    #[error("Tight marshal pass two consumed {read} presence bits, pass one wrote {written}")]
    MarshalBitMismatch { written: usize, read: usize },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Unknown connection: {0}")]
    UnknownConnection(u64),

    #[error("No codec registered for protocol: {0}")]
    NoCodec(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ProtocolError {
    /// Whether the session that produced this error has to be torn down.
    ///
    /// Binary framing has no resynchronisation point, so every codec and
    /// detection failure ends the connection. Only configuration errors are
    /// raised outside of a session.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ProtocolError::ConfigError(_))
    }

    /// Whether this error came out of the detection phase
    pub fn is_detection_failure(&self) -> bool {
        matches!(
            self,
            ProtocolError::DetectionExhausted(_) | ProtocolError::Timeout
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
