//! Crate-wide error type.
//!
//! Mirrors the taxonomy the decoder must surface: one variant per distinct
//! failure kind, each carrying the byte offset of the offending record where
//! one is known.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, UlogError>;

/// A record's single-letter type tag, kept around on errors for diagnostics.
pub type RecordTag = u8;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum UlogError {
    #[error("invalid file magic at offset {offset}")]
    InvalidMagic { offset: u64 },

    #[error("incompatible flag set outside the recognized bit (byte {byte_index}={value:#04x})")]
    IncompatibleFlag { byte_index: usize, value: u8 },

    #[error("unexpected end of file at offset {offset}: needed {needed} byte(s), {available} available")]
    UnexpectedEof {
        offset: u64,
        needed: u64,
        available: u64,
    },

    #[error("short read at offset {offset}: asked for {requested} byte(s), source returned {got}")]
    ShortRead {
        offset: u64,
        requested: u64,
        got: u64,
    },

    #[error("malformed {tag} record at offset {offset}: {reason}")]
    MalformedRecord {
        offset: u64,
        tag: RecordTag,
        reason: String,
    },

    #[error("unparseable format string {:?}: {reason}", .text)]
    BadFormat { text: String, reason: String },

    #[error("reference to undefined message type {type_name:?}")]
    UnknownType { type_name: String },

    #[error("data record at offset {offset} references unbound msg_id {msg_id}")]
    UnknownSubscription { offset: u64, msg_id: u16 },

    #[error("message definition {message_name:?} has no top-level uint64_t timestamp field")]
    MissingTimestamp { message_name: String },

    #[error("{0}")]
    StateViolation(String),

    #[error("seek to {target} out of range [0, {size}]")]
    SeekOutOfRange { target: i128, size: u64 },
}

impl UlogError {
    /// The byte offset of the offending record, where the error carries one.
    pub fn offset(&self) -> Option<u64> {
        match self {
            UlogError::InvalidMagic { offset } => Some(*offset),
            UlogError::UnexpectedEof { offset, .. } => Some(*offset),
            UlogError::ShortRead { offset, .. } => Some(*offset),
            UlogError::MalformedRecord { offset, .. } => Some(*offset),
            UlogError::UnknownSubscription { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}
