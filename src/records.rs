//! File-header and per-record framing.
//!
//! Every record is `uint16 size`, `uint8 type`, then `size` payload bytes.
//! [`RecordCodec`] decodes one record at a time from a [`ChunkedReader`],
//! dispatching on the type tag into a fixed set of variants.

use crate::definitions::{parse_field_definition, Field};
use crate::error::{Result, UlogError};
use crate::reader::ChunkedReader;
use crate::byte_source::ByteSource;

pub const MAGIC: [u8; 7] = [0x55, 0x4C, 0x6F, 0x67, 0x01, 0x12, 0x35];
pub const SYNC_MAGIC: [u8; 8] = [0x2F, 0x73, 0x13, 0x20, 0x25, 0x0C, 0xBB, 0x12];

pub const TAG_FLAG_BITS: u8 = b'B';
pub const TAG_INFORMATION: u8 = b'I';
pub const TAG_INFORMATION_MULTI: u8 = b'M';
pub const TAG_FORMAT_DEFINITION: u8 = b'F';
pub const TAG_PARAMETER: u8 = b'P';
pub const TAG_PARAMETER_DEFAULT: u8 = b'Q';
pub const TAG_ADD_LOGGED: u8 = b'A';
pub const TAG_REMOVE_LOGGED: u8 = b'R';
pub const TAG_DATA: u8 = b'D';
pub const TAG_LOG: u8 = b'L';
pub const TAG_LOG_TAGGED: u8 = b'C';
pub const TAG_SYNC: u8 = b'S';
pub const TAG_DROPOUT: u8 = b'O';

/// Tags that may only occur in the Data section; used by the
/// Definitions → Data boundary peek in `UlogEngine::open`.
pub const DATA_SECTION_TAGS: [u8; 7] = [
    TAG_ADD_LOGGED,
    TAG_REMOVE_LOGGED,
    TAG_DATA,
    TAG_LOG,
    TAG_LOG_TAGGED,
    TAG_SYNC,
    TAG_DROPOUT,
];

#[derive(Debug, Clone)]
pub struct FlagBits {
    pub compatible_flags: [u8; 8],
    pub incompatible_flags: [u8; 8],
    pub appended_offsets: [u64; 3],
}

impl FlagBits {
    /// Validates §3's FlagBits invariants: byte 0 of the incompatible flags
    /// must be 0 or 1 (the "appended data" bit), all other bytes must be 0.
    pub fn validate(&self) -> Result<()> {
        if self.incompatible_flags[0] > 1 {
            return Err(UlogError::IncompatibleFlag {
                byte_index: 0,
                value: self.incompatible_flags[0],
            });
        }
        for (i, &b) in self.incompatible_flags.iter().enumerate().skip(1) {
            if b != 0 {
                return Err(UlogError::IncompatibleFlag { byte_index: i, value: b });
            }
        }
        Ok(())
    }

    pub fn has_appended_data(&self) -> bool {
        self.incompatible_flags[0] == 1
    }
}

#[derive(Debug, Clone)]
pub enum Record {
    FlagBits(FlagBits),
    Information { key: Field, raw_value: Vec<u8> },
    InformationMulti { key: Field, is_continued: bool, raw_value: Vec<u8> },
    FormatDefinition { format: String },
    Parameter { key: Field, raw_value: Vec<u8> },
    ParameterDefault { key: Field, raw_value: Vec<u8>, default_types: u8 },
    AddLogged { multi_id: u8, msg_id: u16, message_name: String },
    RemoveLogged { msg_id: u16 },
    Data { msg_id: u16, payload: Vec<u8> },
    Log { log_level: u8, timestamp: u64, message: String },
    LogTagged { log_level: u8, tag: u16, timestamp: u64, message: String },
    Synchronization,
    Dropout { duration: u16 },
    Unknown { tag: u8, bytes: Vec<u8> },
}

#[derive(Debug, Clone)]
pub struct DecodedRecord {
    /// File offset of the record's `size` field.
    pub offset: u64,
    pub size: u16,
    pub tag: u8,
    pub record: Record,
}

fn min_size_for_tag(tag: u8) -> u16 {
    match tag {
        TAG_FLAG_BITS => 40,
        TAG_INFORMATION => 1,
        TAG_INFORMATION_MULTI => 2,
        TAG_FORMAT_DEFINITION => 0,
        TAG_PARAMETER => 1,
        TAG_PARAMETER_DEFAULT => 2,
        TAG_ADD_LOGGED => 3,
        TAG_REMOVE_LOGGED => 1,
        TAG_DATA => 2,
        TAG_LOG => 9,
        TAG_LOG_TAGGED => 11,
        TAG_SYNC => 8,
        TAG_DROPOUT => 2,
        _ => 0,
    }
}

fn malformed(offset: u64, tag: u8, reason: impl Into<String>) -> UlogError {
    UlogError::MalformedRecord {
        offset,
        tag,
        reason: reason.into(),
    }
}

/// Splits `keyLen key[keyLen] value` out of a payload, rejecting a `keyLen`
/// that would consume more bytes than remain.
fn split_key_value(offset: u64, tag: u8, payload: &[u8], key_len_offset: usize) -> Result<(Field, Vec<u8>)> {
    let key_len = payload[key_len_offset] as usize;
    let key_start = key_len_offset + 1;
    if key_start + key_len > payload.len() {
        return Err(malformed(offset, tag, "keyLen exceeds remaining payload"));
    }
    let key_text = String::from_utf8_lossy(&payload[key_start..key_start + key_len]).into_owned();
    let key = parse_field_definition(&key_text).map_err(|_| {
        malformed(offset, tag, format!("unparseable key {key_text:?}"))
    })?;
    let value = payload[key_start + key_len..].to_vec();
    Ok((key, value))
}

/// Decodes record framing and per-tag bodies from a [`ChunkedReader`].
///
/// In lenient mode (used by the indexer, which must tolerate a data section
/// truncated mid-record), an end-of-stream condition at a record boundary
/// yields `Ok(None)` instead of propagating an error. Malformed-but-complete
/// records still fail in either mode — lenience is for running out of
/// bytes, not for corruption.
pub struct RecordCodec {
    lenient: bool,
}

impl RecordCodec {
    pub fn new(lenient: bool) -> Self {
        Self { lenient }
    }

    /// Reads the 16-byte file header: 7-byte magic, 1-byte version, 8-byte
    /// little-endian start timestamp in microseconds.
    pub fn read_file_header<S: ByteSource + ?Sized>(
        &self,
        reader: &mut ChunkedReader<'_, S>,
    ) -> Result<(u8, u64)> {
        let offset = reader.position();
        let magic = reader.read_bytes(7)?;
        if magic != MAGIC {
            return Err(UlogError::InvalidMagic { offset });
        }
        let version = reader.read_u8()?;
        let start_timestamp = reader.read_u64()?;
        Ok((version, start_timestamp))
    }

    /// Decodes the next record, bounded by `limit` (an exclusive end
    /// offset, typically `dataEnd` or file size). Returns `None` when fewer
    /// than 3 header bytes remain before the limit.
    pub fn decode_next<S: ByteSource + ?Sized>(
        &self,
        reader: &mut ChunkedReader<'_, S>,
        limit: u64,
    ) -> Result<Option<DecodedRecord>> {
        let offset = reader.position();
        if limit.saturating_sub(offset) < 3 {
            return Ok(None);
        }

        let size = match reader.read_u16() {
            Ok(v) => v,
            Err(_) if self.lenient => return Ok(None),
            Err(e) => return Err(e),
        };
        let tag = match reader.read_u8() {
            Ok(v) => v,
            Err(_) if self.lenient => return Ok(None),
            Err(e) => return Err(e),
        };

        if offset + 3 + size as u64 > limit {
            if self.lenient {
                return Ok(None);
            }
            return Err(UlogError::UnexpectedEof {
                offset,
                needed: size as u64,
                available: limit.saturating_sub(offset + 3),
            });
        }

        if size < min_size_for_tag(tag) {
            return Err(malformed(
                offset,
                tag,
                format!("payload size {size} below minimum {}", min_size_for_tag(tag)),
            ));
        }

        let payload = match reader.read_bytes(size as u64) {
            Ok(v) => v,
            Err(_) if self.lenient => return Ok(None),
            Err(e) => return Err(e),
        };

        let record = self.decode_payload(offset, tag, &payload)?;
        Ok(Some(DecodedRecord { offset, size, tag, record }))
    }

    fn decode_payload(&self, offset: u64, tag: u8, payload: &[u8]) -> Result<Record> {
        match tag {
            TAG_FLAG_BITS => {
                let mut compatible_flags = [0u8; 8];
                compatible_flags.copy_from_slice(&payload[0..8]);
                let mut incompatible_flags = [0u8; 8];
                incompatible_flags.copy_from_slice(&payload[8..16]);
                let mut appended_offsets = [0u64; 3];
                for i in 0..3 {
                    let start = 16 + i * 8;
                    appended_offsets[i] = u64::from_le_bytes(payload[start..start + 8].try_into().unwrap());
                }
                let flag_bits = FlagBits { compatible_flags, incompatible_flags, appended_offsets };
                flag_bits.validate()?;
                Ok(Record::FlagBits(flag_bits))
            }
            TAG_INFORMATION => {
                let (key, raw_value) = split_key_value(offset, tag, payload, 0)?;
                Ok(Record::Information { key, raw_value })
            }
            TAG_INFORMATION_MULTI => {
                let is_continued = payload[0] != 0;
                let (key, raw_value) = split_key_value(offset, tag, payload, 1)?;
                Ok(Record::InformationMulti { key, is_continued, raw_value })
            }
            TAG_FORMAT_DEFINITION => {
                let format = String::from_utf8_lossy(payload).into_owned();
                Ok(Record::FormatDefinition { format })
            }
            TAG_PARAMETER => {
                let (key, raw_value) = split_key_value(offset, tag, payload, 0)?;
                Ok(Record::Parameter { key, raw_value })
            }
            TAG_PARAMETER_DEFAULT => {
                let default_types = payload[0];
                let (key, raw_value) = split_key_value(offset, tag, payload, 1)?;
                Ok(Record::ParameterDefault { key, raw_value, default_types })
            }
            TAG_ADD_LOGGED => {
                let multi_id = payload[0];
                let msg_id = u16::from_le_bytes(payload[1..3].try_into().unwrap());
                let message_name = String::from_utf8_lossy(&payload[3..]).into_owned();
                Ok(Record::AddLogged { multi_id, msg_id, message_name })
            }
            TAG_REMOVE_LOGGED => {
                let msg_id = payload[0] as u16;
                Ok(Record::RemoveLogged { msg_id })
            }
            TAG_DATA => {
                let msg_id = u16::from_le_bytes(payload[0..2].try_into().unwrap());
                Ok(Record::Data { msg_id, payload: payload[2..].to_vec() })
            }
            TAG_LOG => {
                let log_level = payload[0];
                let timestamp = u64::from_le_bytes(payload[1..9].try_into().unwrap());
                let message = String::from_utf8_lossy(&payload[9..]).into_owned();
                Ok(Record::Log { log_level, timestamp, message })
            }
            TAG_LOG_TAGGED => {
                let log_level = payload[0];
                let tag_id = u16::from_le_bytes(payload[1..3].try_into().unwrap());
                let timestamp = u64::from_le_bytes(payload[3..11].try_into().unwrap());
                let message = String::from_utf8_lossy(&payload[11..]).into_owned();
                Ok(Record::LogTagged { log_level, tag: tag_id, timestamp, message })
            }
            TAG_SYNC => {
                if payload != SYNC_MAGIC {
                    return Err(malformed(offset, tag, "sync payload does not match expected magic"));
                }
                Ok(Record::Synchronization)
            }
            TAG_DROPOUT => {
                let duration = u16::from_le_bytes(payload[0..2].try_into().unwrap());
                Ok(Record::Dropout { duration })
            }
            _ => Ok(Record::Unknown { tag, bytes: payload.to_vec() }),
        }
    }
}
