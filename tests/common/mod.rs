//! Shared fixture builder for the end-to-end integration suite.

use ulog_rs::records::{
    MAGIC, SYNC_MAGIC, TAG_ADD_LOGGED, TAG_DATA, TAG_DROPOUT, TAG_FLAG_BITS, TAG_FORMAT_DEFINITION,
    TAG_LOG, TAG_LOG_TAGGED, TAG_REMOVE_LOGGED, TAG_SYNC,
};

fn record(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.push(tag);
    out.extend_from_slice(payload);
    out
}

/// Builds a minimal, well-formed ULog byte stream: header, a flag-bits
/// record, one or more format definitions, subscriptions, then whatever
/// Data section records are appended.
pub struct UlogBuilder {
    bytes: Vec<u8>,
    /// File offset of `appendedOffsets[0]` inside the flag-bits payload,
    /// set once `flag_bits_with_appended_marker` has been called.
    appended_patch_pos: Option<usize>,
}

impl UlogBuilder {
    pub fn new(version: u8, start_timestamp: u64) -> Self {
        let mut bytes = MAGIC.to_vec();
        bytes.push(version);
        bytes.extend_from_slice(&start_timestamp.to_le_bytes());
        Self { bytes, appended_patch_pos: None }
    }

    pub fn flag_bits(mut self) -> Self {
        let payload = vec![0u8; 40];
        self.bytes.extend_from_slice(&record(TAG_FLAG_BITS, &payload));
        self
    }

    /// Writes a flag-bits record with the "appended data present" bit set;
    /// the first appended offset is filled in later by `finish_with_appended`.
    pub fn flag_bits_with_appended_marker(mut self) -> Self {
        let record_start = self.bytes.len();
        let mut payload = vec![0u8; 40];
        payload[8] = 1;
        self.bytes.extend_from_slice(&record(TAG_FLAG_BITS, &payload));
        self.appended_patch_pos = Some(record_start + 3 + 16);
        self
    }

    pub fn format(mut self, format: &str) -> Self {
        self.bytes.extend_from_slice(&record(TAG_FORMAT_DEFINITION, format.as_bytes()));
        self
    }

    pub fn add_logged(mut self, multi_id: u8, msg_id: u16, message_name: &str) -> Self {
        let mut payload = vec![multi_id];
        payload.extend_from_slice(&msg_id.to_le_bytes());
        payload.extend_from_slice(message_name.as_bytes());
        self.bytes.extend_from_slice(&record(TAG_ADD_LOGGED, &payload));
        self
    }

    pub fn remove_logged(mut self, msg_id: u8) -> Self {
        self.bytes.extend_from_slice(&record(TAG_REMOVE_LOGGED, &[msg_id]));
        self
    }

    /// `fields_le` is the pre-encoded little-endian payload for every field
    /// after `msg_id`, in declaration order (so: `timestamp` first).
    pub fn data(mut self, msg_id: u16, fields_le: &[u8]) -> Self {
        let mut payload = msg_id.to_le_bytes().to_vec();
        payload.extend_from_slice(fields_le);
        self.bytes.extend_from_slice(&record(TAG_DATA, &payload));
        self
    }

    pub fn log(mut self, level: u8, timestamp: u64, message: &str) -> Self {
        let mut payload = vec![level];
        payload.extend_from_slice(&timestamp.to_le_bytes());
        payload.extend_from_slice(message.as_bytes());
        self.bytes.extend_from_slice(&record(TAG_LOG, &payload));
        self
    }

    pub fn log_tagged(mut self, level: u8, tag: u16, timestamp: u64, message: &str) -> Self {
        let mut payload = vec![level];
        payload.extend_from_slice(&tag.to_le_bytes());
        payload.extend_from_slice(&timestamp.to_le_bytes());
        payload.extend_from_slice(message.as_bytes());
        self.bytes.extend_from_slice(&record(TAG_LOG_TAGGED, &payload));
        self
    }

    pub fn sync(mut self) -> Self {
        self.bytes.extend_from_slice(&record(TAG_SYNC, &SYNC_MAGIC));
        self
    }

    pub fn dropout(mut self, duration: u16) -> Self {
        self.bytes.extend_from_slice(&record(TAG_DROPOUT, &duration.to_le_bytes()));
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }

    /// Records the current length as `appendedOffsets[0]`, patches it into
    /// the earlier flag-bits record, then appends `crash_dump` bytes that
    /// are not shaped like a ULog record.
    pub fn finish_with_appended(mut self, crash_dump: &[u8]) -> Vec<u8> {
        let offset = self.bytes.len() as u64;
        let pos = self.appended_patch_pos.expect("flag_bits_with_appended_marker must be called first");
        self.bytes[pos..pos + 8].copy_from_slice(&offset.to_le_bytes());
        self.bytes.extend_from_slice(crash_dump);
        self.bytes
    }
}
