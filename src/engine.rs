//! `UlogEngine`: the `open()` state machine, subscription table, time index
//! builder, and the `readMessages` query/iteration API.

use std::collections::HashMap;

use log::{debug, trace};

use crate::byte_source::ByteSource;
use crate::definitions::{field_size, parse_message_definition, BuiltinType, DefinitionTable, Field, FieldType};
use crate::error::{Result, UlogError};
use crate::index::{IndexEntry, IndexTag, TimeIndex};
use crate::message::{decode_message, decode_simple_value, Value};
use crate::reader::{ChunkedReader, DEFAULT_CHUNK_SIZE};
use crate::records::{DecodedRecord, FlagBits, Record, RecordCodec, DATA_SECTION_TAGS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Unopened,
    HeaderRead,
    DefinitionsParsed,
    Indexed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InfoValue {
    Single(Value),
    Multi(Vec<Value>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    F32(f32),
    I32(i32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamEntry {
    pub value: ParamValue,
    pub default_types: u8,
}

#[derive(Debug, Clone)]
pub struct Header {
    pub version: u8,
    pub start_timestamp: u64,
    pub flag_bits: Option<FlagBits>,
    pub information: HashMap<String, InfoValue>,
    pub parameters: HashMap<String, ParamEntry>,
    pub definitions: DefinitionTable,
}

#[derive(Debug, Clone)]
pub struct Subscription {
    pub message_name: String,
    pub multi_id: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataSectionMessage {
    AddLogged { msg_id: u16, multi_id: u8, message_name: String },
    RemoveLogged { msg_id: u16 },
    Data { msg_id: u16, timestamp: u64, fields: Vec<(String, Value)> },
    Log { timestamp: u64, level: u8, message: String },
    LogTagged { timestamp: u64, level: u8, tag: u16, message: String },
    Synchronization,
    Dropout { duration: u16 },
}

#[derive(Debug, Clone)]
pub struct ReadMessagesOptions {
    pub start: Option<u64>,
    pub end: Option<u64>,
    pub msg_ids: Option<Vec<u16>>,
    pub include_logs: bool,
    pub reverse: bool,
}

impl Default for ReadMessagesOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadMessagesOptions {
    pub fn new() -> Self {
        Self {
            start: None,
            end: None,
            msg_ids: None,
            include_logs: true,
            reverse: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UlogEngineOptions {
    pub chunk_size: u64,
}

impl Default for UlogEngineOptions {
    fn default() -> Self {
        Self { chunk_size: DEFAULT_CHUNK_SIZE }
    }
}

fn state_violation(msg: impl Into<String>) -> UlogError {
    UlogError::StateViolation(msg.into())
}

/// Decodes the ULog file reachable through `source` into a structured,
/// seekable, time-indexed stream of messages.
pub struct UlogEngine<'s, S: ByteSource + ?Sized> {
    source: &'s S,
    chunk_size: u64,
    phase: Phase,

    version: u8,
    start_timestamp: u64,
    flag_bits: Option<FlagBits>,
    information: HashMap<String, InfoValue>,
    parameters: HashMap<String, ParamEntry>,
    definitions: DefinitionTable,
    subscriptions: HashMap<u16, Subscription>,
    timestamp_offsets: HashMap<u16, u64>,

    index: TimeIndex,
    data_message_counts: HashMap<u16, u64>,
    log_count: u64,
    data_end: u64,
}

impl<'s, S: ByteSource + ?Sized> UlogEngine<'s, S> {
    pub fn new(source: &'s S, options: UlogEngineOptions) -> Self {
        Self {
            source,
            chunk_size: options.chunk_size.max(1),
            phase: Phase::Unopened,
            version: 0,
            start_timestamp: 0,
            flag_bits: None,
            information: HashMap::new(),
            parameters: HashMap::new(),
            definitions: DefinitionTable::new(),
            subscriptions: HashMap::new(),
            timestamp_offsets: HashMap::new(),
            index: TimeIndex::new(),
            data_message_counts: HashMap::new(),
            log_count: 0,
            data_end: 0,
        }
    }

    pub fn open(&mut self) -> Result<()> {
        if self.phase != Phase::Unopened {
            return Err(state_violation("open() called more than once"));
        }

        let mut reader = ChunkedReader::new(self.source, self.chunk_size);
        let strict = RecordCodec::new(false);

        let (version, start_timestamp) = strict.read_file_header(&mut reader)?;
        self.version = version;
        self.start_timestamp = start_timestamp;
        self.phase = Phase::HeaderRead;
        debug!("ulog header read: version={version} start_timestamp={start_timestamp}");

        self.parse_definitions(&mut reader, &strict)?;
        self.phase = Phase::DefinitionsParsed;
        debug!(
            "definitions section parsed: {} definitions, {} parameters, {} information keys",
            self.definitions.len(),
            self.parameters.len(),
            self.information.len()
        );

        self.data_end = self.compute_data_end(reader.size());
        let lenient = RecordCodec::new(true);
        self.build_index(&mut reader, &lenient)?;
        self.index.sort();
        self.phase = Phase::Indexed;
        debug!(
            "indexing complete: {} entries, {} data messages, {} log messages",
            self.index.len(),
            self.data_message_counts.values().sum::<u64>(),
            self.log_count
        );

        Ok(())
    }

    fn compute_data_end(&self, file_size: u64) -> u64 {
        if let Some(flags) = &self.flag_bits {
            let first = flags.appended_offsets[0];
            if first != 0 && first < file_size {
                return first;
            }
        }
        file_size
    }

    fn parse_definitions(&mut self, reader: &mut ChunkedReader<'_, S>, codec: &RecordCodec) -> Result<()> {
        loop {
            if reader.remaining() < 3 {
                break;
            }
            let tag = reader.peek_u8(2)?;
            if DATA_SECTION_TAGS.contains(&tag) {
                break;
            }

            let limit = reader.size();
            let decoded = codec
                .decode_next(reader, limit)?
                .ok_or_else(|| state_violation("definitions section ended unexpectedly"))?;

            if DATA_SECTION_TAGS.contains(&decoded.tag) {
                return Err(state_violation(format!(
                    "Data-section tag {:?} encountered while parsing definitions at offset {}",
                    decoded.tag as char, decoded.offset
                )));
            }

            self.dispatch_definition_record(decoded)?;
        }
        Ok(())
    }

    fn dispatch_definition_record(&mut self, decoded: DecodedRecord) -> Result<()> {
        match decoded.record {
            Record::FlagBits(flags) => {
                self.flag_bits = Some(flags);
            }
            Record::Information { key, raw_value } => {
                if !key.is_complex {
                    let value = decode_simple_value(&key, &raw_value, decoded.offset, decoded.tag)?;
                    self.information.insert(key.name.clone(), InfoValue::Single(value));
                }
            }
            Record::InformationMulti { key, raw_value, .. } => {
                if !key.is_complex {
                    let value = decode_simple_value(&key, &raw_value, decoded.offset, decoded.tag)?;
                    match self.information.entry(key.name.clone()).or_insert_with(|| InfoValue::Multi(Vec::new())) {
                        InfoValue::Multi(items) => items.push(value),
                        InfoValue::Single(_) => {}
                    }
                }
            }
            Record::FormatDefinition { format } => {
                let def = parse_message_definition(&format)?;
                self.definitions.insert(def.name.clone(), def);
            }
            Record::Parameter { key, raw_value } => {
                if let Some(entry) = param_entry_from(&key, &raw_value)? {
                    self.parameters.insert(key.name.clone(), ParamEntry { value: entry, default_types: 0 });
                }
            }
            Record::ParameterDefault { key, raw_value, default_types } => {
                if let Some(entry) = param_entry_from(&key, &raw_value)? {
                    self.parameters.insert(key.name.clone(), ParamEntry { value: entry, default_types });
                }
            }
            // Any other tag decoded while scanning the Definitions section
            // (e.g. Unknown) is simply retained implicitly by having been
            // consumed; nothing else to record.
            _ => {}
        }
        Ok(())
    }

    fn build_index(&mut self, reader: &mut ChunkedReader<'_, S>, codec: &RecordCodec) -> Result<()> {
        let mut running_max: u64 = self.start_timestamp;

        loop {
            if self.data_end.saturating_sub(reader.position()) < 3 {
                break;
            }
            let decoded = match codec.decode_next(reader, self.data_end)? {
                Some(d) => d,
                None => break,
            };
            trace!("indexed record tag={} offset={}", decoded.tag as char, decoded.offset);

            match &decoded.record {
                Record::AddLogged { multi_id, msg_id, message_name } => {
                    if !self.definitions.contains_key(message_name) {
                        return Err(UlogError::UnknownType { type_name: message_name.clone() });
                    }
                    self.subscriptions.insert(
                        *msg_id,
                        Subscription { message_name: message_name.clone(), multi_id: *multi_id },
                    );
                    self.index.push(IndexEntry { timestamp: running_max, offset: decoded.offset, tag: IndexTag::Other });
                }
                Record::Data { msg_id, payload } => {
                    let offset_in_payload = self.timestamp_offset_for(*msg_id, decoded.offset)?;
                    if (offset_in_payload as usize) + 8 > payload.len() {
                        return Err(UlogError::MalformedRecord {
                            offset: decoded.offset,
                            tag: decoded.tag,
                            reason: "payload too short for cached timestamp offset".to_string(),
                        });
                    }
                    let ts_bytes = &payload[offset_in_payload as usize..offset_in_payload as usize + 8];
                    let timestamp = u64::from_le_bytes(ts_bytes.try_into().unwrap());
                    running_max = running_max.max(timestamp);
                    *self.data_message_counts.entry(*msg_id).or_insert(0) += 1;
                    self.index.push(IndexEntry { timestamp, offset: decoded.offset, tag: IndexTag::Data(*msg_id) });
                }
                Record::Log { timestamp, .. } => {
                    running_max = running_max.max(*timestamp);
                    self.log_count += 1;
                    self.index.push(IndexEntry { timestamp: *timestamp, offset: decoded.offset, tag: IndexTag::Log });
                }
                Record::LogTagged { timestamp, .. } => {
                    running_max = running_max.max(*timestamp);
                    self.log_count += 1;
                    self.index.push(IndexEntry { timestamp: *timestamp, offset: decoded.offset, tag: IndexTag::Log });
                }
                Record::RemoveLogged { .. } | Record::Synchronization | Record::Dropout { .. } | Record::Unknown { .. } => {
                    self.index.push(IndexEntry { timestamp: running_max, offset: decoded.offset, tag: IndexTag::Other });
                }
                _ => {
                    // FlagBits/Information/Parameter/FormatDefinition do not occur in the
                    // Data section; reaching here would mean a definitions-only tag was
                    // decoded past the section boundary, which decode_payload never does
                    // for these variants without the matching tag byte.
                    self.index.push(IndexEntry { timestamp: running_max, offset: decoded.offset, tag: IndexTag::Other });
                }
            }
        }
        Ok(())
    }

    /// Computes (and caches) the byte offset, within a `msg_id`'s Data
    /// payload, of its top-level `uint64_t timestamp` field.
    fn timestamp_offset_for(&mut self, msg_id: u16, record_offset: u64) -> Result<u64> {
        if let Some(&offset) = self.timestamp_offsets.get(&msg_id) {
            return Ok(offset);
        }
        let sub = self
            .subscriptions
            .get(&msg_id)
            .ok_or(UlogError::UnknownSubscription { offset: record_offset, msg_id })?;
        let def = self
            .definitions
            .get(&sub.message_name)
            .ok_or_else(|| UlogError::UnknownType { type_name: sub.message_name.clone() })?;

        let mut offset = 0u64;
        for field in &def.fields {
            let elem_size = field_size(field, &self.definitions)? as u64;
            let stride = elem_size * field.element_count() as u64;
            let is_timestamp = !field.is_padding()
                && field.name == "timestamp"
                && !field.is_complex
                && field.array_length.is_none()
                && matches!(field.field_type, FieldType::Builtin(BuiltinType::UInt64));
            if is_timestamp {
                self.timestamp_offsets.insert(msg_id, offset);
                return Ok(offset);
            }
            offset += stride;
        }
        Err(UlogError::MissingTimestamp { message_name: sub.message_name.clone() })
    }

    fn require_indexed(&self) -> Result<()> {
        if self.phase != Phase::Indexed {
            return Err(state_violation("engine must be open() before this call"));
        }
        Ok(())
    }

    pub fn header(&self) -> Result<Header> {
        self.require_indexed()?;
        Ok(Header {
            version: self.version,
            start_timestamp: self.start_timestamp,
            flag_bits: self.flag_bits.clone(),
            information: self.information.clone(),
            parameters: self.parameters.clone(),
            definitions: self.definitions.clone(),
        })
    }

    pub fn subscriptions(&self) -> Result<&HashMap<u16, Subscription>> {
        self.require_indexed()?;
        Ok(&self.subscriptions)
    }

    pub fn message_count(&self) -> Result<u64> {
        self.require_indexed()?;
        Ok(self.index.len() as u64)
    }

    pub fn log_count(&self) -> Result<u64> {
        self.require_indexed()?;
        Ok(self.log_count)
    }

    pub fn data_message_counts(&self) -> Result<&HashMap<u16, u64>> {
        self.require_indexed()?;
        Ok(&self.data_message_counts)
    }

    pub fn time_range(&self) -> Result<Option<(u64, u64)>> {
        self.require_indexed()?;
        Ok(self.index.time_range())
    }

    pub fn read_messages(&self, opts: ReadMessagesOptions) -> Result<MessageIter<'_, 's, S>> {
        self.require_indexed()?;
        let start = opts.start.unwrap_or(0);
        let end = opts.end.unwrap_or(u64::MAX);
        let range = self.index.find_range(start, end);

        let indices: Vec<usize> = match range {
            Some((i0, i1)) => {
                let mut v: Vec<usize> = (i0..=i1).collect();
                if opts.reverse {
                    v.reverse();
                }
                v
            }
            None => Vec::new(),
        };

        Ok(MessageIter {
            engine: self,
            reader: ChunkedReader::new(self.source, self.chunk_size),
            codec: RecordCodec::new(false),
            indices,
            cursor: 0,
            msg_ids: opts.msg_ids,
            include_logs: opts.include_logs,
        })
    }
}

fn param_entry_from(key: &Field, raw_value: &[u8]) -> Result<Option<ParamValue>> {
    match &key.field_type {
        FieldType::Builtin(BuiltinType::Int32) => {
            if raw_value.len() < 4 {
                return Err(UlogError::MalformedRecord { offset: 0, tag: b'P', reason: "parameter value too short".into() });
            }
            Ok(Some(ParamValue::I32(i32::from_le_bytes(raw_value[0..4].try_into().unwrap()))))
        }
        FieldType::Builtin(BuiltinType::Float) => {
            if raw_value.len() < 4 {
                return Err(UlogError::MalformedRecord { offset: 0, tag: b'P', reason: "parameter value too short".into() });
            }
            Ok(Some(ParamValue::F32(f32::from_le_bytes(raw_value[0..4].try_into().unwrap()))))
        }
        // Only int32_t/float parameters are accepted; anything else is ignored.
        _ => Ok(None),
    }
}

pub struct MessageIter<'e, 's, S: ByteSource + ?Sized> {
    engine: &'e UlogEngine<'s, S>,
    reader: ChunkedReader<'s, S>,
    codec: RecordCodec,
    indices: Vec<usize>,
    cursor: usize,
    msg_ids: Option<Vec<u16>>,
    include_logs: bool,
}

impl<'e, 's, S: ByteSource + ?Sized> Iterator for MessageIter<'e, 's, S> {
    type Item = Result<DataSectionMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.cursor >= self.indices.len() {
                return None;
            }
            let idx = self.indices[self.cursor];
            self.cursor += 1;
            let entry = self.engine.index.entries()[idx];

            match entry.tag {
                IndexTag::Data(msg_id) => {
                    if let Some(ids) = &self.msg_ids {
                        if !ids.contains(&msg_id) {
                            continue;
                        }
                    }
                }
                IndexTag::Log => {
                    if !self.include_logs {
                        continue;
                    }
                }
                IndexTag::Other => {}
            }

            return Some(self.decode_at(entry.offset));
        }
    }
}

impl<'e, 's, S: ByteSource + ?Sized> MessageIter<'e, 's, S> {
    fn decode_at(&mut self, offset: u64) -> Result<DataSectionMessage> {
        if let Err(e) = self.reader.seek_to(offset) {
            return Err(e);
        }
        let limit = self.reader.size();
        let decoded = self
            .codec
            .decode_next(&mut self.reader, limit)?
            .ok_or_else(|| UlogError::StateViolation(format!("expected a record at indexed offset {offset}")))?;

        match decoded.record {
            Record::AddLogged { multi_id, msg_id, message_name } => {
                Ok(DataSectionMessage::AddLogged { msg_id, multi_id, message_name })
            }
            Record::RemoveLogged { msg_id } => Ok(DataSectionMessage::RemoveLogged { msg_id }),
            Record::Data { msg_id, payload } => {
                let sub = self
                    .engine
                    .subscriptions
                    .get(&msg_id)
                    .ok_or(UlogError::UnknownSubscription { offset: decoded.offset, msg_id })?;
                let def = self
                    .engine
                    .definitions
                    .get(&sub.message_name)
                    .ok_or_else(|| UlogError::UnknownType { type_name: sub.message_name.clone() })?;
                let fields = decode_message(def, &self.engine.definitions, &payload, 0, decoded.offset, decoded.tag)?;
                let timestamp = fields
                    .iter()
                    .find(|(name, _)| name == "timestamp")
                    .and_then(|(_, v)| v.as_u64())
                    .ok_or_else(|| UlogError::MissingTimestamp { message_name: sub.message_name.clone() })?;
                Ok(DataSectionMessage::Data { msg_id, timestamp, fields })
            }
            Record::Log { log_level, timestamp, message } => {
                Ok(DataSectionMessage::Log { timestamp, level: log_level, message })
            }
            Record::LogTagged { log_level, tag, timestamp, message } => {
                Ok(DataSectionMessage::LogTagged { timestamp, level: log_level, tag, message })
            }
            Record::Synchronization => Ok(DataSectionMessage::Synchronization),
            Record::Dropout { duration } => Ok(DataSectionMessage::Dropout { duration }),
            other => Err(UlogError::StateViolation(format!(
                "unexpected record kind at indexed data-section offset {offset}: {other:?}"
            ))),
        }
    }
}
