//! Structured value tree produced from a `Data` record's payload, driven by
//! a bound `MessageDefinition`.

use crate::definitions::{field_size, BuiltinType, DefinitionTable, Field, FieldType, MessageDefinition};
use crate::error::{Result, UlogError};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(String),
    Array(Vec<Value>),
    Struct(Vec<(String, Value)>),
}

impl Value {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U64(v) => Some(*v),
            _ => None,
        }
    }
}

fn decode_scalar(builtin: BuiltinType, bytes: &[u8], offset: usize) -> Value {
    match builtin {
        BuiltinType::Bool => Value::Bool(bytes[offset] != 0),
        BuiltinType::Int8 => Value::I8(bytes[offset] as i8),
        BuiltinType::UInt8 => Value::U8(bytes[offset]),
        BuiltinType::Int16 => Value::I16(i16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap())),
        BuiltinType::UInt16 => Value::U16(u16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap())),
        BuiltinType::Int32 => Value::I32(i32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())),
        BuiltinType::UInt32 => Value::U32(u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())),
        BuiltinType::Int64 => Value::I64(i64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap())),
        BuiltinType::UInt64 => Value::U64(u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap())),
        BuiltinType::Float => Value::F32(f32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())),
        BuiltinType::Double => Value::F64(f64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap())),
        BuiltinType::Char => Value::Str(String::from_utf8_lossy(&bytes[offset..offset + 1]).into_owned()),
    }
}

/// Decodes an Information/Parameter/key value: a simple-typed (non-complex)
/// field whose `arrayLength` is honored exactly as a top-level Data field's
/// would be — a `char` array becomes a string, another builtin array
/// becomes a list of primitives, a bare builtin a single scalar.
pub fn decode_simple_value(field: &Field, bytes: &[u8], offset: u64, tag: u8) -> Result<Value> {
    let builtin = match field.field_type {
        FieldType::Builtin(b) => b,
        FieldType::Complex(_) => {
            return Err(UlogError::UnknownType {
                type_name: field.type_name.clone(),
            })
        }
    };
    let elem_size = builtin.width() as usize;
    let count = field.element_count() as usize;
    let needed = elem_size * count;
    if matches!(builtin, BuiltinType::Char) {
        // char arrays are strings of up to `count` bytes; tolerate a value
        // shorter than the declared length rather than rejecting it.
        let n = count.min(bytes.len());
        let text = String::from_utf8_lossy(&bytes[..n]);
        return Ok(Value::Str(text.trim_end_matches('\0').to_string()));
    }
    if bytes.len() < needed {
        return Err(UlogError::MalformedRecord {
            offset,
            tag,
            reason: format!("value too short for {:?}[{}]", builtin, count),
        });
    }
    if field.array_length.is_some() {
        let items = (0..count).map(|i| decode_scalar(builtin, bytes, i * elem_size)).collect();
        Ok(Value::Array(items))
    } else {
        Ok(decode_scalar(builtin, bytes, 0))
    }
}

/// Walks `def`'s fields in declaration order against `bytes` (the record's
/// full payload, with the definition-specific fields starting at
/// `start_offset`), producing named values for every non-padding field.
/// `record_offset`/`record_tag` identify the enclosing Data record for
/// `MalformedRecord` errors if `bytes` turns out shorter than `def` implies.
pub fn decode_message(
    def: &MessageDefinition,
    defs: &DefinitionTable,
    bytes: &[u8],
    start_offset: usize,
    record_offset: u64,
    record_tag: u8,
) -> Result<Vec<(String, Value)>> {
    let mut out = Vec::with_capacity(def.fields.len());
    let mut offset = start_offset;
    for field in &def.fields {
        let elem_size = field_size(field, defs)? as usize;
        let count = field.element_count() as usize;
        let stride = elem_size * count;

        if field.is_padding() {
            offset += stride;
            continue;
        }

        let value = decode_field(field, defs, bytes, offset, elem_size, count, record_offset, record_tag)?;
        out.push((field.name.clone(), value));
        offset += stride;
    }
    Ok(out)
}

fn bounds_check(bytes: &[u8], offset: usize, stride: usize, record_offset: u64, record_tag: u8) -> Result<()> {
    if offset + stride > bytes.len() {
        return Err(UlogError::MalformedRecord {
            offset: record_offset,
            tag: record_tag,
            reason: format!(
                "field at byte {offset} needs {stride} byte(s) but payload is only {} byte(s)",
                bytes.len()
            ),
        });
    }
    Ok(())
}

fn decode_field(
    field: &Field,
    defs: &DefinitionTable,
    bytes: &[u8],
    offset: usize,
    elem_size: usize,
    count: usize,
    record_offset: u64,
    record_tag: u8,
) -> Result<Value> {
    match &field.field_type {
        FieldType::Complex(name) => {
            let inner_def = defs.get(name).ok_or_else(|| UlogError::UnknownType {
                type_name: name.clone(),
            })?;
            if field.array_length.is_some() {
                let mut items = Vec::with_capacity(count);
                for i in 0..count {
                    let fields =
                        decode_message(inner_def, defs, bytes, offset + i * elem_size, record_offset, record_tag)?;
                    items.push(Value::Struct(fields));
                }
                Ok(Value::Array(items))
            } else {
                let fields = decode_message(inner_def, defs, bytes, offset, record_offset, record_tag)?;
                Ok(Value::Struct(fields))
            }
        }
        FieldType::Builtin(BuiltinType::Char) => {
            // Tolerates a shorter-than-declared char array (truncated string)
            // rather than treating it as malformed.
            let available = bytes.len().saturating_sub(offset);
            let n = count.min(available);
            let raw = &bytes[offset..offset + n];
            let text = String::from_utf8_lossy(raw);
            let trimmed = text.trim_end_matches('\0');
            Ok(Value::Str(trimmed.to_string()))
        }
        FieldType::Builtin(builtin) => {
            let stride = elem_size * count;
            bounds_check(bytes, offset, stride, record_offset, record_tag)?;
            if field.array_length.is_some() {
                let mut items = Vec::with_capacity(count);
                for i in 0..count {
                    items.push(decode_scalar(*builtin, bytes, offset + i * elem_size));
                }
                Ok(Value::Array(items))
            } else {
                Ok(decode_scalar(*builtin, bytes, offset))
            }
        }
    }
}
