//! Format-string grammar and the recursive, memoized size resolver.
//!
//! ```text
//! message := name ":" field ( ";" field )* ";"?
//! field   := type ( "[" uint "]" )? " " name
//! ```

use std::cell::Cell;
use std::collections::HashMap;

use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::{char, digit1, space1};
use nom::combinator::{all_consuming, map, map_res, opt};
use nom::sequence::{delimited, pair, preceded, tuple};
use nom::IResult;

use crate::error::{Result, UlogError};

/// The twelve builtin primitive types. Everything else is a complex
/// (struct) field referencing another `MessageDefinition` by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinType {
    Bool,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    Char,
}

impl BuiltinType {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "bool" => BuiltinType::Bool,
            "int8_t" => BuiltinType::Int8,
            "uint8_t" => BuiltinType::UInt8,
            "int16_t" => BuiltinType::Int16,
            "uint16_t" => BuiltinType::UInt16,
            "int32_t" => BuiltinType::Int32,
            "uint32_t" => BuiltinType::UInt32,
            "int64_t" => BuiltinType::Int64,
            "uint64_t" => BuiltinType::UInt64,
            "float" => BuiltinType::Float,
            "double" => BuiltinType::Double,
            "char" => BuiltinType::Char,
            _ => return None,
        })
    }

    /// Width in bytes of a single element of this type.
    pub fn width(self) -> u32 {
        match self {
            BuiltinType::Bool | BuiltinType::Int8 | BuiltinType::UInt8 | BuiltinType::Char => 1,
            BuiltinType::Int16 | BuiltinType::UInt16 => 2,
            BuiltinType::Int32 | BuiltinType::UInt32 | BuiltinType::Float => 4,
            BuiltinType::Int64 | BuiltinType::UInt64 | BuiltinType::Double => 8,
        }
    }
}

/// A field's type: either one of the twelve builtins, or a reference to
/// another message definition by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    Builtin(BuiltinType),
    Complex(String),
}

#[derive(Debug, Clone)]
pub struct Field {
    pub type_name: String,
    pub field_type: FieldType,
    pub name: String,
    pub array_length: Option<u32>,
    pub is_complex: bool,
    size_cache: Cell<Option<u32>>,
}

impl Field {
    pub fn is_padding(&self) -> bool {
        self.name.starts_with('_')
    }

    /// Number of elements this field occupies (1 for a scalar field).
    pub fn element_count(&self) -> u32 {
        self.array_length.unwrap_or(1)
    }
}

impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        self.type_name == other.type_name
            && self.name == other.name
            && self.array_length == other.array_length
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageDefinition {
    pub name: String,
    pub fields: Vec<Field>,
}

pub type DefinitionTable = HashMap<String, MessageDefinition>;

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn ident(input: &str) -> IResult<&str, &str> {
    take_while1(is_ident_char)(input)
}

fn array_length(input: &str) -> IResult<&str, u32> {
    delimited(
        char('['),
        map_res(digit1, str::parse::<u32>),
        char(']'),
    )(input)
}

/// `type[len]? name`, trimmed of surrounding whitespace by the caller.
fn field_grammar(input: &str) -> IResult<&str, (&str, Option<u32>, &str)> {
    all_consuming(map(
        tuple((ident, opt(array_length), preceded(space1, ident))),
        |(ty, len, name)| (ty, len, name),
    ))(input)
}

/// Parses a single `type[len]? name` field declaration.
pub fn parse_field_definition(text: &str) -> Result<Field> {
    let trimmed = text.trim();
    let (_, (type_name, array_length, name)) =
        field_grammar(trimmed).map_err(|e| UlogError::BadFormat {
            text: trimmed.to_string(),
            reason: e.to_string(),
        })?;

    if let Some(0) = array_length {
        return Err(UlogError::BadFormat {
            text: trimmed.to_string(),
            reason: "array length must be positive".to_string(),
        });
    }

    let field_type = match BuiltinType::from_name(type_name) {
        Some(b) => FieldType::Builtin(b),
        None => FieldType::Complex(type_name.to_string()),
    };
    let is_complex = matches!(field_type, FieldType::Complex(_));

    Ok(Field {
        type_name: type_name.to_string(),
        field_type,
        name: name.to_string(),
        array_length,
        is_complex,
        size_cache: Cell::new(None),
    })
}

fn name_and_rest(input: &str) -> IResult<&str, (&str, &str)> {
    pair(take_while1(|c| c != ':'), preceded(tag(":"), nom::combinator::rest))(input)
}

/// Parses a whole `name:field;field;...` format string.
pub fn parse_message_definition(text: &str) -> Result<MessageDefinition> {
    let (_, (name, rest)) = name_and_rest(text).map_err(|_| UlogError::BadFormat {
        text: text.to_string(),
        reason: "missing ':' separating name from fields".to_string(),
    })?;

    let name = name.trim();
    if name.is_empty() {
        return Err(UlogError::BadFormat {
            text: text.to_string(),
            reason: "empty message name".to_string(),
        });
    }

    let mut fields = Vec::new();
    for chunk in rest.split(';') {
        let chunk = chunk.trim();
        if chunk.is_empty() {
            // Tolerates a trailing ';' and empty fields between separators.
            continue;
        }
        fields.push(parse_field_definition(chunk)?);
    }

    Ok(MessageDefinition {
        name: name.to_string(),
        fields,
    })
}

/// Per-element size of a field, memoized. Complex fields resolve
/// recursively through `defs`; a missing reference is fatal.
pub fn field_size(field: &Field, defs: &DefinitionTable) -> Result<u32> {
    if let Some(cached) = field.size_cache.get() {
        return Ok(cached);
    }
    let size = match &field.field_type {
        FieldType::Builtin(b) => b.width(),
        FieldType::Complex(name) => {
            let def = defs.get(name).ok_or_else(|| UlogError::UnknownType {
                type_name: name.clone(),
            })?;
            message_size(def, defs)?
        }
    };
    field.size_cache.set(Some(size));
    Ok(size)
}

/// Total byte size of a message: sum of each field's per-element size times
/// its array length (1 for scalars), padding fields included.
pub fn message_size(def: &MessageDefinition, defs: &DefinitionTable) -> Result<u32> {
    let mut total = 0u32;
    for field in &def.fields {
        total += field_size(field, defs)? * field.element_count();
    }
    Ok(total)
}
