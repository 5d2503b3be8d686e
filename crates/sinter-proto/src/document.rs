//! On-disk schema document model.
//!
//! The schema ships as a JSON object keyed by protocol version tag
//! (`"v7.31"`). Each version describes opcodes, structs and per-opcode
//! operations; offsets and sizes are given in bits. These types mirror the
//! document verbatim; validation and flattening happen when the document is
//! compiled into a [`crate::Schema`].

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::errors::SchemaError;

/// A whole schema file: version tag to versioned document.
#[derive(Debug, Clone, Deserialize)]
pub struct SchemaFile(BTreeMap<String, VersionDoc>);

impl SchemaFile {
    /// Parse a schema file from JSON text.
    ///
    /// # Errors
    ///
    /// - [`SchemaError::Document`] if the text is not JSON of this shape
    pub fn from_json(text: &str) -> Result<Self, SchemaError> {
        serde_json::from_str(text).map_err(|err| SchemaError::Document(err.to_string()))
    }

    /// The document for one protocol version, if present.
    #[must_use]
    pub fn version(&self, tag: &str) -> Option<&VersionDoc> {
        self.0.get(tag)
    }

    /// Version tags present in the file.
    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// One protocol version: opcodes, structs and operations.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionDoc {
    /// Symbolic opcode name to numeric code.
    pub opcodes: BTreeMap<String, u32>,
    /// Reusable struct definitions, by name.
    #[serde(default)]
    pub structs: BTreeMap<String, StructDoc>,
    /// Request/response message shapes, by opcode name.
    #[serde(default)]
    pub operations: BTreeMap<String, OperationDoc>,
}

/// A named struct definition.
#[derive(Debug, Clone, Deserialize)]
pub struct StructDoc {
    /// Fields of the struct, by name.
    pub fields: BTreeMap<String, FieldDoc>,
    /// End-of-struct alignment in bits, if any.
    #[serde(default)]
    pub pad_to: Option<u32>,
}

/// Message shapes for one opcode.
///
/// A missing side means the opcode has no message in that direction; a
/// missing `response` in particular marks a fire-and-forget opcode.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationDoc {
    /// Request body shape.
    #[serde(default)]
    pub request: Option<SideDoc>,
    /// Response body shape.
    #[serde(default)]
    pub response: Option<SideDoc>,
}

/// One direction of an operation.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SideDoc {
    /// The sentinel `-1`: the schema explicitly leaves this side
    /// unimplemented.
    Sentinel(i64),
    /// Inline field set describing the message body.
    Fields(BTreeMap<String, FieldDoc>),
}

/// One field of a struct or inline message body.
///
/// `offset` may be absent for variable-length fields; `size` absent means
/// variable length (a C-string when `cstringposition` is set, otherwise a
/// trailing blob consuming the rest of the message).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FieldDoc {
    /// Offset from the struct start, in bits.
    #[serde(default)]
    pub offset: Option<u32>,
    /// Field size in bits.
    #[serde(default)]
    pub size: Option<u32>,
    /// Two's-complement signed integer field.
    #[serde(default)]
    pub signed: bool,
    /// The field is an instance of this named struct.
    #[serde(rename = "struct", default)]
    pub struct_name: Option<String>,
    /// The field repeats zero or more struct instances to message end.
    #[serde(default)]
    pub zero_or_more: bool,
    /// Order among consecutive NUL-terminated strings.
    #[serde(default)]
    pub cstringposition: Option<u32>,
    /// The field is ABI padding.
    #[serde(default)]
    pub padding: bool,
}
