//! Compiled schema model.
//!
//! Compilation turns the raw document into an immutable, wire-ordered form:
//! fields are sorted by `(offset, cstringposition)` so iteration order matches
//! wire order even when the source document is unordered, nested struct
//! references are resolved recursively, and every layout invariant is checked
//! once, up front. A schema that compiled successfully can no longer fail
//! structurally; it is shared behind an `Arc` for the life of the process.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use crate::{
    document::{FieldDoc, SchemaFile, SideDoc, StructDoc, VersionDoc},
    errors::SchemaError,
};

/// Wire layout of a single field.
#[derive(Debug, Clone)]
pub(crate) enum FieldKind {
    /// Fixed-size integer, at most 64 bits.
    Int {
        /// Encoded width in bytes (1 to 8).
        bytes: usize,
        /// Two's-complement signed.
        signed: bool,
    },
    /// Fixed-size opaque blob, wider than 64 bits.
    Blob {
        /// Encoded width in bytes.
        bytes: usize,
    },
    /// A single nested struct instance.
    Struct(Arc<MessageSchema>),
    /// Zero or more struct instances, consuming the rest of the message.
    Repeated(Arc<MessageSchema>),
    /// NUL-terminated byte string.
    CString,
    /// Variable-length blob consuming the rest of the message.
    Trailing,
}

impl FieldKind {
    /// Encoded size in bytes, if the field is fixed length.
    fn fixed_size(&self) -> Option<usize> {
        match self {
            FieldKind::Int { bytes, .. } | FieldKind::Blob { bytes } => Some(*bytes),
            FieldKind::Struct(sub) => sub.fixed_size,
            FieldKind::Repeated(_) | FieldKind::CString | FieldKind::Trailing => None,
        }
    }

    /// Whether the field consumes all bytes to the end of the message.
    fn consumes_rest(&self) -> bool {
        match self {
            FieldKind::Trailing | FieldKind::Repeated(_) => true,
            FieldKind::Struct(sub) => sub.consumes_rest,
            _ => false,
        }
    }
}

/// One field in wire order.
#[derive(Debug, Clone)]
pub(crate) struct Field {
    /// Field name, the key handlers see in field maps.
    pub(crate) name: String,
    /// Wire layout.
    pub(crate) kind: FieldKind,
}

/// Compiled field layout for one message body.
///
/// Used both for named structs and for the inline field sets that operation
/// sides carry. [`parse`](MessageSchema::parse) and
/// [`format`](MessageSchema::format) live in the codec module.
#[derive(Debug, Clone)]
pub struct MessageSchema {
    /// Name, for diagnostics (struct name or operation name).
    pub(crate) name: String,
    /// Fields in wire order.
    pub(crate) fields: Vec<Field>,
    /// End-of-struct alignment in bytes (0 for none).
    pub(crate) pad_to: usize,
    /// Total encoded size in bytes, padding included, if fully fixed length.
    pub(crate) fixed_size: Option<usize>,
    /// Whether the last field consumes all bytes to message end.
    pub(crate) consumes_rest: bool,
}

impl MessageSchema {
    /// Diagnostic name of this message shape.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// One direction (request or response) of an operation.
#[derive(Debug, Clone)]
pub enum Direction {
    /// Concrete message described by a schema.
    Message(Arc<MessageSchema>),
    /// No message in this direction. An absent response marks the opcode as
    /// fire-and-forget.
    Absent,
    /// The schema explicitly leaves this direction unimplemented.
    NotImplemented,
}

/// Request and response shapes for one opcode.
#[derive(Debug, Clone)]
pub struct Operation {
    /// Symbolic opcode name from the document.
    pub name: String,
    /// Numeric opcode value.
    pub code: u32,
    /// Request body shape.
    pub request: Direction,
    /// Response body shape.
    pub response: Direction,
}

/// Immutable compiled schema for one protocol version.
#[derive(Debug, Clone)]
pub struct Schema {
    opcode_values: BTreeMap<String, u32>,
    operations: HashMap<u32, Operation>,
}

impl Schema {
    /// Parse a JSON schema file and compile one version out of it.
    ///
    /// # Errors
    ///
    /// - [`SchemaError::Document`] if the text is not a schema file
    /// - [`SchemaError::MissingVersion`] if `version` is not in the file
    /// - any compilation error from [`Self::compile`]
    pub fn load_json(text: &str, version: &str) -> Result<Self, SchemaError> {
        let file = SchemaFile::from_json(text)?;
        let doc = file
            .version(version)
            .ok_or_else(|| SchemaError::MissingVersion(version.to_string()))?;
        Self::compile(doc)
    }

    /// Compile a versioned document, validating every layout invariant.
    ///
    /// Every opcode gets an [`Operation`]; opcodes without an `operations`
    /// entry get absent request and response sides. All structs are compiled
    /// even when no operation references them, so a loaded schema is known
    /// valid in full.
    ///
    /// # Errors
    ///
    /// Any [`SchemaError`]; a schema rejected here must abort initialization.
    pub fn compile(doc: &VersionDoc) -> Result<Self, SchemaError> {
        let mut names_by_value: HashMap<u32, &str> = HashMap::new();
        for (name, value) in &doc.opcodes {
            if let Some(first) = names_by_value.insert(*value, name) {
                return Err(SchemaError::DuplicateOpcode {
                    value: *value,
                    first: first.to_string(),
                    second: name.clone(),
                });
            }
        }

        for name in doc.operations.keys() {
            if !doc.opcodes.contains_key(name) {
                return Err(SchemaError::UnknownOperation(name.clone()));
            }
        }

        let mut compiler =
            Compiler { structs: &doc.structs, compiled: HashMap::new(), stack: Vec::new() };

        for name in doc.structs.keys() {
            compiler.resolve(name, name)?;
        }

        let mut operations = HashMap::with_capacity(doc.opcodes.len());
        for (name, value) in &doc.opcodes {
            let op_doc = doc.operations.get(name);
            let request = compiler.side(name, op_doc.and_then(|op| op.request.as_ref()))?;
            let response = compiler.side(name, op_doc.and_then(|op| op.response.as_ref()))?;
            operations.insert(
                *value,
                Operation { name: name.clone(), code: *value, request, response },
            );
        }

        Ok(Self { opcode_values: doc.opcodes.clone(), operations })
    }

    /// Numeric value of a symbolic opcode name.
    #[must_use]
    pub fn opcode(&self, name: &str) -> Option<u32> {
        self.opcode_values.get(name).copied()
    }

    /// Symbolic name of a numeric opcode.
    #[must_use]
    pub fn opcode_name(&self, code: u32) -> Option<&str> {
        self.operations.get(&code).map(|op| op.name.as_str())
    }

    /// The operation for a numeric opcode.
    #[must_use]
    pub fn operation(&self, code: u32) -> Option<&Operation> {
        self.operations.get(&code)
    }

    /// All opcodes, as `(name, value)` pairs in name order.
    pub fn opcodes(&self) -> impl Iterator<Item = (&str, u32)> {
        self.opcode_values.iter().map(|(name, value)| (name.as_str(), *value))
    }
}

/// Struct resolution state: memoized compiles plus a stack for cycle checks.
struct Compiler<'a> {
    structs: &'a BTreeMap<String, StructDoc>,
    compiled: HashMap<String, Arc<MessageSchema>>,
    stack: Vec<String>,
}

impl Compiler<'_> {
    fn side(&mut self, operation: &str, doc: Option<&SideDoc>) -> Result<Direction, SchemaError> {
        match doc {
            None => Ok(Direction::Absent),
            Some(SideDoc::Sentinel(-1)) => Ok(Direction::NotImplemented),
            Some(SideDoc::Sentinel(value)) => Err(SchemaError::BadSentinel {
                operation: operation.to_string(),
                value: *value,
            }),
            Some(SideDoc::Fields(fields)) => {
                Ok(Direction::Message(Arc::new(self.compile_struct(operation, fields, None)?)))
            }
        }
    }

    fn resolve(&mut self, field: &str, name: &str) -> Result<Arc<MessageSchema>, SchemaError> {
        if let Some(done) = self.compiled.get(name) {
            return Ok(Arc::clone(done));
        }
        if self.stack.iter().any(|seen| seen == name) {
            return Err(SchemaError::RecursiveStruct(name.to_string()));
        }
        let doc = self.structs.get(name).ok_or_else(|| SchemaError::UnknownStruct {
            field: field.to_string(),
            name: name.to_string(),
        })?;

        self.stack.push(name.to_string());
        let schema = self.compile_struct(name, &doc.fields, doc.pad_to)?;
        self.stack.pop();

        let schema = Arc::new(schema);
        self.compiled.insert(name.to_string(), Arc::clone(&schema));
        Ok(schema)
    }

    fn compile_struct(
        &mut self,
        name: &str,
        fields: &BTreeMap<String, FieldDoc>,
        pad_to: Option<u32>,
    ) -> Result<MessageSchema, SchemaError> {
        let pad_to = match pad_to {
            None | Some(0) => 0,
            Some(bits) if bits % 8 == 0 => (bits / 8) as usize,
            Some(bits) => {
                return Err(SchemaError::BadPadding { name: name.to_string(), pad_to: bits });
            }
        };

        // Wire order: fixed fields by offset, then C-strings by position,
        // then the consume-rest tail.
        let mut ordered: Vec<(&String, &FieldDoc)> = fields.iter().collect();
        ordered.sort_by_key(|(_, doc)| {
            (
                doc.offset.map_or(u64::MAX, u64::from),
                doc.cstringposition.map_or(u64::MAX, u64::from),
            )
        });

        let mut compiled = Vec::with_capacity(ordered.len());
        // Byte cursor over the fixed prefix; None once the variable-length
        // region begins.
        let mut cursor = Some(0usize);
        let mut consume_rest: Option<&str> = None;

        for (field_name, doc) in ordered {
            if let Some(previous) = consume_rest {
                return Err(SchemaError::ConsumeRestNotLast(previous.to_string()));
            }

            let kind = self.field_kind(field_name, doc)?;

            if let Some(bits) = doc.offset {
                if bits % 8 != 0 {
                    return Err(SchemaError::MisalignedOffset {
                        field: field_name.clone(),
                        offset: bits,
                    });
                }
                let declared = (bits / 8) as usize;
                if let Some(computed) = cursor {
                    if computed != declared {
                        return Err(SchemaError::LayoutGap {
                            field: field_name.clone(),
                            declared,
                            computed,
                        });
                    }
                }
            }

            cursor = match kind.fixed_size() {
                Some(size) => match cursor {
                    Some(position) => Some(position + size),
                    None => return Err(SchemaError::FixedAfterVariable(field_name.clone())),
                },
                None => None,
            };

            if kind.consumes_rest() {
                consume_rest = Some(field_name);
            }

            compiled.push(Field { name: field_name.clone(), kind });
        }

        let fixed_size = cursor
            .map(|size| if pad_to == 0 { size } else { size.next_multiple_of(pad_to) });

        let schema = MessageSchema {
            name: name.to_string(),
            fields: compiled,
            pad_to,
            fixed_size,
            consumes_rest: consume_rest.is_some(),
        };
        check_collisions(&schema)?;
        Ok(schema)
    }

    fn field_kind(&mut self, field_name: &str, doc: &FieldDoc) -> Result<FieldKind, SchemaError> {
        if let Some(struct_name) = &doc.struct_name {
            let sub = self.resolve(field_name, struct_name)?;
            return Ok(if doc.zero_or_more {
                FieldKind::Repeated(sub)
            } else {
                FieldKind::Struct(sub)
            });
        }
        if let Some(bits) = doc.size {
            if bits == 0 || bits % 8 != 0 {
                return Err(SchemaError::BadSize { field: field_name.to_string(), size: bits });
            }
            let bytes = (bits / 8) as usize;
            return Ok(if bits <= 64 {
                FieldKind::Int { bytes, signed: doc.signed }
            } else {
                FieldKind::Blob { bytes }
            });
        }
        if doc.cstringposition.is_some() {
            return Ok(FieldKind::CString);
        }
        Ok(FieldKind::Trailing)
    }
}

/// The flattened name projection must be collision free: a struct's own field
/// names plus every single-instance nested struct's projection share one
/// namespace. Repeated substructs stay sub-schemas and are checked on their
/// own.
fn check_collisions(schema: &MessageSchema) -> Result<(), SchemaError> {
    fn walk<'a>(
        schema: &'a MessageSchema,
        seen: &mut HashSet<&'a str>,
    ) -> Result<(), SchemaError> {
        for field in &schema.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::NameCollision(field.name.clone()));
            }
            if let FieldKind::Struct(sub) = &field.kind {
                walk(sub, seen)?;
            }
        }
        Ok(())
    }

    let mut seen = HashSet::new();
    walk(schema, &mut seen)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(body: &str) -> Result<Schema, SchemaError> {
        Schema::load_json(&format!(r#"{{"v1": {body}}}"#), "v1")
    }

    #[test]
    fn compiles_and_resolves_opcodes() {
        let schema = compile(
            r#"{
                "opcodes": {"OP_A": 1, "OP_B": 2},
                "structs": {},
                "operations": {
                    "OP_A": {
                        "request": {"fh": {"offset": 0, "size": 64}},
                        "response": {}
                    }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(schema.opcode("OP_A"), Some(1));
        assert_eq!(schema.opcode_name(2), Some("OP_B"));
        assert!(schema.opcode("OP_MISSING").is_none());

        let op = schema.operation(1).unwrap();
        assert!(matches!(op.request, Direction::Message(_)));
        assert!(matches!(op.response, Direction::Message(_)));

        // Opcodes with no operations entry have no message in either direction.
        let bare = schema.operation(2).unwrap();
        assert!(matches!(bare.request, Direction::Absent));
        assert!(matches!(bare.response, Direction::Absent));
    }

    #[test]
    fn sentinel_marks_not_implemented() {
        let schema = compile(
            r#"{
                "opcodes": {"OP_A": 1},
                "operations": {"OP_A": {"request": -1}}
            }"#,
        )
        .unwrap();
        assert!(matches!(schema.operation(1).unwrap().request, Direction::NotImplemented));
    }

    #[test]
    fn rejects_unknown_sentinel() {
        let err = compile(
            r#"{
                "opcodes": {"OP_A": 1},
                "operations": {"OP_A": {"request": -2}}
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::BadSentinel { value: -2, .. }));
    }

    #[test]
    fn rejects_duplicate_opcode_values() {
        let err = compile(r#"{"opcodes": {"OP_A": 1, "OP_B": 1}}"#).unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateOpcode { value: 1, .. }));
    }

    #[test]
    fn rejects_operation_without_opcode() {
        let err = compile(
            r#"{
                "opcodes": {"OP_A": 1},
                "operations": {"OP_MISSING": {}}
            }"#,
        )
        .unwrap_err();
        assert_eq!(err, SchemaError::UnknownOperation("OP_MISSING".to_string()));
    }

    #[test]
    fn rejects_layout_gap() {
        let err = compile(
            r#"{
                "opcodes": {"OP_A": 1},
                "operations": {"OP_A": {"request": {
                    "a": {"offset": 0, "size": 32},
                    "b": {"offset": 64, "size": 32}
                }}}
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::LayoutGap { declared: 8, computed: 4, .. }));
    }

    #[test]
    fn rejects_misaligned_offset() {
        let err = compile(
            r#"{
                "opcodes": {"OP_A": 1},
                "operations": {"OP_A": {"request": {"a": {"offset": 4, "size": 32}}}}
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::MisalignedOffset { offset: 4, .. }));
    }

    #[test]
    fn rejects_sub_byte_size() {
        let err = compile(
            r#"{
                "opcodes": {"OP_A": 1},
                "operations": {"OP_A": {"request": {"a": {"offset": 0, "size": 12}}}}
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::BadSize { size: 12, .. }));
    }

    #[test]
    fn rejects_consume_rest_before_other_fields() {
        // The trailing blob sorts at (infinity, infinity); a C-string at
        // (infinity, 0) lands before it, so the repeated struct placed at
        // position 0 of the variable region must be rejected.
        let err = compile(
            r#"{
                "opcodes": {"OP_A": 1},
                "structs": {
                    "item": {"fields": {"v": {"offset": 0, "size": 64}}}
                },
                "operations": {"OP_A": {"response": {
                    "items": {"struct": "item", "zero_or_more": true, "cstringposition": 0},
                    "rest": {}
                }}}
            }"#,
        )
        .unwrap_err();
        assert_eq!(err, SchemaError::ConsumeRestNotLast("items".to_string()));
    }

    #[test]
    fn rejects_fixed_field_after_variable() {
        let err = compile(
            r#"{
                "opcodes": {"OP_A": 1},
                "operations": {"OP_A": {"request": {
                    "name": {"cstringposition": 0},
                    "late": {"size": 32}
                }}}
            }"#,
        )
        .unwrap_err();
        assert_eq!(err, SchemaError::FixedAfterVariable("late".to_string()));
    }

    #[test]
    fn rejects_unknown_struct() {
        let err = compile(
            r#"{
                "opcodes": {"OP_A": 1},
                "operations": {"OP_A": {"request": {"a": {"offset": 0, "struct": "nope"}}}}
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownStruct { .. }));
    }

    #[test]
    fn rejects_struct_cycle() {
        let err = compile(
            r#"{
                "opcodes": {"OP_A": 1},
                "structs": {
                    "a": {"fields": {"b": {"offset": 0, "struct": "b"}}},
                    "b": {"fields": {"a": {"offset": 0, "struct": "a"}}}
                }
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::RecursiveStruct(_)));
    }

    #[test]
    fn rejects_bad_pad_to() {
        let err = compile(
            r#"{
                "opcodes": {"OP_A": 1},
                "structs": {
                    "a": {"fields": {"v": {"offset": 0, "size": 32}}, "pad_to": 12}
                }
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::BadPadding { pad_to: 12, .. }));
    }

    #[test]
    fn rejects_flattened_name_collision() {
        let err = compile(
            r#"{
                "opcodes": {"OP_A": 1},
                "structs": {
                    "inner": {"fields": {"size": {"offset": 0, "size": 64}}}
                },
                "operations": {"OP_A": {"response": {
                    "size": {"offset": 0, "size": 64},
                    "nested": {"offset": 64, "struct": "inner"}
                }}}
            }"#,
        )
        .unwrap_err();
        assert_eq!(err, SchemaError::NameCollision("size".to_string()));
    }

    #[test]
    fn nested_struct_offsets_accumulate() {
        // inner is 12 bytes; outer declares the field after it at byte 16,
        // which only works because inner pads to 8.
        let schema = compile(
            r#"{
                "opcodes": {"OP_A": 1},
                "structs": {
                    "inner": {
                        "fields": {
                            "a": {"offset": 0, "size": 64},
                            "b": {"offset": 64, "size": 32}
                        },
                        "pad_to": 64
                    }
                },
                "operations": {"OP_A": {"response": {
                    "head": {"offset": 0, "struct": "inner"},
                    "tail": {"offset": 128, "size": 32}
                }}}
            }"#,
        );
        assert!(schema.is_ok());
    }
}
