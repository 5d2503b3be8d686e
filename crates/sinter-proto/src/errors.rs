//! Error types for the wire layer.
//!
//! Three families, matching where in the pipeline a failure can surface:
//! header framing ([`HeaderError`]), schema compilation ([`SchemaError`],
//! load time only) and message coding ([`CodecError`], per request). Schema
//! errors abort initialization; codec errors are turned into errno replies by
//! the dispatcher so the kernel always sees a well-formed response.

use thiserror::Error;

use crate::header::RequestHeader;

/// Errors while framing the fixed wire headers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    /// Buffer too short to hold the header.
    #[error("header needs {expected} bytes, got {actual}")]
    Truncated {
        /// Required header size in bytes
        expected: usize,
        /// Bytes actually available
        actual: usize,
    },

    /// The frame length field is smaller than the header itself.
    #[error("frame length {0} is shorter than a request header ({size} bytes)", size = RequestHeader::SIZE)]
    BadLength(u32),
}

/// Schema document violations detected at load time.
///
/// Any of these aborts initialization; a schema that loaded successfully is
/// immutable and can no longer fail structurally.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// The document is not valid JSON of the expected shape.
    #[error("schema document rejected: {0}")]
    Document(String),

    /// The requested protocol version tag is not in the document.
    #[error("protocol version {0} not present in schema document")]
    MissingVersion(String),

    /// Two opcode names share one numeric value.
    #[error("opcode value {value} is claimed by both {first} and {second}")]
    DuplicateOpcode {
        /// The shared numeric code
        value: u32,
        /// First claimant
        first: String,
        /// Second claimant
        second: String,
    },

    /// An operation entry names an opcode the document does not define.
    #[error("operation {0} does not name a known opcode")]
    UnknownOperation(String),

    /// An operation side carries a sentinel other than `-1`.
    #[error("operation {operation}: sentinel {value} is not recognized")]
    BadSentinel {
        /// Operation name
        operation: String,
        /// The offending sentinel value
        value: i64,
    },

    /// A field references a struct the document does not define.
    #[error("field {field} references unknown struct {name}")]
    UnknownStruct {
        /// Referencing field
        field: String,
        /// Missing struct name
        name: String,
    },

    /// Struct references form a cycle.
    #[error("struct {0} is part of a reference cycle")]
    RecursiveStruct(String),

    /// A field offset is not a whole number of bytes.
    #[error("field {field}: offset {offset} bits is not byte aligned")]
    MisalignedOffset {
        /// Offending field
        field: String,
        /// Declared offset in bits
        offset: u32,
    },

    /// A field size is zero or not a whole number of bytes.
    #[error("field {field}: size {size} bits is not a whole, positive number of bytes")]
    BadSize {
        /// Offending field
        field: String,
        /// Declared size in bits
        size: u32,
    },

    /// A declared offset leaves a gap or overlaps the previous field.
    #[error("field {field}: declared offset {declared} does not match computed offset {computed} (bytes)")]
    LayoutGap {
        /// Offending field
        field: String,
        /// Offset the document declares, in bytes
        declared: usize,
        /// Offset implied by the preceding fields, in bytes
        computed: usize,
    },

    /// A fixed-length field appears after the variable-length region began.
    #[error("field {0}: fixed-length field follows a variable-length one")]
    FixedAfterVariable(String),

    /// A consume-rest field (trailing blob or repeated struct) is not last.
    #[error("field {0}: consume-rest field is not last in its struct")]
    ConsumeRestNotLast(String),

    /// A struct's `pad_to` is not a whole number of bytes.
    #[error("struct {name}: pad_to {pad_to} bits is not a whole number of bytes")]
    BadPadding {
        /// Struct name
        name: String,
        /// Declared alignment in bits
        pad_to: u32,
    },

    /// Two fields collide in the flattened name projection.
    #[error("flattened field name {0} collides")]
    NameCollision(String),
}

/// Per-message coding failures.
///
/// Parse failures and format failures are both reported to the kernel as
/// `-EIO` by the dispatcher, except [`CodecError::NotImplementedOp`] which
/// maps to `-ENOSYS`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The message body ended inside a field.
    #[error("message body ended inside field {0}")]
    ShortBody(String),

    /// A C-string field has no NUL terminator.
    #[error("no NUL terminator for C-string field {0}")]
    BadCString(String),

    /// The parser did not consume the whole body.
    #[error("parse consumed {consumed} of {total} body bytes")]
    IncompleteParse {
        /// Bytes consumed when the field list was exhausted
        consumed: usize,
        /// Total body length
        total: usize,
    },

    /// An integer value does not fit its declared field width.
    #[error("value for field {field} does not fit in {bits} bits")]
    FieldOverflow {
        /// Offending field
        field: String,
        /// Declared width in bits
        bits: usize,
    },

    /// A byte value's length does not match the declared fixed size.
    #[error("field {field} expects exactly {expected} bytes, got {actual}")]
    FieldSizeMismatch {
        /// Offending field
        field: String,
        /// Declared size in bytes
        expected: usize,
        /// Length of the supplied value
        actual: usize,
    },

    /// A field was given a value of the wrong kind.
    #[error("field {field} cannot be formatted from a {kind} value")]
    BadFieldType {
        /// Offending field
        field: String,
        /// Kind of the supplied value
        kind: &'static str,
    },

    /// The schema marks this direction of the opcode as not implemented.
    #[error("opcode {0} is marked not implemented in this direction")]
    NotImplementedOp(String),

    /// The opcode has no message in this direction.
    #[error("opcode {0} has no message in this direction")]
    UnsupportedDirection(String),
}
