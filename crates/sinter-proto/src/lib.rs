//! Wire layer of the sinter FUSE engine.
//!
//! This crate owns everything about the bytes: the fixed request and
//! response headers, the schema document and its compiled, validated form,
//! and the codec that turns message bodies into nested field maps and back.
//! It performs no I/O and knows nothing about handlers; the dispatch engine
//! in `sinter-core` drives it.
//!
//! The schema is declarative: opcodes, structs and per-opcode operations are
//! loaded from a JSON document at startup and drive parsing and formatting
//! without per-opcode code. See [`Schema::load_json`].

mod codec;
mod dirent;
mod document;
mod errors;
mod header;
mod schema;
mod value;

pub use dirent::dirent;
pub use document::{FieldDoc, OperationDoc, SchemaFile, SideDoc, StructDoc, VersionDoc};
pub use errors::{CodecError, HeaderError, SchemaError};
pub use header::{RequestHeader, ResponseHeader};
pub use schema::{Direction, MessageSchema, Operation, Schema};
pub use value::{FieldMap, Value};

/// Node id of the mount root.
pub const ROOT_INODE: u64 = 1;

/// Smallest receive buffer the kernel interface permits, in bytes.
pub const MIN_RECV_BUFFER: usize = 8192;
