//! Daemon library: schema loading and the built-in hello filesystem.
//!
//! The binary in `main.rs` wires these into a running [`sinter_core::Session`]
//! over a descriptor handed in by the mount helper.

pub mod hello;

use std::path::{Path, PathBuf};

use sinter_core::TransportError;
use sinter_proto::{Schema, SchemaError};
use thiserror::Error;

/// Daemon-level failures.
#[derive(Error, Debug)]
pub enum DaemonError {
    /// The schema document could not be read from disk.
    #[error("could not read schema document {path}: {source}")]
    SchemaFile {
        /// Path that was tried
        path: PathBuf,
        /// Underlying read failure
        source: std::io::Error,
    },

    /// The schema document failed validation.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// The device transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Load a schema document from disk and compile one protocol version.
///
/// # Errors
///
/// - [`DaemonError::SchemaFile`] if the file cannot be read
/// - [`DaemonError::Schema`] if the document fails validation
pub fn load_schema(path: &Path, version: &str) -> Result<Schema, DaemonError> {
    let text = std::fs::read_to_string(path)
        .map_err(|source| DaemonError::SchemaFile { path: path.to_path_buf(), source })?;
    Ok(Schema::load_json(&text, version)?)
}
