//! Handler interface: per-opcode async functions producing replies.
//!
//! A filesystem is a table of handlers keyed by symbolic opcode name. Each
//! handler receives the request header and the parsed field map and returns
//! `(errno, response)`, with errno as a positive POSIX number (zero for
//! success). The engine does not interpret opcodes itself; what a lookup
//! means is entirely the handler's business.

use std::{collections::BTreeMap, future::Future, pin::Pin, sync::Arc};

use bytes::Bytes;
use nix::errno::Errno;
use sinter_proto::{FieldMap, RequestHeader};
use thiserror::Error;

/// Controlled handler failure carrying a positive POSIX errno.
///
/// The dispatcher turns this into an errno-only reply; the transport negates
/// the value for the wire.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("handler failed with errno {errno}")]
pub struct FuseError {
    /// Positive POSIX errno.
    pub errno: i32,
}

impl FuseError {
    /// Controlled failure with the given positive errno.
    #[must_use]
    pub fn new(errno: i32) -> Self {
        Self { errno }
    }
}

impl From<Errno> for FuseError {
    fn from(errno: Errno) -> Self {
        Self { errno: errno as i32 }
    }
}

/// A handler's reply body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Field map formatted through the opcode's response schema.
    Fields(FieldMap),
    /// Pre-encoded bytes, passed to the wire verbatim.
    Raw(Bytes),
    /// Suppress the reply frame entirely (fire-and-forget opcodes).
    NoReply,
}

/// Boxed future returned by a handler invocation.
pub type HandlerFuture =
    Pin<Box<dyn Future<Output = Result<(i32, Response), FuseError>> + Send>>;

/// Shared async handler: `(header, parsed request) -> (errno, response)`.
pub type Handler = Arc<dyn Fn(RequestHeader, FieldMap) -> HandlerFuture + Send + Sync>;

/// Table of handlers keyed by symbolic opcode name.
///
/// Names are resolved to numeric opcodes against the schema when the
/// dispatcher is built, so the table itself stays schema independent.
#[derive(Default, Clone)]
pub struct HandlerTable {
    by_name: BTreeMap<String, Handler>,
}

impl HandlerTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for the opcode named `name`.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(RequestHeader, FieldMap) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(i32, Response), FuseError>> + Send + 'static,
    {
        self.by_name
            .insert(name.into(), Arc::new(move |header, request| Box::pin(handler(header, request))));
    }

    /// Register the do-nothing handler: success with default field values.
    pub fn register_nop(&mut self, name: impl Into<String>) {
        self.register(name, nop);
    }

    /// Register the silent handler: success without any reply frame.
    pub fn register_no_reply(&mut self, name: impl Into<String>) {
        self.register(name, no_reply);
    }

    /// Handler registered under `name`, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Handler> {
        self.by_name.get(name)
    }

    /// Iterate registered handlers in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Handler)> {
        self.by_name.iter().map(|(name, handler)| (name.as_str(), handler))
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("opcodes", &self.by_name.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Do nothing: succeed with an empty field map, formatted to default bytes.
pub async fn nop(_header: RequestHeader, _request: FieldMap) -> Result<(i32, Response), FuseError> {
    Ok((0, Response::Fields(FieldMap::new())))
}

/// Do nothing, not even reply: for fire-and-forget opcodes like FORGET.
pub async fn no_reply(
    _header: RequestHeader,
    _request: FieldMap,
) -> Result<(i32, Response), FuseError> {
    Ok((0, Response::NoReply))
}
