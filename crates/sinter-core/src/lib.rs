//! Kernel-facing engine of the sinter FUSE framework.
//!
//! Everything between the schema codec and a mounted filesystem lives here:
//! the device transport with its framed receive and atomic vectored send,
//! the handler interface, the dispatcher that routes each request to its
//! handler and frames the reply, and the session runtime that ties the
//! blocking I/O loops to the async dispatcher.
//!
//! The engine is a faithful pipe: it never interprets opcodes, keeps no
//! inode table and imposes no ordering between requests beyond what the
//! queues preserve. Semantics belong to the handlers.

mod dispatch;
mod handler;
mod session;
mod transport;

pub use dispatch::{DispatchState, Dispatcher, Reply, ReplyBody};
pub use handler::{FuseError, Handler, HandlerFuture, HandlerTable, Response, no_reply, nop};
pub use session::{Session, SessionConfig, SessionHandle};
pub use transport::{DeviceReader, DeviceWriter, FuseDevice, TransportError};
