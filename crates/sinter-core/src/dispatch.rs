//! Request dispatch: opcode routing, handler supervision, reply framing.
//!
//! The dispatcher pulls `(header, body)` tuples off the inbound queue, parses
//! the body with the opcode's request schema, runs the handler on its own
//! task so requests interleave freely, formats the result and pushes the
//! framed reply onto the outbound queue. The kernel pairs replies to
//! requests by the echoed unique tag, so completion order does not matter.
//!
//! Anything recoverable as a per-request failure becomes an errno reply; the
//! kernel always sees a well-formed response.

use std::{collections::HashMap, sync::Arc};

use bytes::Bytes;
use nix::errno::Errno;
use sinter_proto::{CodecError, RequestHeader, Schema};
use tokio::{
    sync::{mpsc, watch},
    task::JoinSet,
};

use crate::handler::{Handler, HandlerTable, Response};

/// One reply frame awaiting transmission.
#[derive(Debug, Clone)]
pub struct Reply {
    /// Header of the request being answered; its unique tag is echoed.
    pub header: RequestHeader,
    /// Positive errno, zero on success. Negated by the transport.
    pub errno: i32,
    /// Reply body.
    pub body: ReplyBody,
}

/// Body of an outbound reply frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyBody {
    /// Encoded bytes following the 16-byte response header.
    Bytes(Bytes),
    /// Nothing is written for this request.
    NoReply,
}

/// Dispatcher lifecycle states.
///
/// `Running` pulls new requests; a stop signal or inbound closure moves to
/// `Draining`, which waits for in-flight handlers and then closes the
/// outbound queue so the send loop can flush and exit (`Terminated`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// Accepting new requests from the inbound queue.
    Running,
    /// No longer accepting; waiting for in-flight handlers.
    Draining,
    /// All handlers finished and the outbound queue is closed.
    Terminated,
}

/// Routes inbound requests to handlers and frames their replies.
pub struct Dispatcher {
    schema: Arc<Schema>,
    handlers: HashMap<u32, Handler>,
}

impl Dispatcher {
    /// Resolve a handler table against the schema's opcode names.
    ///
    /// Table entries whose name is not in the schema are dropped with a
    /// warning; requests for them would never arrive anyway.
    #[must_use]
    pub fn new(schema: Arc<Schema>, table: &HandlerTable) -> Self {
        let mut handlers = HashMap::with_capacity(table.len());
        for (name, handler) in table.iter() {
            match schema.opcode(name) {
                Some(code) => {
                    handlers.insert(code, Arc::clone(handler));
                }
                None => tracing::warn!(name, "handler registered for unknown opcode name"),
            }
        }
        Self { schema, handlers }
    }

    /// Number of handlers that resolved to opcodes.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Run until the inbound queue closes or `stop` fires, then drain.
    ///
    /// Replies are enqueued on `outbound` in completion order; the sender is
    /// dropped on return so the send loop drains the queue and exits.
    pub async fn run(
        self,
        mut inbound: mpsc::Receiver<(RequestHeader, Bytes)>,
        outbound: mpsc::Sender<Reply>,
        mut stop: watch::Receiver<bool>,
    ) {
        let mut state = DispatchState::Running;
        let mut in_flight = JoinSet::new();
        tracing::debug!(handlers = self.handlers.len(), "dispatcher running");

        while state == DispatchState::Running {
            tokio::select! {
                _ = stop.changed() => {
                    state = DispatchState::Draining;
                }
                message = inbound.recv() => match message {
                    Some((header, body)) => self.accept(header, body, &outbound, &mut in_flight),
                    None => state = DispatchState::Draining,
                },
                // Reap finished handlers as we go so the set stays small.
                Some(finished) = in_flight.join_next(), if !in_flight.is_empty() => {
                    log_finished(finished);
                }
            }
        }

        tracing::debug!(?state, pending = in_flight.len(), "no longer accepting requests");
        while let Some(finished) = in_flight.join_next().await {
            log_finished(finished);
        }

        state = DispatchState::Terminated;
        tracing::debug!(?state, "dispatcher stopped");
    }

    /// Start one request. Unknown opcodes are answered immediately; anything
    /// with a handler runs concurrently on its own task.
    fn accept(
        &self,
        header: RequestHeader,
        body: Bytes,
        outbound: &mpsc::Sender<Reply>,
        in_flight: &mut JoinSet<()>,
    ) {
        let opcode = header.opcode();
        let (operation, handler) = match (self.schema.operation(opcode), self.handlers.get(&opcode))
        {
            (Some(operation), Some(handler)) => (operation.clone(), Arc::clone(handler)),
            _ => {
                tracing::debug!(opcode, "no handler for opcode");
                spawn_reply(in_flight, outbound.clone(), header, Errno::ENOSYS as i32);
                return;
            }
        };

        let outbound = outbound.clone();
        in_flight.spawn(async move {
            process_request(&operation, handler, header, body, outbound).await;
        });
    }
}

/// Per-request lifecycle: parse, invoke, format, enqueue.
async fn process_request(
    operation: &sinter_proto::Operation,
    handler: Handler,
    header: RequestHeader,
    body: Bytes,
    outbound: mpsc::Sender<Reply>,
) {
    let parsed = match operation.request.parse(&operation.name, &body) {
        Ok(parsed) => parsed,
        Err(CodecError::NotImplementedOp(_)) => {
            tracing::debug!(op = %operation.name, "opcode marked not implemented");
            enqueue(&outbound, header, Errno::ENOSYS as i32, ReplyBody::Bytes(Bytes::new())).await;
            return;
        }
        Err(err) => {
            tracing::warn!(op = %operation.name, %err, "request parse failed");
            enqueue(&outbound, header, Errno::EIO as i32, ReplyBody::Bytes(Bytes::new())).await;
            return;
        }
    };

    tracing::trace!(op = %operation.name, nodeid = header.nodeid(), "request");

    // The handler gets its own task so a panic inside it cannot take down
    // the dispatch pipeline; it surfaces here as a join error.
    let outcome = match tokio::spawn(handler(header, parsed)).await {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::error!(op = %operation.name, %err, "handler failed abnormally");
            enqueue(&outbound, header, Errno::EIO as i32, ReplyBody::Bytes(Bytes::new())).await;
            return;
        }
    };

    match outcome {
        Ok((_errno, Response::NoReply)) => {
            tracing::trace!(op = %operation.name, "reply suppressed");
        }
        Ok((errno, Response::Raw(bytes))) => {
            enqueue(&outbound, header, errno, ReplyBody::Bytes(bytes)).await;
        }
        Ok((errno, Response::Fields(fields))) => {
            match operation.response.format(&operation.name, &fields) {
                Ok(bytes) => enqueue(&outbound, header, errno, ReplyBody::Bytes(bytes)).await,
                Err(err) => {
                    tracing::warn!(op = %operation.name, %err, "response format failed");
                    enqueue(&outbound, header, Errno::EIO as i32, ReplyBody::Bytes(Bytes::new()))
                        .await;
                }
            }
        }
        Err(fuse_error) => {
            enqueue(&outbound, header, fuse_error.errno, ReplyBody::Bytes(Bytes::new())).await;
        }
    }
}

fn spawn_reply(
    in_flight: &mut JoinSet<()>,
    outbound: mpsc::Sender<Reply>,
    header: RequestHeader,
    errno: i32,
) {
    in_flight.spawn(async move {
        enqueue(&outbound, header, errno, ReplyBody::Bytes(Bytes::new())).await;
    });
}

async fn enqueue(outbound: &mpsc::Sender<Reply>, header: RequestHeader, errno: i32, body: ReplyBody) {
    if outbound.send(Reply { header, errno, body }).await.is_err() {
        tracing::warn!("outbound queue closed before reply could be enqueued");
    }
}

fn log_finished(finished: Result<(), tokio::task::JoinError>) {
    if let Err(err) = finished {
        tracing::error!(%err, "request task failed abnormally");
    }
}
