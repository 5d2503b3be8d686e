//! Session runtime: wires the device loops, queues and dispatcher together.
//!
//! The receive and send loops block on the device, so each runs on a
//! dedicated OS thread and talks to the async dispatcher through bounded
//! queues. The critical property is that a blocked device read never stalls
//! running handlers, and handler work never stalls device I/O.
//!
//! Stop is a channel event, not a polled flag: [`SessionHandle::stop`] fires
//! a watch channel the dispatcher selects on. The dispatcher then drains its
//! in-flight handlers and closes the outbound queue, which lets the send
//! loop flush remaining replies and exit.

use std::{sync::Arc, thread};

use sinter_proto::Schema;
use tokio::sync::{mpsc, watch};

use crate::{
    dispatch::Dispatcher,
    handler::HandlerTable,
    transport::{FuseDevice, TransportError},
};

/// Tunables for a running session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Depth of the inbound and outbound queues.
    pub queue_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { queue_depth: 64 }
    }
}

/// Cooperative stop handle for a running session.
#[derive(Clone)]
pub struct SessionHandle {
    stop: Arc<watch::Sender<bool>>,
}

impl SessionHandle {
    /// Ask the session to stop: the dispatcher finishes in-flight handlers
    /// and remaining replies are flushed before the loops exit.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }
}

/// One mounted filesystem: device, schema and handler table.
pub struct Session {
    device: FuseDevice,
    dispatcher: Dispatcher,
    config: SessionConfig,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
}

impl Session {
    /// Build a session over an already-open device.
    #[must_use]
    pub fn new(
        device: FuseDevice,
        schema: Arc<Schema>,
        handlers: &HandlerTable,
        config: SessionConfig,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            device,
            dispatcher: Dispatcher::new(schema, handlers),
            config,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
        }
    }

    /// Stop handle, usable from any thread or task.
    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        SessionHandle { stop: Arc::clone(&self.stop_tx) }
    }

    /// Drive the session until unmount, stop, or transport failure.
    ///
    /// Unmount and a closed device handle end the session cleanly; any other
    /// transport failure is returned.
    ///
    /// # Errors
    ///
    /// The first fatal [`TransportError`] from either I/O loop.
    pub async fn run(self) -> Result<(), TransportError> {
        let (reader, writer) = self.device.split();
        let (inbound_tx, inbound_rx) = mpsc::channel(self.config.queue_depth);
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.queue_depth);

        tracing::info!(
            handlers = self.dispatcher.handler_count(),
            queue_depth = self.config.queue_depth,
            "session starting"
        );

        let recv_thread = thread::spawn(move || reader.run(inbound_tx));
        let send_thread = thread::spawn(move || writer.run(outbound_rx));

        // Keep a stop sender alive for the whole run so a dropped handle
        // cannot fire a spurious stop.
        let _stop_guard = Arc::clone(&self.stop_tx);

        self.dispatcher.run(inbound_rx, outbound_tx, self.stop_rx).await;

        // The dispatcher dropped the outbound sender; the send loop drains
        // the queue and exits on its own.
        let send_result =
            tokio::task::spawn_blocking(move || join_loop(send_thread)).await.unwrap_or_else(|err| {
                tracing::error!(%err, "send loop join failed");
                Ok(())
            });

        // The receive loop exits once it notices the inbound queue is gone,
        // but it may be parked in a device read until the kernel speaks
        // again. Only join it when it already finished; otherwise leave it
        // to die with the device handle.
        let recv_result = if recv_thread.is_finished() {
            join_loop(recv_thread)
        } else {
            tracing::debug!("receive loop still blocked on the device; leaving it detached");
            Ok(())
        };

        for result in [recv_result, send_result] {
            match result {
                Ok(()) | Err(TransportError::Unmounted | TransportError::Closed) => {}
                Err(err) => return Err(err),
            }
        }

        tracing::info!("session ended");
        Ok(())
    }
}

fn join_loop(handle: thread::JoinHandle<Result<(), TransportError>>) -> Result<(), TransportError> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => {
            tracing::error!("I/O loop thread panicked");
            Ok(())
        }
    }
}
