//! sinter daemon: serve the built-in hello filesystem over a FUSE device.
//!
//! Mounting happens outside this binary. A mount helper opens the FUSE
//! character device and hands over the descriptor, either directly or
//! through an environment variable:
//!
//! ```bash
//! # Descriptor in the FUSEFD environment variable (the default)
//! sinter-daemon
//!
//! # Explicit descriptor and verbose logging
//! sinter-daemon --fd 3 --log-level debug
//! ```

use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use sinter_core::{FuseDevice, Session, SessionConfig};
use sinter_daemon::{DaemonError, hello, load_schema};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Schema-driven FUSE daemon
#[derive(Parser, Debug)]
#[command(name = "sinter-daemon")]
#[command(about = "Schema-driven FUSE daemon serving the hello filesystem")]
#[command(version)]
struct Args {
    /// Numeric descriptor of the already-open FUSE device
    #[arg(long, conflicts_with = "fd_env")]
    fd: Option<i32>,

    /// Environment variable holding the device descriptor
    #[arg(long, default_value = "FUSEFD")]
    fd_env: String,

    /// Path to the protocol schema document
    #[arg(long, default_value = "protocol/protocol.json")]
    schema: PathBuf,

    /// Protocol version tag inside the schema document
    #[arg(long, default_value = "v7.31")]
    proto_version: String,

    /// Receive buffer size in bytes (minimum 8192)
    #[arg(long, default_value = "65536")]
    bufsize: usize,

    /// Queue depth between the device loops and the dispatcher
    #[arg(long, default_value = "64")]
    queue_depth: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), DaemonError> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!(schema = %args.schema.display(), version = %args.proto_version, "loading schema");
    let schema = Arc::new(load_schema(&args.schema, &args.proto_version)?);

    let device = match args.fd {
        Some(fd) => FuseDevice::from_raw(fd, args.bufsize)?,
        None => FuseDevice::from_env(&args.fd_env, args.bufsize)?,
    };

    let session = Session::new(
        device,
        schema,
        &hello::handlers(),
        SessionConfig { queue_depth: args.queue_depth },
    );

    session.run().await?;

    Ok(())
}
