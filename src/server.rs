//! Accept loop and server-wide wiring: binds the listener, spawns the
//! deadline engine, and hands each accepted socket off to its own
//! connection task (`spec.md` §5: "one task per connection").

use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::select;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::connection;
use crate::core::Core;

/// Runtime configuration, built from parsed CLI arguments
/// (`SPEC_FULL.md` §4: "a small `Config` struct").
pub struct Config {
    pub listen: IpAddr,
    pub port: u16,
    pub max_job_size: u32,
    pub draining: bool,
}

/// Binds the listener and serves connections until `cancel` fires.
pub async fn run(config: Config, cancel: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind((config.listen, config.port))
        .await
        .context("binding listener")?;
    info!(addr = %listener.local_addr()?, "listening");

    let core = Arc::new(Mutex::new(Core::new(config.max_job_size, config.draining)));
    let wake_deadline = Arc::new(Notify::new());

    let deadline_task = {
        let core = Arc::clone(&core);
        let wake_deadline = Arc::clone(&wake_deadline);
        tokio::spawn(crate::core::deadline::run(core, wake_deadline))
    };

    loop {
        let accepted = select! {
            accepted = listener.accept() => accepted,
            _ = cancel.cancelled() => break,
        };

        match accepted {
            Ok((stream, peer)) => {
                if let Err(error) = stream.set_nodelay(true) {
                    warn!(%peer, %error, "failed to set TCP_NODELAY");
                }
                let core = Arc::clone(&core);
                let wake_deadline = Arc::clone(&wake_deadline);
                tokio::spawn(connection::handle(core, wake_deadline, stream));
            },
            Err(error) => {
                // No tokio equivalent of deregistering the listener on
                // EMFILE; log and keep accepting rather than exiting.
                error!(%error, "failed to accept connection");
            },
        }
    }

    deadline_task.abort();
    Ok(())
}
