//! The accept loop: binds once,
//! then spawns one `tokio::task` per connection up to `max_threads`
//! concurrent sessions, checking the ceiling every 3 seconds against a
//! live-worker counter.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::config::ServerConfig;
use crate::error::ProcksyError;
use crate::session;
use crate::signal::TerminationSignal;
use crate::socket;

const CEILING_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Binds the listening socket and serves until `signal` is tripped.
pub async fn serve(config: ServerConfig, signal: TerminationSignal) -> Result<(), ProcksyError> {
    let listener = socket::bind_and_listen(&config.bind_addr, config.bind_port)
        .await
        .map_err(|source| ProcksyError::Bind {
            addr: config.bind_addr.clone(),
            port: config.bind_port,
            source,
        })?;
    info!("listening on {}:{}", config.bind_addr, config.bind_port);

    let config = Arc::new(config);
    let active = Arc::new(AtomicUsize::new(0));
    let sock_timeout = Duration::from_secs(config.sock_timeout_secs);

    while !signal.is_set() {
        if active.load(Ordering::SeqCst) >= config.max_threads {
            warn!(
                "at capacity ({} connections), waiting before accepting more",
                config.max_threads
            );
            signal.wait_or_timeout(CEILING_POLL_INTERVAL).await;
            continue;
        }

        match socket::accept(&listener, sock_timeout).await {
            socket::Accepted::Connection(stream, peer) => {
                info!("accepted connection from {peer}");
                active.fetch_add(1, Ordering::SeqCst);
                let config = Arc::clone(&config);
                let signal = signal.clone();
                let active = Arc::clone(&active);
                tokio::spawn(async move {
                    session::handle_connection(stream, peer, config, signal).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                });
            }
            socket::Accepted::Timeout => continue,
            socket::Accepted::Recoverable => continue,
        }
    }

    info!("termination signal observed, no longer accepting new connections");
    // Sessions already spawned are left to finish on their own; the
    // acceptor does not join its workers on shutdown.
    Ok(())
}
