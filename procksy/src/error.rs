use std::io;

/// Error kinds surfaced outside a single session: bind/config failures that
/// the acceptor must act on. Per-session errors (protocol, policy, upstream,
/// transient I/O) are not represented here — they are handled locally by
/// the session engine and never escape it, so they only ever appear as
/// `log::error!`/`log::warn!` lines.
#[derive(Debug, thiserror::Error)]
pub enum ProcksyError {
    #[error("failed to bind {addr}:{port}: {source}")]
    Bind {
        addr: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("failed to load configuration from {path}: {source}")]
    Config {
        path: String,
        #[source]
        source: io::Error,
    },
}
