//! Command-line surface: `serve` and `digest` subcommands.

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "procksy", version, about = "A partial SOCKS5 proxy server")]
pub struct Cli {
    /// Increase log verbosity (-v for debug, -vv for trace). `RUST_LOG`
    /// always takes precedence if set.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Force a specific configuration file instead of searching the
    /// default locations.
    #[arg(long, global = true)]
    pub config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start serving the proxy.
    Serve(ServeArgs),
    /// Read a secret from the terminal and print its Argon2id digest.
    Digest,
}

#[derive(Debug, Parser, Default)]
pub struct ServeArgs {
    /// Authorized users as USER:DIGEST pairs; enables auth when non-empty.
    #[arg(long = "users", num_args = 1.., value_name = "USER:DIGEST")]
    pub users: Vec<String>,

    /// Filter clients: mode:value,value,... (mode is none|allow|deny).
    #[arg(long = "client-filter", value_name = "MODE:VALUES")]
    pub client_filter: Option<String>,

    /// Filter targets: mode:value,value,... (mode is none|allow|deny).
    #[arg(long = "target-filter", value_name = "MODE:VALUES")]
    pub target_filter: Option<String>,

    /// Bind address (IPv4 literal).
    #[arg(long = "bind-addr")]
    pub bind_addr: Option<String>,

    /// Bind port.
    #[arg(long = "bind-port")]
    pub bind_port: Option<u16>,

    /// Relay/read buffer size in bytes.
    #[arg(long = "buffer-size")]
    pub buffer_size: Option<usize>,

    /// Maximum number of concurrently served connections.
    #[arg(long = "max-threads")]
    pub max_threads: Option<usize>,

    /// Per-socket I/O timeout in seconds.
    #[arg(long = "sock-timeout")]
    pub sock_timeout: Option<u64>,
}
