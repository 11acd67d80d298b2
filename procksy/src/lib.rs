//! `procksy`: a partial, policy-enforcing SOCKS5 proxy server. The binary
//! in `main.rs` is a thin CLI/process shell around this library so
//! integration tests can drive the acceptor directly.

pub mod acceptor;
pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod filter;
pub mod session;
pub mod signal;
pub mod socket;

pub use config::ServerConfig;
pub use error::ProcksyError;
pub use signal::TerminationSignal;
