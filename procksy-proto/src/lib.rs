//! Wire codec for the subset of SOCKS5 (RFC 1928) and username/password
//! subnegotiation (RFC 1929) that `procksy` speaks. Pure byte-level
//! serialize/parse functions only — no sockets, no async runtime.

mod codec;
mod errors;

pub use codec::*;
pub use errors::Error;
