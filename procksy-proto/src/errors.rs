#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("unexpected version: expected {expected:#04x}, found {found:#04x}")]
    InvalidVersion { expected: u8, found: u8 },

    #[error("reserved byte must be 0x00, found {0:#04x}")]
    ReservedByteNotZero(u8),

    #[error("unknown command {0:#04x}")]
    UnknownCommand(u8),

    #[error("unknown address type {0:#04x}")]
    UnknownAddressType(u8),

    #[error("unknown reply code {0:#04x}")]
    UnknownReply(u8),

    #[error("domain name is not valid utf-8")]
    InvalidDomain,

    #[error("frame truncated: needed at least {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },

    #[error("{0} trailing byte(s) after a complete frame")]
    TrailingBytes(usize),
}
