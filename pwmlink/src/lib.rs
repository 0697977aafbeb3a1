#![doc = include_str!("../README.md")]

pub mod gpio;
pub mod protocol;
pub mod relay;
pub mod usockets;

pub use protocol::{Command, Reply};

/// Largest request accepted on the link, in bytes
pub const MAX_LINE_LEN: u64 = 1024;
/// Longest reply a client accepts, status reports span many lines
pub const MAX_REPLY_LEN: u64 = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("request timed out")]
    Timeout,
    #[error("malformed command: {0}")]
    Malformed(String),
    #[error("unexpected reply: {0:?}")]
    UnexpectedReply(String),
    #[error("unknown relay channel {0}")]
    UnknownChannel(u16),
    #[error("gpio error: {0}")]
    Gpio(#[from] rppal::gpio::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
