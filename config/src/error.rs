use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("malformed config stream at offset {offset}: {reason}")]
    MalformedStream { offset: usize, reason: &'static str },
    #[error("option 0x{tag:02x} carries {len} bytes, more than a length field can encode")]
    OptionTooLong { tag: u8, len: usize },
    #[error("output buffer holds {capacity} bytes, {needed} needed")]
    BufferTooSmall { needed: usize, capacity: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
