// Bit-addressable streams and the transform chain around them

pub mod bits;
pub mod config;
pub mod hexdump;
pub mod raw;
pub mod stream;
pub mod transform;
pub mod transforms;

pub use bits::Endian;
pub use config::StreamConfig;
pub use hexdump::hexdump;
pub use raw::RawStream;
pub use stream::{BitStream, Direction};
pub use transform::{BoxedTransform, Chain, Transform};
pub use transforms::{SubRange, Xor};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("End of stream")]
    EndOfStream,

    #[error("Truncated read: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Stream is not seekable")]
    Unseekable,

    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("Access at offset {offset} is outside the bound {limit}")]
    OutOfBounds { offset: u64, limit: u64 },

    #[error("Invalid bit count: {0} (expected 1..=64)")]
    InvalidBitCount(u32),

    #[error("Wrong stream direction: {0}")]
    WrongDirection(&'static str),

    #[error("{0} bits still pending at end of write")]
    UnflushedBits(u32),

    #[error("Transform error: {0}")]
    Transform(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    /// True for the conditions that end an until-exhaustion read
    pub fn is_eof(&self) -> bool {
        matches!(
            self,
            StreamError::EndOfStream | StreamError::Truncated { .. }
        )
    }
}
