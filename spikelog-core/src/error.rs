//! Error taxonomy shared by every stage of the codec.

use thiserror::Error;

/// Errors that can occur while decoding, reconstructing or resampling a buffer.
///
/// Every fallible entry point either returns a complete result or exactly one
/// of these variants; outputs are never partially populated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Unknown format: {0}")]
    UnknownFormat(String),

    #[error("Buffer of {len} bytes is shorter than the {header_offset}-byte header")]
    TruncatedHeader { len: usize, header_offset: usize },

    #[error("Timestamp decreased at record {index}: {previous} -> {current}")]
    NonMonotonicTimestamp {
        index: usize,
        previous: i64,
        current: i64,
    },

    #[error("Divisor `{0}` must be non-zero")]
    DivisorZero(&'static str),

    #[error("Channel {channel_id} maps to column {index}, outside [0, {channel_count})")]
    ChannelOutOfRange {
        channel_id: i64,
        index: i64,
        channel_count: usize,
    },

    #[error("Unsupported container version: {0:?}")]
    UnsupportedContainerVersion(String),

    #[error("Container header mismatch: {0}")]
    HeaderMismatch(String),
}

pub type Result<T> = std::result::Result<T, CodecError>;
