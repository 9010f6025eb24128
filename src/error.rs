use thiserror::Error;

/// Main error type for strata operations
#[derive(Error, Debug)]
pub enum StrataError {
    #[error("corrupt posting block: {0}")]
    CorruptBlock(&'static str),

    #[error("corrupt terms stream: {0}")]
    CorruptTerms(&'static str),

    #[error("term ordering violation: equal or mis-ordered terms in pack input")]
    TermOrder,

    #[error("term too long: {0} bytes, limit is 255")]
    TermTooLong(usize),

    #[error("unsupported segment manifest version: {0}")]
    UnsupportedVersion(u32),

    #[error("segment written with unsupported codec tag {0}")]
    UnsupportedCodec(u32),

    #[error("segment checksum mismatch: manifest {expected:#010x}, files {actual:#010x}")]
    ChecksumMismatch { expected: u64, actual: u64 },

    #[error("chunk range {offset}+{len} out of bounds for posting stream of {stream_len} bytes")]
    ChunkOutOfBounds {
        offset: u64,
        len: u64,
        stream_len: u64,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for strata operations
pub type Result<T> = std::result::Result<T, StrataError>;
