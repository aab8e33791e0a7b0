use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TraceError>;

/// Errors surfaced by a [`TraceSession`](crate::session::TraceSession).
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("trace i/o failed: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Harness(#[from] HarnessError),
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("helper i/o failed: {0}")]
    Io(#[from] io::Error),

    #[error("harness needs at least one strategy and one output per strategy (strategies={strategies}, outputs={outputs})")]
    StrategyCount { strategies: usize, outputs: usize },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// A candidate strategy disagreed with the reference strategy (index 0).
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("strategy {strategy} diverged at record {record} (byte {byte_offset})")]
    Diverged {
        strategy: usize,
        record: usize,
        byte_offset: usize,
    },

    #[error("strategy {strategy} decoded {found} bytes, reference decoded {expected}")]
    LengthMismatch {
        strategy: usize,
        expected: usize,
        found: usize,
    },

    #[error("strategy {strategy} failed to decode: {source}")]
    Decode {
        strategy: usize,
        #[source]
        source: DecodeError,
    },
}

impl ValidationError {
    /// Index of the strategy that failed validation.
    pub fn strategy(&self) -> usize {
        match self {
            ValidationError::Diverged { strategy, .. }
            | ValidationError::LengthMismatch { strategy, .. }
            | ValidationError::Decode { strategy, .. } => *strategy,
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("unknown event kind {0}")]
    UnknownEventKind(u8),

    #[error("unsupported trace format version {0}")]
    UnsupportedVersion(u32),

    #[error("unknown rom mode {0}")]
    UnknownRomMode(u32),

    #[error("invalid helper stream magic")]
    BadHelperMagic,

    #[error("helper stream was written by strategy {found}, expected {expected}")]
    StrategyMismatch { expected: u8, found: u8 },

    #[error("corrupt stream: {0}")]
    Corrupt(&'static str),

    #[error("lz4 decompression failed: {0}")]
    Lz4(#[from] lz4_flex::block::DecompressError),
}
