//! Error types and the suspension signal.
//!
//! Running out of buffered bytes is not an error: every primitive read and
//! every phase step returns [`Step::Pending`] when it needs more input, and
//! the caller retries after supplying another chunk. Structural problems
//! (bad magic, invalid sizes, bad codec headers) are [`DemuxError`] values.

use thiserror::Error;

/// Demuxer error types.
#[derive(Error, Debug)]
pub enum DemuxError {
    /// No byte source has been bound yet.
    #[error("no byte source bound; call init_file first")]
    NoSource,

    /// The first element of the stream is not the EBML header magic.
    #[error("first element id 0x{id:08X} is not an EBML header; input is not Matroska/WebM")]
    MalformedHeader {
        /// The element id that was found instead.
        id: u32,
    },

    /// An element id octet was zero or wider than four octets.
    #[error("invalid element id at offset {offset}")]
    InvalidElementId {
        /// Byte offset of the offending octet.
        offset: u64,
    },

    /// A required element was never found.
    #[error("missing required element: {0}")]
    MissingElement(&'static str),

    /// The stream ended in the middle of an element.
    #[error("unexpected end of input while parsing {0}")]
    UnexpectedEof(&'static str),

    /// A fixed-width integer read was requested with an out-of-range size.
    #[error("invalid integer size {size}, must be 1..=8 bytes")]
    InvalidPrimitiveSize {
        /// The requested byte count.
        size: u64,
    },

    /// A float read was requested with a size other than 4 or 8.
    #[error("invalid float size {size}, must be 4 or 8 bytes")]
    InvalidFloatSize {
        /// The requested byte count.
        size: u64,
    },

    /// Codec setup data does not have the expected layout.
    #[error("invalid codec header: {0}")]
    InvalidCodecHeader(String),

    /// A block's internal structure is inconsistent.
    #[error("invalid block structure: {0}")]
    InvalidBlock(String),

    /// Lace sizes do not add up or use an unknown mode.
    #[error("invalid lacing: {0}")]
    InvalidLacing(String),

    /// I/O error from the byte source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for demuxer operations.
pub type Result<T> = std::result::Result<T, DemuxError>;

/// Outcome of one resumable decode step.
///
/// `Pending` means the operation consumed everything it could and retained
/// its partial progress; calling it again after more bytes arrive continues
/// exactly where it left off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Step<T> {
    /// The operation completed with a value.
    Ready(T),
    /// More input is needed before the operation can complete.
    Pending,
}

impl<T> Step<T> {
    /// True if the step completed.
    pub fn is_ready(&self) -> bool {
        matches!(self, Step::Ready(_))
    }

    /// True if the step is waiting for more input.
    pub fn is_pending(&self) -> bool {
        matches!(self, Step::Pending)
    }

    /// Unwrap the value, panicking on `Pending`. Test helper.
    #[cfg(test)]
    pub(crate) fn unwrap(self) -> T {
        match self {
            Step::Ready(v) => v,
            Step::Pending => panic!("called unwrap on Step::Pending"),
        }
    }
}

/// Extract the value from a `Step`, propagating `Pending` to the caller.
macro_rules! ready {
    ($e:expr) => {
        match $e {
            $crate::error::Step::Ready(v) => v,
            $crate::error::Step::Pending => return Ok($crate::error::Step::Pending),
        }
    };
}

pub(crate) use ready;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = DemuxError::InvalidPrimitiveSize { size: 12 };
        assert!(err.to_string().contains("12"));

        let err = DemuxError::MalformedHeader { id: 0x12345678 };
        assert!(err.to_string().contains("0x12345678"));
    }

    #[test]
    fn step_predicates() {
        assert!(Step::Ready(1).is_ready());
        assert!(!Step::Ready(1).is_pending());
        assert!(Step::<u32>::Pending.is_pending());
    }
}
