//! # Stream Error Types
//!
//! All errors that can occur while producing, shipping or consuming chunk data.
//! Every error is local to one chunk; callers log it and move on.

use thiserror::Error;

use crate::coords::{ChunkCoord, ColumnCoord};
use crate::storage::DataKind;

/// Errors that can occur in the streaming system.
#[derive(Error, Debug)]
pub enum StreamError {
    /// Requested payload is neither cached nor stored.
    #[error("missing {kind} data for chunk {pos}")]
    MissingData {
        /// Which payload was missing.
        kind: DataKind,
        /// The chunk it belongs to.
        pos: ChunkCoord,
    },

    /// Coarse height of a column is not known yet.
    #[error("missing height for column {0}")]
    MissingHeight(ColumnCoord),

    /// The chunk or one of its 6 neighbours is not loaded.
    #[error("incomplete neighbourhood around chunk {0}")]
    IncompleteNeighborhood(ChunkCoord),

    /// Light map length does not match the surface's face count.
    #[error("light data mismatch for chunk {pos}: expected {expected} entries, got {actual}")]
    LightMismatch {
        /// The chunk whose pair disagrees.
        pos: ChunkCoord,
        /// Face count of the surface.
        expected: usize,
        /// Entries present in the light map.
        actual: usize,
    },

    /// A bounded queue rejected work.
    #[error("queue full: capacity {capacity}")]
    QueueFull {
        /// Queue capacity.
        capacity: usize,
    },

    /// Malformed payload or wire message.
    #[error("decode error: {0}")]
    Decode(String),

    /// An occlusion probe was asked for a transition it cannot make.
    #[error("invalid probe transition from {from} to {to}")]
    InvalidProbeTransition {
        /// Current state name.
        from: &'static str,
        /// Requested state name.
        to: &'static str,
    },

    /// A worker pool shut down before finishing a job.
    #[error("worker pool stopped")]
    WorkerStopped,

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Connection-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StreamError {
    /// Returns true if the error means the chunk's data must be re-fetched from scratch.
    #[must_use]
    pub const fn is_desync(&self) -> bool {
        matches!(self, Self::LightMismatch { .. } | Self::Decode(_))
    }
}

/// Result type for streaming operations.
pub type StreamResult<T> = Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = StreamError::LightMismatch {
            pos: ChunkCoord::new(1, -2, 3),
            expected: 6,
            actual: 5,
        };
        assert_eq!(
            err.to_string(),
            "light data mismatch for chunk (1, -2, 3): expected 6 entries, got 5"
        );
        assert!(err.is_desync());

        let err = StreamError::MissingData {
            kind: DataKind::Surface,
            pos: ChunkCoord::new(0, 0, 0),
        };
        assert_eq!(err.to_string(), "missing surface data for chunk (0, 0, 0)");
        assert!(!err.is_desync());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: StreamError = io.into();
        assert!(matches!(err, StreamError::Io(_)));
    }
}
