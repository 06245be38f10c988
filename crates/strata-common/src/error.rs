//! Error types for the world layer.
//!
//! Lookup misses are not errors; they are reported as sentinels by the
//! spatial index. These types cover malformed buffers and world construction.

use thiserror::Error;

/// Errors raised while reading or writing the compact binary format.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Buffer ends before the structure does
    #[error("Buffer too short: need {needed} bytes, have {actual}")]
    BufferTooShort {
        /// Bytes required
        needed: usize,
        /// Bytes available
        actual: usize,
    },

    /// Record offset does not fall on or inside the buffer
    #[error("Offset {offset} out of range for buffer of {len} bytes")]
    OffsetOutOfRange {
        /// Requested offset
        offset: usize,
        /// Buffer length
        len: usize,
    },

    /// A wide id does not fit the 16-bit on-disk slot
    #[error("{field} id {value} does not fit the 16-bit record slot")]
    IdOverflow {
        /// Field being narrowed
        field: &'static str,
        /// Offending value
        value: u64,
    },

    /// Chunk volume with `end <= start` on some axis
    #[error("Invalid chunk extent {start:?}..{end:?}")]
    InvalidExtent {
        /// Start corner
        start: [u16; 3],
        /// End corner
        end: [u16; 3],
    },

    /// Chunk has more children than the child table holds
    #[error("Chunk has {count} children, the child table holds {max}")]
    TooManyChildren {
        /// Children supplied
        count: usize,
        /// Slots available
        max: usize,
    },
}

/// World construction and chunk table errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorldError {
    /// World axis is not `chunk_size * 2^k` (nor smaller than `chunk_size`)
    #[error("World dimensions {dims:?} do not split evenly into chunks of {chunk_size}")]
    UnevenDimensions {
        /// World dimensions
        dims: [u16; 3],
        /// Leaf edge length
        chunk_size: u16,
    },

    /// Serial id space used up
    #[error("Id space exhausted (capacity {capacity})")]
    IdSpaceExhausted {
        /// Maximum number of ids
        capacity: usize,
    },

    /// Chunk referenced by id is not in the table
    #[error("Chunk {0} not found")]
    ChunkNotFound(u16),

    /// Block position outside the world volume
    #[error("Position ({x}, {y}, {z}) is outside the world")]
    OutOfWorld {
        /// X coordinate
        x: u16,
        /// Y coordinate
        y: u16,
        /// Z coordinate
        z: u16,
    },

    /// Underlying codec failure
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Result type alias for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Result type alias for world operations.
pub type WorldResult<T> = Result<T, WorldError>;
