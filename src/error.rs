//! Error types for VyomaMap.
//!
//! # Error Recovery Strategies
//!
//! - **`OutOfRange`**: a world coordinate maps outside the fixed 16-bit key
//!   space at the current resolution. Surfaced by direct point-indexed
//!   updates and queries. During scan integration the offending point is
//!   skipped and counted instead; the scan itself never aborts.
//!
//! - **`InvalidFile`**: the binary stream failed validation (wrong format
//!   tag, unparsable resolution, truncated node records, node-count
//!   mismatch). The tree is left in its pre-read state, so the caller may
//!   retry with a different file.
//!
//! - **`InvalidParameter`**: a sensor-model probability violates its sign
//!   constraint (hit < 0.5, miss > 0.5) or the clamping bounds are
//!   inverted. Fix the configuration; the tree keeps its previous values.
//!
//! - **`Io`**: error from the underlying reader/writer, usually retryable
//!   or fatal depending on the stream.

use thiserror::Error;

/// Errors that can occur in VyomaMap.
///
/// See module-level documentation for recovery strategies.
#[derive(Error, Debug)]
pub enum MapError {
    /// A coordinate maps outside the 16-bit voxel key space.
    #[error("coordinate {coordinate} outside the key space at the current resolution")]
    OutOfRange {
        /// The world coordinate that failed to convert.
        coordinate: f64,
    },

    /// A binary map stream failed validation.
    #[error("invalid map file: {0}")]
    InvalidFile(String),

    /// A sensor-model parameter violates its documented constraint.
    #[error("invalid sensor model parameter: {0}")]
    InvalidParameter(String),

    /// Error from the underlying reader or writer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, MapError>;
