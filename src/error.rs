//! Error types for pillar scatter.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::GridShape;

/// Result type alias using [`ScatterError`].
pub type Result<T> = std::result::Result<T, ScatterError>;

/// Errors that can occur while scattering pillars or moving grids to and from disk.
#[derive(Debug, Error)]
pub enum ScatterError {
    /// The unit count must be in `1..=255` (unit ids are tracked in a byte per cell).
    #[error("invalid compute unit count {units}: expected 1..=255")]
    InvalidUnitCount { units: usize },

    /// An input buffer holds fewer elements than the pillar count implies.
    #[error("{buffer} buffer too short: need {required} elements, got {actual}")]
    InputTooShort {
        buffer: &'static str,
        required: usize,
        actual: usize,
    },

    /// The destination buffer does not match the grid shape.
    #[error("destination length mismatch: shape needs {expected} elements, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    /// Zero channels, or `H * W * C` overflows `usize`.
    #[error("invalid grid shape {0}")]
    InvalidShape(GridShape),

    /// A pillar addresses a cell outside the grid (only with bounds checking enabled).
    #[error("pillar {pillar} at (row={row}, col={col}) is outside grid {shape}")]
    OutOfBounds {
        pillar: usize,
        row: u32,
        col: u32,
        shape: GridShape,
    },

    /// A pillar addresses a cell that was already written (only with collision rejection).
    #[error("pillar {pillar} collides at (row={row}, col={col})")]
    Collision { pillar: usize, row: u32, col: u32 },

    /// A unit lost its working-storage slots before finishing its range.
    ///
    /// The slot pool is sized for the pipeline, so this indicates a bug.
    #[error("compute unit {unit} lost its transfer slots")]
    SlotPoolExhausted { unit: usize },

    /// Reading or writing a host file failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A host file has a size that cannot hold whole elements.
    #[error("invalid file {}: {reason}", path.display())]
    InvalidFile { path: PathBuf, reason: String },
}
