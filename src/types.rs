//! Core types for pillar scatter: grid shape, coordinates, and input batches.

use std::fmt;

use bytemuck::{Pod, Zeroable};
use half::f16;

use crate::error::{Result, ScatterError};

/// Feature width of one pillar in the production pipeline.
pub const PILLAR_FEATURE_SIZE: usize = 64;

/// Default BEV grid extent (both axes).
pub const DEFAULT_GRID_EXTENT: usize = 1024;

/// Words per coordinate record: `{batch, row, col, reserved}`.
pub const COORD_FIELDS: usize = 4;

/// Words moved per coordinate transfer. Larger than a record so every
/// transfer has the same size regardless of alignment.
pub const COORD_CHUNK: usize = 8;

/// Trailing words a coordinate buffer carries so the final record's
/// fixed-size chunk stays inside the allocation.
pub const COORD_SLACK: usize = 8;

/// Coordinate field holding the grid row (height axis).
pub const ROW_FIELD: usize = 1;

/// Coordinate field holding the grid column (width axis).
pub const COL_FIELD: usize = 2;

/// Shape of the dense NHWC output grid (single batch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl GridShape {
    #[inline]
    pub const fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// Number of `(row, col)` cells. Unchecked; see [`GridShape::checked_len`].
    #[inline]
    pub const fn num_cells(&self) -> usize {
        self.height * self.width
    }

    /// Number of `f16` elements in the grid.
    #[inline]
    pub const fn len(&self) -> usize {
        self.height * self.width * self.channels
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `(row, col)` lies inside the grid on both axes.
    #[inline]
    pub fn contains(&self, row: u32, col: u32) -> bool {
        (row as usize) < self.height && (col as usize) < self.width
    }

    /// Flat cell index `row * W + col`, or `None` past the last cell.
    ///
    /// This follows the flat NHWC formula: a column past the row end lands
    /// in the next row, exactly like raw offset arithmetic would.
    #[inline]
    pub fn cell_index(&self, row: u32, col: u32) -> Option<usize> {
        let idx = row as u64 * self.width as u64 + col as u64;
        (idx < self.num_cells() as u64).then_some(idx as usize)
    }

    /// Element offset `row * W * C + col * C` of a cell's first channel.
    #[inline]
    pub fn cell_offset(&self, row: u32, col: u32) -> Option<usize> {
        self.cell_index(row, col).map(|cell| cell * self.channels)
    }

    /// Split a flat element index into `(row, col, channel)`.
    #[inline]
    pub fn decompose(&self, index: usize) -> (usize, usize, usize) {
        let row_stride = self.width * self.channels;
        let row = index / row_stride;
        let col = (index % row_stride) / self.channels;
        let channel = index % self.channels;
        (row, col, channel)
    }

    /// Element count, or `None` if `H * W * C` overflows `usize`.
    #[inline]
    pub fn checked_len(&self) -> Option<usize> {
        self.height
            .checked_mul(self.width)?
            .checked_mul(self.channels)
    }

    /// Rejects zero channels and shapes whose element count overflows.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.channels == 0 || self.checked_len().is_none() {
            return Err(ScatterError::InvalidShape(*self));
        }
        Ok(())
    }
}

impl Default for GridShape {
    fn default() -> Self {
        Self::new(DEFAULT_GRID_EXTENT, DEFAULT_GRID_EXTENT, PILLAR_FEATURE_SIZE)
    }
}

impl fmt::Display for GridShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.height, self.width, self.channels)
    }
}

/// A `(row, col)` position in the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct GridCell {
    pub row: u32,
    pub col: u32,
}

impl GridCell {
    #[inline]
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Convert to `glam::UVec2` as `(x = col, y = row)`.
    #[cfg(feature = "glam")]
    #[inline]
    pub fn to_glam(self) -> glam::UVec2 {
        glam::UVec2::new(self.col, self.row)
    }

    /// Create from `glam::UVec2` read as `(x = col, y = row)`.
    #[cfg(feature = "glam")]
    #[inline]
    pub fn from_glam(v: glam::UVec2) -> Self {
        Self::new(v.y, v.x)
    }
}

#[cfg(feature = "glam")]
impl From<glam::UVec2> for GridCell {
    #[inline]
    fn from(v: glam::UVec2) -> Self {
        Self::from_glam(v)
    }
}

#[cfg(feature = "glam")]
impl From<GridCell> for glam::UVec2 {
    #[inline]
    fn from(c: GridCell) -> glam::UVec2 {
        c.to_glam()
    }
}

/// One pillar's coordinate record as stored in the coordinate buffer.
///
/// Only `row` and `col` are consumed. `batch` and `reserved` are carried
/// through untouched; any value is accepted.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct CoordRecord {
    pub batch: u32,
    pub row: u32,
    pub col: u32,
    pub reserved: u32,
}

impl CoordRecord {
    #[inline]
    pub const fn new(row: u32, col: u32) -> Self {
        Self {
            batch: 0,
            row,
            col,
            reserved: 0,
        }
    }

    #[inline]
    pub const fn cell(&self) -> GridCell {
        GridCell::new(self.row, self.col)
    }
}

/// Owned coordinate words with [`COORD_SLACK`] zero words appended.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CoordBuffer {
    words: Vec<u32>,
    num_pillars: usize,
}

impl CoordBuffer {
    pub fn from_records(records: &[CoordRecord]) -> Self {
        Self::from_words(bytemuck::cast_slice(records).to_vec())
    }

    /// Wrap raw coordinate words. Trailing words that do not form a whole
    /// record are kept but not counted as a pillar.
    pub fn from_words(mut words: Vec<u32>) -> Self {
        let num_pillars = words.len() / COORD_FIELDS;
        words.resize(words.len() + COORD_SLACK, 0);
        Self { words, num_pillars }
    }

    /// Whole records in the buffer (slack excluded).
    #[inline]
    pub fn num_pillars(&self) -> usize {
        self.num_pillars
    }

    /// All words, slack included.
    #[inline]
    pub fn as_slice(&self) -> &[u32] {
        &self.words
    }

    pub fn record(&self, pillar: usize) -> Option<CoordRecord> {
        if pillar >= self.num_pillars {
            return None;
        }
        let base = pillar * COORD_FIELDS;
        let w = &self.words[base..base + COORD_FIELDS];
        Some(CoordRecord {
            batch: w[0],
            row: w[ROW_FIELD],
            col: w[COL_FIELD],
            reserved: w[3],
        })
    }
}

/// Borrowed scatter input: flat feature and coordinate buffers plus the pillar count.
///
/// `features` is row-major `[N, C]`; `coords` is row-major `[N, 4]`, ideally
/// followed by [`COORD_SLACK`] words. Extra elements past `N` are ignored.
#[derive(Debug, Clone, Copy)]
pub struct PillarBatch<'a> {
    features: &'a [f16],
    coords: &'a [u32],
    num_pillars: usize,
}

impl<'a> PillarBatch<'a> {
    #[inline]
    pub fn new(features: &'a [f16], coords: &'a [u32], num_pillars: u32) -> Self {
        Self {
            features,
            coords,
            num_pillars: num_pillars as usize,
        }
    }

    /// Build a batch from a coordinate buffer, taking N from its record count.
    pub fn from_buffer(features: &'a [f16], coords: &'a CoordBuffer) -> Self {
        Self {
            features,
            coords: coords.as_slice(),
            num_pillars: coords.num_pillars(),
        }
    }

    #[inline]
    pub fn features(&self) -> &'a [f16] {
        self.features
    }

    #[inline]
    pub fn coords(&self) -> &'a [u32] {
        self.coords
    }

    #[inline]
    pub fn num_pillars(&self) -> usize {
        self.num_pillars
    }

    pub(crate) fn validate(&self, shape: &GridShape) -> Result<()> {
        let n = self.num_pillars();
        // An overflowing requirement can never be met.
        let required = n.checked_mul(shape.channels).unwrap_or(usize::MAX);
        if self.features.len() < required {
            return Err(ScatterError::InputTooShort {
                buffer: "feature",
                required,
                actual: self.features.len(),
            });
        }
        let required = n.checked_mul(COORD_FIELDS).unwrap_or(usize::MAX);
        if self.coords.len() < required {
            return Err(ScatterError::InputTooShort {
                buffer: "coordinate",
                required,
                actual: self.coords.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_offset_formula() {
        let shape = GridShape::new(4, 3, 8);
        assert_eq!(shape.cell_offset(0, 0), Some(0));
        assert_eq!(shape.cell_offset(0, 2), Some(16));
        assert_eq!(shape.cell_offset(2, 1), Some(2 * 3 * 8 + 8));
        assert_eq!(shape.cell_offset(4, 0), None);
    }

    #[test]
    fn test_cell_index_wraps_columns() {
        let shape = GridShape::new(2, 2, 4);
        // col == W lands on the first cell of the next row.
        assert!(!shape.contains(0, 2));
        assert_eq!(shape.cell_index(0, 2), Some(2));
        assert_eq!(shape.cell_index(1, 2), None);
        assert_eq!(shape.cell_index(u32::MAX, u32::MAX), None);
    }

    #[test]
    fn test_decompose_roundtrip() {
        let shape = GridShape::new(5, 7, 3);
        let offset = shape.cell_offset(3, 6).unwrap() + 2;
        assert_eq!(shape.decompose(offset), (3, 6, 2));
    }

    #[test]
    fn test_coord_buffer_slack() {
        let buf = CoordBuffer::from_records(&[CoordRecord::new(1, 2), CoordRecord::new(3, 4)]);
        assert_eq!(buf.num_pillars(), 2);
        assert_eq!(buf.as_slice().len(), 2 * COORD_FIELDS + COORD_SLACK);
        assert_eq!(buf.as_slice()[ROW_FIELD], 1);
        assert_eq!(buf.as_slice()[COORD_FIELDS + COL_FIELD], 4);
        assert_eq!(buf.record(1).map(|r| r.cell()), Some(GridCell::new(3, 4)));
        assert_eq!(buf.record(2), None);
    }

    #[test]
    fn test_batch_validation() {
        let shape = GridShape::new(2, 2, 4);
        let features = vec![f16::ZERO; 7];
        let coords = vec![0u32; 8];
        let batch = PillarBatch::new(&features, &coords, 2);
        assert!(matches!(
            batch.validate(&shape),
            Err(ScatterError::InputTooShort {
                buffer: "feature",
                required: 8,
                actual: 7
            })
        ));
    }

    #[test]
    fn test_shape_overflow_rejected() {
        let huge = GridShape::new(usize::MAX, 2, 1);
        assert_eq!(huge.checked_len(), None);
        assert!(matches!(huge.validate(), Err(ScatterError::InvalidShape(_))));

        let ok = GridShape::new(720, 720, 64);
        assert_eq!(ok.checked_len(), Some(720 * 720 * 64));
        assert!(ok.validate().is_ok());
        assert!(GridShape::new(4, 4, 0).validate().is_err());
    }

    #[test]
    fn test_batch_requirement_overflow() {
        let shape = GridShape::new(1, 1, usize::MAX / 2);
        let batch = PillarBatch::new(&[], &[], u32::MAX);
        assert!(matches!(
            batch.validate(&shape),
            Err(ScatterError::InputTooShort {
                buffer: "feature",
                required: usize::MAX,
                actual: 0
            })
        ));
    }

    #[test]
    fn test_batch_from_buffer_keeps_count() {
        let buf = CoordBuffer::from_records(&[CoordRecord::new(0, 0); 3]);
        let features = vec![f16::ZERO; 6];
        assert_eq!(PillarBatch::from_buffer(&features, &buf).num_pillars(), 3);
    }

    #[test]
    #[cfg(feature = "glam")]
    fn test_grid_cell_glam() {
        let cell = GridCell::new(3, 5);
        let v: glam::UVec2 = cell.into();
        assert_eq!(v, glam::UVec2::new(5, 3));
        assert_eq!(GridCell::from(v), cell);
    }
}
