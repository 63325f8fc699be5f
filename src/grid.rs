//! Dense NHWC output grid.

use half::f16;

use crate::error::{Result, ScatterError};
use crate::types::GridShape;

/// Owned, zero-initialized `[H, W, C]` grid of half-precision features.
///
/// The `C` values of a cell are contiguous, so a scattered pillar occupies one
/// contiguous run of the backing buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialGrid {
    shape: GridShape,
    data: Vec<f16>,
}

impl SpatialGrid {
    /// Allocate an all-zero grid.
    pub fn new(shape: GridShape) -> Self {
        Self {
            shape,
            data: vec![f16::ZERO; shape.len()],
        }
    }

    /// Wrap an existing NHWC buffer.
    pub fn from_vec(shape: GridShape, data: Vec<f16>) -> Result<Self> {
        if data.len() != shape.len() {
            return Err(ScatterError::ShapeMismatch {
                expected: shape.len(),
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// Build from a channel-major `[C, H, W]` buffer.
    pub fn from_nchw(shape: GridShape, nchw: &[f16]) -> Result<Self> {
        if nchw.len() != shape.len() {
            return Err(ScatterError::ShapeMismatch {
                expected: shape.len(),
                actual: nchw.len(),
            });
        }
        let mut grid = Self::new(shape);
        let plane = shape.num_cells();
        for (cell, dst) in grid.data.chunks_exact_mut(shape.channels).enumerate() {
            for (c, v) in dst.iter_mut().enumerate() {
                *v = nchw[c * plane + cell];
            }
        }
        Ok(grid)
    }

    /// Copy out as a channel-major `[C, H, W]` buffer.
    pub fn to_nchw(&self) -> Vec<f16> {
        let plane = self.shape.num_cells();
        let mut out = vec![f16::ZERO; self.data.len()];
        for (cell, src) in self.data.chunks_exact(self.shape.channels).enumerate() {
            for (c, &v) in src.iter().enumerate() {
                out[c * plane + cell] = v;
            }
        }
        out
    }

    #[inline]
    pub fn shape(&self) -> GridShape {
        self.shape
    }

    #[inline]
    pub fn as_slice(&self) -> &[f16] {
        &self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f16] {
        &mut self.data
    }

    #[inline]
    pub fn into_vec(self) -> Vec<f16> {
        self.data
    }

    /// Feature vector stored at `(row, col)`, if the cell is inside the grid.
    pub fn cell(&self, row: u32, col: u32) -> Option<&[f16]> {
        if !self.shape.contains(row, col) {
            return None;
        }
        let offset = self.shape.cell_offset(row, col)?;
        Some(&self.data[offset..offset + self.shape.channels])
    }

    pub fn cell_mut(&mut self, row: u32, col: u32) -> Option<&mut [f16]> {
        if !self.shape.contains(row, col) {
            return None;
        }
        let offset = self.shape.cell_offset(row, col)?;
        Some(&mut self.data[offset..offset + self.shape.channels])
    }

    /// Whether every element is bitwise zero.
    pub fn is_zero(&self) -> bool {
        self.data.iter().all(|v| v.to_bits() == 0)
    }

    /// Reset every element to zero.
    pub fn clear(&mut self) {
        self.data.fill(f16::ZERO);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(v: f32) -> f16 {
        f16::from_f32(v)
    }

    #[test]
    fn test_new_is_zero() {
        let grid = SpatialGrid::new(GridShape::new(3, 2, 4));
        assert_eq!(grid.as_slice().len(), 24);
        assert!(grid.is_zero());
    }

    #[test]
    fn test_cell_access() {
        let mut grid = SpatialGrid::new(GridShape::new(2, 3, 2));
        grid.cell_mut(1, 2).unwrap().copy_from_slice(&[h(1.0), h(2.0)]);
        assert_eq!(grid.cell(1, 2), Some(&[h(1.0), h(2.0)][..]));
        assert_eq!(&grid.as_slice()[10..12], &[h(1.0), h(2.0)]);
        assert!(grid.cell(0, 3).is_none());
        assert!(grid.cell(2, 0).is_none());
    }

    #[test]
    fn test_from_vec_rejects_wrong_len() {
        let err = SpatialGrid::from_vec(GridShape::new(2, 2, 2), vec![f16::ZERO; 7]);
        assert!(matches!(
            err,
            Err(ScatterError::ShapeMismatch {
                expected: 8,
                actual: 7
            })
        ));
    }

    #[test]
    fn test_nchw_layout() {
        let shape = GridShape::new(1, 2, 3);
        // NHWC: cell0 = [0, 1, 2], cell1 = [3, 4, 5]
        let nhwc: Vec<f16> = (0..6).map(|i| h(i as f32)).collect();
        let grid = SpatialGrid::from_vec(shape, nhwc).unwrap();
        let nchw = grid.to_nchw();
        let expected: Vec<f16> = [0.0, 3.0, 1.0, 4.0, 2.0, 5.0].iter().map(|&v| h(v)).collect();
        assert_eq!(nchw, expected);
        assert_eq!(SpatialGrid::from_nchw(shape, &nchw).unwrap(), grid);
    }

    #[test]
    fn test_negative_zero_is_not_zero() {
        let mut grid = SpatialGrid::new(GridShape::new(1, 1, 1));
        grid.as_mut_slice()[0] = f16::NEG_ZERO;
        assert!(!grid.is_zero());
        grid.clear();
        assert!(grid.is_zero());
    }
}
