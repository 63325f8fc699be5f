//! Reference scatter and grid comparison for validating results.

use half::f16;

use crate::error::{Result, ScatterError};
use crate::grid::SpatialGrid;
use crate::types::{GridCell, GridShape, PillarBatch, COL_FIELD, COORD_FIELDS, ROW_FIELD};

/// Straightforward single-threaded scatter, pillar by pillar.
///
/// Follows the same addressing as the parallel pipeline with checks off: the
/// flat offset is applied as computed, offsets past the grid are skipped, and
/// later pillars overwrite earlier ones.
pub fn reference_scatter(batch: &PillarBatch<'_>, shape: GridShape) -> Result<SpatialGrid> {
    shape.validate()?;
    batch.validate(&shape)?;

    let c = shape.channels;
    let mut grid = SpatialGrid::new(shape);
    let out = grid.as_mut_slice();
    for p in 0..batch.num_pillars() {
        let coord = &batch.coords()[p * COORD_FIELDS..(p + 1) * COORD_FIELDS];
        let Some(offset) = shape.cell_offset(coord[ROW_FIELD], coord[COL_FIELD]) else {
            continue;
        };
        out[offset..offset + c].copy_from_slice(&batch.features()[p * c..(p + 1) * c]);
    }
    Ok(grid)
}

/// Element-wise comparison of two grids.
#[derive(Debug, Clone, PartialEq)]
pub struct GridComparison {
    pub total_elements: usize,
    pub mismatched_elements: usize,
    /// Cells with at least one mismatching channel.
    pub mismatched_cells: usize,
    /// Largest finite absolute difference seen.
    pub max_abs_diff: f32,
    /// Mean of the finite absolute differences over all elements.
    pub mean_abs_diff: f64,
    /// First mismatching cell and channel in NHWC order.
    pub first_mismatch: Option<(GridCell, usize)>,
}

impl GridComparison {
    pub fn is_match(&self) -> bool {
        self.mismatched_elements == 0
    }

    pub fn match_ratio(&self) -> f64 {
        if self.total_elements == 0 {
            return 1.0;
        }
        1.0 - self.mismatched_elements as f64 / self.total_elements as f64
    }
}

/// Whether `a` and `b` agree within `tolerance` absolute plus `tolerance` relative to `b`.
///
/// Bitwise-equal values always agree; a NaN never agrees with anything else.
#[inline]
fn close(a: f16, b: f16, tolerance: f32) -> bool {
    if a.to_bits() == b.to_bits() {
        return true;
    }
    let (a, b) = (a.to_f32(), b.to_f32());
    (a - b).abs() <= tolerance + tolerance * b.abs()
}

/// Compare `actual` against `expected`; both must have the same shape.
pub fn compare_grids(
    actual: &SpatialGrid,
    expected: &SpatialGrid,
    tolerance: f32,
) -> Result<GridComparison> {
    let shape = expected.shape();
    if actual.shape() != shape {
        return Err(ScatterError::ShapeMismatch {
            expected: shape.len(),
            actual: actual.shape().len(),
        });
    }

    let mut cmp = GridComparison {
        total_elements: shape.len(),
        mismatched_elements: 0,
        mismatched_cells: 0,
        max_abs_diff: 0.0,
        mean_abs_diff: 0.0,
        first_mismatch: None,
    };
    let mut diff_sum = 0.0f64;

    let cells = actual
        .as_slice()
        .chunks_exact(shape.channels)
        .zip(expected.as_slice().chunks_exact(shape.channels));
    for (cell, (a_cell, e_cell)) in cells.enumerate() {
        let mut cell_bad = false;
        for (channel, (&a, &e)) in a_cell.iter().zip(e_cell).enumerate() {
            let diff = (a.to_f32() - e.to_f32()).abs();
            if diff.is_finite() {
                cmp.max_abs_diff = cmp.max_abs_diff.max(diff);
                diff_sum += f64::from(diff);
            }
            if close(a, e, tolerance) {
                continue;
            }
            cmp.mismatched_elements += 1;
            cell_bad = true;
            if cmp.first_mismatch.is_none() {
                let (row, col, _) = shape.decompose(cell * shape.channels);
                cmp.first_mismatch = Some((GridCell::new(row as u32, col as u32), channel));
            }
        }
        if cell_bad {
            cmp.mismatched_cells += 1;
        }
    }
    if cmp.total_elements > 0 {
        cmp.mean_abs_diff = diff_sum / cmp.total_elements as f64;
    }
    Ok(cmp)
}
