//! Destination step: coordinate decode, cell claim, bulk copy.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU8, Ordering};

use half::f16;

use super::slots::Slot;
use crate::error::{Result, ScatterError};
use crate::types::{GridShape, COL_FIELD, ROW_FIELD};

/// Destination buffer shared by all units of one invocation.
///
/// Units write disjoint cells; disjointness comes from [`CellClaims`] or from
/// the caller of `scatter_unchecked`.
pub(crate) struct SharedGrid<'a> {
    ptr: *mut f16,
    len: usize,
    _marker: PhantomData<&'a mut [f16]>,
}

// SAFETY: access goes through `write_cell`, whose contract forbids
// concurrent access to the same cell.
unsafe impl Send for SharedGrid<'_> {}
unsafe impl Sync for SharedGrid<'_> {}

impl<'a> SharedGrid<'a> {
    pub(crate) fn new(dest: &'a mut [f16]) -> Self {
        Self {
            ptr: dest.as_mut_ptr(),
            len: dest.len(),
            _marker: PhantomData,
        }
    }

    /// Copy `values` into cell `cell` (offset `cell * values.len()`).
    ///
    /// # Safety
    /// `(cell + 1) * values.len()` must not exceed the destination length, and
    /// no other thread may access the same cell while this runs.
    #[inline]
    pub(crate) unsafe fn write_cell(&self, cell: usize, values: &[f16]) {
        let offset = cell * values.len();
        debug_assert!(
            offset + values.len() <= self.len,
            "cell {cell} outside destination of {} elements",
            self.len
        );
        std::ptr::copy_nonoverlapping(values.as_ptr(), self.ptr.add(offset), values.len());
    }
}

/// Outcome of claiming a cell for a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Claim {
    /// First write to the cell in this invocation.
    Fresh,
    /// The same unit wrote the cell before.
    Own,
    /// Another unit owns the cell.
    Other(usize),
}

/// Per-invocation cell ownership, one byte per cell (0 = unclaimed, else unit + 1).
pub(crate) struct CellClaims {
    owners: Vec<AtomicU8>,
}

impl CellClaims {
    pub(crate) fn new(num_cells: usize) -> Self {
        Self {
            owners: (0..num_cells).map(|_| AtomicU8::new(0)).collect(),
        }
    }

    #[inline]
    pub(crate) fn claim(&self, cell: usize, unit: usize) -> Claim {
        debug_assert!(unit < u8::MAX as usize, "unit id does not fit a claim tag");
        let tag = unit as u8 + 1;
        match self.owners[cell].compare_exchange(0, tag, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => Claim::Fresh,
            Err(owner) if owner == tag => Claim::Own,
            Err(owner) => Claim::Other(owner as usize - 1),
        }
    }
}

/// Per-unit writer with its counters.
pub(crate) struct CellWriter<'a> {
    unit: usize,
    shape: GridShape,
    grid: &'a SharedGrid<'a>,
    claims: Option<&'a CellClaims>,
    check_bounds: bool,
    reject_collisions: bool,
    pub(crate) written: usize,
    pub(crate) dropped_out_of_range: usize,
    pub(crate) cross_unit_collisions: usize,
}

impl<'a> CellWriter<'a> {
    pub(crate) fn new(
        unit: usize,
        shape: GridShape,
        grid: &'a SharedGrid<'a>,
        claims: Option<&'a CellClaims>,
        check_bounds: bool,
        reject_collisions: bool,
    ) -> Self {
        Self {
            unit,
            shape,
            grid,
            claims,
            check_bounds,
            reject_collisions,
            written: 0,
            dropped_out_of_range: 0,
            cross_unit_collisions: 0,
        }
    }

    /// Compute the destination of `slot` and bulk-copy its features there.
    #[cfg_attr(feature = "profiling", inline(never))]
    pub(crate) fn write(&mut self, slot: &Slot) -> Result<()> {
        let row = slot.coords[ROW_FIELD];
        let col = slot.coords[COL_FIELD];

        if self.check_bounds && !self.shape.contains(row, col) {
            return Err(ScatterError::OutOfBounds {
                pillar: slot.pillar,
                row,
                col,
                shape: self.shape,
            });
        }

        let Some(cell) = self.shape.cell_index(row, col) else {
            tracing::trace!(pillar = slot.pillar, row, col, "dropping pillar past grid end");
            self.dropped_out_of_range += 1;
            return Ok(());
        };

        if let Some(claims) = self.claims {
            match claims.claim(cell, self.unit) {
                Claim::Fresh => {}
                Claim::Own if !self.reject_collisions => {}
                Claim::Other(owner) if !self.reject_collisions => {
                    tracing::trace!(pillar = slot.pillar, row, col, owner, "cell owned by another unit");
                    self.cross_unit_collisions += 1;
                    return Ok(());
                }
                Claim::Own | Claim::Other(_) => {
                    return Err(ScatterError::Collision {
                        pillar: slot.pillar,
                        row,
                        col,
                    });
                }
            }
        }

        // SAFETY: `cell_index` keeps `cell` below `H * W` and the destination
        // holds `H * W * C` elements. The cell is claimed by this unit, or the
        // caller of `scatter_unchecked` guarantees no other unit addresses it.
        unsafe { self.grid.write_cell(cell, &slot.features) };
        self.written += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims() {
        let claims = CellClaims::new(4);
        assert_eq!(claims.claim(2, 0), Claim::Fresh);
        assert_eq!(claims.claim(2, 0), Claim::Own);
        assert_eq!(claims.claim(2, 3), Claim::Other(0));
        assert_eq!(claims.claim(3, 254), Claim::Fresh);
        assert_eq!(claims.claim(3, 0), Claim::Other(254));
    }

    fn slot_at(row: u32, col: u32, value: f32, channels: usize) -> Slot {
        let mut slot = Slot::new(channels);
        slot.features.fill(f16::from_f32(value));
        slot.coords[ROW_FIELD] = row;
        slot.coords[COL_FIELD] = col;
        slot
    }

    #[test]
    fn test_writer_last_write_wins_within_unit() {
        let shape = GridShape::new(2, 2, 2);
        let mut dest = vec![f16::ZERO; shape.len()];
        {
            let grid = SharedGrid::new(&mut dest);
            let claims = CellClaims::new(shape.num_cells());
            let mut writer = CellWriter::new(0, shape, &grid, Some(&claims), false, false);
            writer.write(&slot_at(1, 0, 1.0, 2)).unwrap();
            writer.write(&slot_at(1, 0, 2.0, 2)).unwrap();
            assert_eq!(writer.written, 2);
        }
        assert_eq!(&dest[4..6], &[f16::from_f32(2.0); 2]);
    }

    #[test]
    fn test_writer_drops_past_end() {
        let shape = GridShape::new(2, 2, 2);
        let mut dest = vec![f16::ZERO; shape.len()];
        let grid = SharedGrid::new(&mut dest);
        let mut writer = CellWriter::new(0, shape, &grid, None, false, false);
        writer.write(&slot_at(2, 0, 1.0, 2)).unwrap();
        writer.write(&slot_at(0, u32::MAX, 1.0, 2)).unwrap();
        assert_eq!(writer.dropped_out_of_range, 2);
        assert_eq!(writer.written, 0);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "outside destination")]
    fn test_write_cell_past_end_caught_in_debug() {
        let mut dest = vec![f16::ZERO; 8];
        let grid = SharedGrid::new(&mut dest);
        // SAFETY: never reached; the debug check fires first.
        unsafe { grid.write_cell(4, &[f16::ONE; 2]) };
    }

    #[test]
    fn test_write_cell_last_cell() {
        let mut dest = vec![f16::ZERO; 8];
        {
            let grid = SharedGrid::new(&mut dest);
            // SAFETY: cell 3 of 2 channels ends exactly at the destination end.
            unsafe { grid.write_cell(3, &[f16::ONE; 2]) };
        }
        assert_eq!(&dest[6..], &[f16::ONE; 2]);
        assert!(dest[..6].iter().all(|v| v.to_bits() == 0));
    }

    #[test]
    fn test_writer_bounds_check() {
        let shape = GridShape::new(2, 2, 2);
        let mut dest = vec![f16::ZERO; shape.len()];
        let grid = SharedGrid::new(&mut dest);
        let mut writer = CellWriter::new(0, shape, &grid, None, true, false);
        // In range of the flat buffer, but col >= W.
        let err = writer.write(&slot_at(0, 2, 1.0, 2)).unwrap_err();
        assert!(matches!(err, ScatterError::OutOfBounds { row: 0, col: 2, .. }));
    }

    #[test]
    fn test_writer_collision_rejection() {
        let shape = GridShape::new(2, 2, 2);
        let mut dest = vec![f16::ZERO; shape.len()];
        let grid = SharedGrid::new(&mut dest);
        let claims = CellClaims::new(shape.num_cells());
        let mut writer = CellWriter::new(1, shape, &grid, Some(&claims), false, true);
        writer.write(&slot_at(0, 1, 1.0, 2)).unwrap();
        let err = writer.write(&slot_at(0, 1, 2.0, 2)).unwrap_err();
        assert!(matches!(err, ScatterError::Collision { row: 0, col: 1, .. }));
    }
}
