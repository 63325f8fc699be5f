//! Pillar scatter: sparse pillar features into a dense BEV grid.
//!
//! Each pillar carries a feature vector of `C` half-precision values and a
//! `{batch, row, col, reserved}` coordinate record. Scattering writes every
//! vector into the `(row, col)` cell of an NHWC `[H, W, C]` grid; cells no
//! pillar addresses stay zero.
//!
//! The work is split into contiguous pillar ranges, one per compute unit.
//! Units run in parallel and each moves its records through a double-buffered
//! fetch / write pipeline.
//!
//! # Example
//!
//! ```
//! use half::f16;
//! use pillar_scatter::{scatter, CoordBuffer, CoordRecord, GridShape, PillarBatch, ScatterConfig, SpatialGrid};
//!
//! let shape = GridShape::new(2, 2, 4);
//! let features: Vec<f16> = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]
//!     .iter()
//!     .map(|&v| f16::from_f32(v))
//!     .collect();
//! let coords = CoordBuffer::from_records(&[CoordRecord::new(0, 0), CoordRecord::new(1, 1)]);
//!
//! let mut grid = SpatialGrid::new(shape);
//! let batch = PillarBatch::from_buffer(&features, &coords);
//! let report = scatter(&batch, &mut grid, ScatterConfig::default()).expect("scatter should succeed");
//!
//! assert_eq!(report.written(), 2);
//! assert_eq!(grid.cell(1, 1).unwrap()[0], f16::from_f32(5.0));
//! assert!(grid.cell(1, 0).unwrap().iter().all(|v| v.to_bits() == 0));
//! ```

macro_rules! maybe_par_into_iter {
    ($v:expr) => {{
        #[cfg(feature = "parallel")]
        {
            $v.into_par_iter()
        }
        #[cfg(not(feature = "parallel"))]
        {
            $v.into_iter()
        }
    }};
}

mod error;
mod grid;
pub mod host;
mod partition;
mod pipeline;
mod timing;
mod types;
pub mod verify;

use std::time::Duration;

use half::f16;
#[cfg(feature = "parallel")]
use rayon::prelude::*;

pub use error::{Result, ScatterError};
pub use grid::SpatialGrid;
pub use partition::{partition, pillars_per_unit, work_range, WorkRange};
pub use types::{
    CoordBuffer, CoordRecord, GridCell, GridShape, PillarBatch, COL_FIELD, COORD_CHUNK,
    COORD_FIELDS, COORD_SLACK, DEFAULT_GRID_EXTENT, PILLAR_FEATURE_SIZE, ROW_FIELD,
};

use partition::UnitView;
use pipeline::{CellClaims, SharedGrid, UnitTask};

/// Default number of compute units.
pub const DEFAULT_UNITS: usize = 8;

/// Largest supported unit count (unit ids are tracked in one byte per cell).
pub const MAX_UNITS: usize = u8::MAX as usize;

/// Configuration for a scatter invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScatterConfig {
    /// Number of compute units the pillars are partitioned across.
    pub units: usize,
    /// Overlap each unit's next fetch with its current write.
    ///
    /// Results are identical either way; disabling runs every unit as a plain
    /// fetch-then-write loop on its own thread.
    pub prefetch: bool,
    /// Reject pillars with `row >= H` or `col >= W`, aborting their unit.
    ///
    /// When disabled, the flat NHWC offset is used as computed: a column past
    /// the row end lands in the next row, and a pillar whose offset leaves the
    /// grid is dropped and counted in [`UnitReport::dropped_out_of_range`].
    pub check_bounds: bool,
    /// Reject any second write to a cell, aborting the unit that attempts it.
    ///
    /// When disabled, a unit overwrites its own cells (last write wins) and
    /// skips cells another unit already owns.
    pub reject_collisions: bool,
}

impl Default for ScatterConfig {
    fn default() -> Self {
        Self {
            units: DEFAULT_UNITS,
            prefetch: true,
            check_bounds: false,
            reject_collisions: false,
        }
    }
}

impl ScatterConfig {
    pub fn with_units(mut self, units: usize) -> Self {
        self.units = units;
        self
    }

    pub fn with_prefetch(mut self, prefetch: bool) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn with_bounds_check(mut self, check_bounds: bool) -> Self {
        self.check_bounds = check_bounds;
        self
    }

    pub fn with_collision_rejection(mut self, reject_collisions: bool) -> Self {
        self.reject_collisions = reject_collisions;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.units == 0 || self.units > MAX_UNITS {
            return Err(ScatterError::InvalidUnitCount { units: self.units });
        }
        Ok(())
    }
}

/// What one compute unit did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    pub range: WorkRange,
    /// Pillars copied into the grid (repeated cells count each time).
    pub written: usize,
    /// Pillars whose flat offset fell past the end of the grid.
    pub dropped_out_of_range: usize,
    /// Pillars skipped because another unit owns their cell.
    pub cross_unit_collisions: usize,
    /// Wall time of the unit (zero unless the `timing` feature is enabled).
    pub elapsed: Duration,
}

/// Result of a scatter invocation, one entry per unit in unit order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScatterReport {
    pub shape: GridShape,
    pub num_pillars: usize,
    pub units: Vec<UnitReport>,
}

impl ScatterReport {
    pub fn written(&self) -> usize {
        self.units.iter().map(|u| u.written).sum()
    }

    pub fn dropped_out_of_range(&self) -> usize {
        self.units.iter().map(|u| u.dropped_out_of_range).sum()
    }

    pub fn cross_unit_collisions(&self) -> usize {
        self.units.iter().map(|u| u.cross_unit_collisions).sum()
    }

    /// Returns true if every pillar was written.
    pub fn is_clean(&self) -> bool {
        self.dropped_out_of_range() == 0 && self.cross_unit_collisions() == 0
    }

    /// Longest unit wall time.
    pub fn slowest_unit(&self) -> Duration {
        self.units.iter().map(|u| u.elapsed).max().unwrap_or_default()
    }
}

/// Scatter `batch` into an owned grid.
pub fn scatter(
    batch: &PillarBatch<'_>,
    grid: &mut SpatialGrid,
    config: ScatterConfig,
) -> Result<ScatterReport> {
    let shape = grid.shape();
    scatter_into(batch, shape, grid.as_mut_slice(), config)
}

/// Scatter `batch` into a caller-provided NHWC buffer of `shape.len()` elements.
///
/// The buffer should be zeroed beforehand; cells no pillar addresses are left
/// untouched. Cross-unit writes to the same cell are arbitrated per cell, so
/// any coordinates are safe: the first unit to reach a cell keeps it.
pub fn scatter_into(
    batch: &PillarBatch<'_>,
    shape: GridShape,
    dest: &mut [f16],
    config: ScatterConfig,
) -> Result<ScatterReport> {
    scatter_impl(batch, shape, dest, config, true)
}

/// Like [`scatter_into`] without cross-unit cell arbitration.
///
/// Writes are still kept inside `dest`. Collision rejection, when enabled,
/// reinstates arbitration.
///
/// # Safety
/// No two pillars in different units' ranges (see [`partition`]) may address
/// the same cell, after the flat offset is applied. Otherwise two threads may
/// write the same memory concurrently.
pub unsafe fn scatter_unchecked(
    batch: &PillarBatch<'_>,
    shape: GridShape,
    dest: &mut [f16],
    config: ScatterConfig,
) -> Result<ScatterReport> {
    scatter_impl(batch, shape, dest, config, false)
}

fn scatter_impl(
    batch: &PillarBatch<'_>,
    shape: GridShape,
    dest: &mut [f16],
    config: ScatterConfig,
    arbitrate: bool,
) -> Result<ScatterReport> {
    config.validate()?;
    shape.validate()?;
    batch.validate(&shape)?;
    if dest.len() != shape.len() {
        return Err(ScatterError::ShapeMismatch {
            expected: shape.len(),
            actual: dest.len(),
        });
    }

    let n = batch.num_pillars();
    tracing::debug!(
        pillars = n,
        units = config.units,
        %shape,
        prefetch = config.prefetch,
        "scattering pillars"
    );

    let ranges = partition(n, config.units);
    let claims = (arbitrate || config.reject_collisions).then(|| CellClaims::new(shape.num_cells()));
    let grid = SharedGrid::new(dest);

    let results: Vec<Result<UnitReport>> = maybe_par_into_iter!(ranges)
        .map(|range| {
            pipeline::run_unit(UnitTask {
                view: UnitView::new(range, batch, shape.channels),
                shape,
                grid: &grid,
                claims: claims.as_ref(),
                config: &config,
            })
        })
        .collect();

    let units = results.into_iter().collect::<Result<Vec<_>>>()?;
    let report = ScatterReport {
        shape,
        num_pillars: n,
        units,
    };
    if !report.is_clean() {
        tracing::warn!(
            dropped = report.dropped_out_of_range(),
            collisions = report.cross_unit_collisions(),
            "some pillars were not written"
        );
    }
    Ok(report)
}
