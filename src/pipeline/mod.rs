//! Per-unit transfer pipeline.
//!
//! Each unit repeats acquire / transfer in / compute and write / release for
//! every pillar of its range. Units share only the destination grid.

mod slots;
mod writer;

pub(crate) use slots::Slot;
pub(crate) use writer::{CellClaims, SharedGrid};

use writer::CellWriter;

use crate::error::Result;
use crate::partition::UnitView;
use crate::timing::UnitClock;
use crate::types::GridShape;
use crate::{ScatterConfig, UnitReport};

/// Everything one unit needs to run its range.
pub(crate) struct UnitTask<'a> {
    pub(crate) view: UnitView<'a>,
    pub(crate) shape: GridShape,
    pub(crate) grid: &'a SharedGrid<'a>,
    pub(crate) claims: Option<&'a CellClaims>,
    pub(crate) config: &'a ScatterConfig,
}

pub(crate) fn run_unit(task: UnitTask<'_>) -> Result<UnitReport> {
    let clock = UnitClock::start();
    let range = task.view.range;

    let mut writer = CellWriter::new(
        range.unit,
        task.shape,
        task.grid,
        task.claims,
        task.config.check_bounds,
        task.config.reject_collisions,
    );

    // A single record has nothing to overlap with.
    let result = if task.config.prefetch && task.view.len() > 1 {
        slots::run_prefetched(&task.view, &mut writer)
    } else {
        slots::run_sequential(&task.view, &mut writer)
    };

    if let Err(err) = result {
        tracing::warn!(unit = range.unit, error = %err, "compute unit aborted");
        return Err(err);
    }

    let report = UnitReport {
        range,
        written: writer.written,
        dropped_out_of_range: writer.dropped_out_of_range,
        cross_unit_collisions: writer.cross_unit_collisions,
        elapsed: clock.elapsed(),
    };
    tracing::debug!(
        unit = range.unit,
        start = range.start,
        end = range.end,
        written = report.written,
        "compute unit finished"
    );
    Ok(report)
}
