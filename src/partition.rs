//! Work partitioning across compute units.
//!
//! Pillars are split into contiguous ranges by ceiling division, one range per
//! unit. Every unit except possibly the trailing ones gets exactly
//! `ceil(N / U)` pillars; the remainder shrinks the final non-empty range.

use std::ops::Range;

use half::f16;

use crate::pipeline::Slot;
use crate::types::{PillarBatch, COORD_CHUNK, COORD_FIELDS, COORD_SLACK};

/// Half-open pillar range `[start, end)` owned by one compute unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkRange {
    pub unit: usize,
    pub start: usize,
    pub end: usize,
}

impl WorkRange {
    #[inline]
    pub fn count(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    #[inline]
    pub fn as_range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// `ceil(n / units)`; zero units own nothing.
#[inline]
pub fn pillars_per_unit(n: usize, units: usize) -> usize {
    if units == 0 {
        return 0;
    }
    n.div_ceil(units)
}

/// Range owned by `unit` out of `units` for `n` pillars.
///
/// Units past the end of the pillar space get an empty range at `n`.
pub fn work_range(n: usize, unit: usize, units: usize) -> WorkRange {
    let per = pillars_per_unit(n, units);
    let start = unit.saturating_mul(per).min(n);
    let end = start.saturating_add(per).min(n);
    WorkRange { unit, start, end }
}

/// Ranges for every unit, in unit order.
pub fn partition(n: usize, units: usize) -> Vec<WorkRange> {
    (0..units).map(|u| work_range(n, u, units)).collect()
}

/// A unit's view into the shared input buffers.
///
/// Features are shifted by `start * C`; coordinates by `start * 4` and extended
/// by [`COORD_SLACK`] words (clamped to the buffer) so the final record can
/// still be fetched as a full chunk.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UnitView<'a> {
    pub(crate) range: WorkRange,
    features: &'a [f16],
    coords: &'a [u32],
    channels: usize,
}

impl<'a> UnitView<'a> {
    /// The batch must already be validated against `channels`.
    pub(crate) fn new(range: WorkRange, batch: &PillarBatch<'a>, channels: usize) -> Self {
        let features = &batch.features()[range.start * channels..range.end * channels];

        let all_coords = batch.coords();
        let coord_start = range.start * COORD_FIELDS;
        let coord_end = (coord_start + range.count() * COORD_FIELDS + COORD_SLACK).min(all_coords.len());
        let coords = &all_coords[coord_start..coord_end];

        Self {
            range,
            features,
            coords,
            channels,
        }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.range.count()
    }

    #[inline]
    pub(crate) fn channels(&self) -> usize {
        self.channels
    }

    /// Transfer-in step: copy relative pillar `p` into `slot`.
    ///
    /// The coordinate chunk is always [`COORD_CHUNK`] words; words past the
    /// end of the view read as zero.
    #[cfg_attr(feature = "profiling", inline(never))]
    pub(crate) fn fetch(&self, p: usize, slot: &mut Slot) {
        let c = self.channels;
        slot.features.copy_from_slice(&self.features[p * c..(p + 1) * c]);

        let base = p * COORD_FIELDS;
        let avail = self.coords.len().saturating_sub(base).min(COORD_CHUNK);
        slot.coords[..avail].copy_from_slice(&self.coords[base..base + avail]);
        slot.coords[avail..].fill(0);

        slot.pillar = self.range.start + p;
    }
}
