//! Working-storage slots and the two ways of cycling them.
//!
//! A unit owns [`SLOT_COUNT`] slots. With prefetch, a scoped producer thread
//! fills free slots while the unit writes filled ones; slots travel between
//! the two over bounded channels, so at most `SLOT_COUNT` records are in
//! flight and acquisition blocks when both are taken. Without prefetch the
//! same slots are reused round-robin on the unit's own thread.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread;

use half::f16;

use super::writer::CellWriter;
use crate::error::{Result, ScatterError};
use crate::partition::UnitView;
use crate::types::COORD_CHUNK;

/// Slots per unit (double buffering).
pub(crate) const SLOT_COUNT: usize = 2;

/// One record's worth of working storage.
#[derive(Debug, Clone)]
pub(crate) struct Slot {
    pub(crate) features: Vec<f16>,
    pub(crate) coords: [u32; COORD_CHUNK],
    /// Global index of the pillar currently held.
    pub(crate) pillar: usize,
}

impl Slot {
    pub(crate) fn new(channels: usize) -> Self {
        Self {
            features: vec![f16::ZERO; channels],
            coords: [0; COORD_CHUNK],
            pillar: 0,
        }
    }
}

struct SlotRing {
    slots: [Slot; SLOT_COUNT],
    next: usize,
}

impl SlotRing {
    fn new(channels: usize) -> Self {
        Self {
            slots: std::array::from_fn(|_| Slot::new(channels)),
            next: 0,
        }
    }

    #[inline]
    fn acquire(&mut self) -> &mut Slot {
        &mut self.slots[self.next]
    }

    #[inline]
    fn release(&mut self) {
        self.next = (self.next + 1) % SLOT_COUNT;
    }
}

/// Fetch-then-write on the calling thread.
pub(super) fn run_sequential(view: &UnitView<'_>, writer: &mut CellWriter<'_>) -> Result<()> {
    let mut ring = SlotRing::new(view.channels());
    for p in 0..view.len() {
        let slot = ring.acquire();
        view.fetch(p, slot);
        writer.write(slot)?;
        ring.release();
    }
    Ok(())
}

/// Overlap the fetch of record `p + 1` with the write of record `p`.
pub(super) fn run_prefetched(view: &UnitView<'_>, writer: &mut CellWriter<'_>) -> Result<()> {
    let unit = view.range.unit;
    let count = view.len();

    let (filled_tx, filled_rx) = sync_channel::<Slot>(SLOT_COUNT);
    let (free_tx, free_rx) = sync_channel::<Slot>(SLOT_COUNT);
    for _ in 0..SLOT_COUNT {
        free_tx
            .send(Slot::new(view.channels()))
            .map_err(|_| ScatterError::SlotPoolExhausted { unit })?;
    }

    thread::scope(|scope| {
        scope.spawn(move || {
            for p in 0..count {
                // A closed channel means the writer aborted.
                let Ok(mut slot) = free_rx.recv() else {
                    return;
                };
                view.fetch(p, &mut slot);
                if filled_tx.send(slot).is_err() {
                    return;
                }
            }
        });

        let result = consume(unit, count, &filled_rx, &free_tx, writer);
        // Unblock the producer if we stopped early.
        drop(free_tx);
        drop(filled_rx);
        result
    })
}

fn consume(
    unit: usize,
    count: usize,
    filled: &Receiver<Slot>,
    free: &SyncSender<Slot>,
    writer: &mut CellWriter<'_>,
) -> Result<()> {
    for _ in 0..count {
        let slot = filled
            .recv()
            .map_err(|_| ScatterError::SlotPoolExhausted { unit })?;
        writer.write(&slot)?;
        // After the last fetch the producer is gone; nothing to return the slot to.
        let _ = free.send(slot);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_alternates() {
        let mut ring = SlotRing::new(4);
        ring.acquire().pillar = 10;
        ring.release();
        ring.acquire().pillar = 11;
        ring.release();
        assert_eq!(ring.acquire().pillar, 10);
        assert_eq!(ring.slots[1].pillar, 11);
    }

    #[test]
    fn test_slot_shape() {
        let slot = Slot::new(64);
        assert_eq!(slot.features.len(), 64);
        assert_eq!(slot.coords.len(), COORD_CHUNK);
    }
}
