//! Per-unit wall clock, compiled down to nothing unless `timing` is enabled.

use std::time::Duration;
#[cfg(feature = "timing")]
use std::time::Instant;

/// Started when a compute unit picks up its range.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UnitClock {
    #[cfg(feature = "timing")]
    started: Instant,
}

impl UnitClock {
    #[inline(always)]
    pub(crate) fn start() -> Self {
        Self {
            #[cfg(feature = "timing")]
            started: Instant::now(),
        }
    }

    /// Time since [`UnitClock::start`]; always zero without `timing`.
    #[inline(always)]
    pub(crate) fn elapsed(&self) -> Duration {
        #[cfg(feature = "timing")]
        {
            self.started.elapsed()
        }
        #[cfg(not(feature = "timing"))]
        {
            Duration::ZERO
        }
    }
}
