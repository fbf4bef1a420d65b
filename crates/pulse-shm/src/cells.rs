//! Per-slot control cells
//!
//! Small shared scalars next to the rings: the heartbeat counter (the only
//! cross-process liveness signal besides the process sentinel), the shutdown
//! request, and the wakeup hint.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use pulse_core::SlotId;

use crate::SharedRegion;

/// Monotonic per-slot heartbeat. The worker bumps it once per produced
/// buffer; the monitor only reads.
#[derive(Clone)]
pub struct Heartbeat {
    region: Arc<SharedRegion>,
    slot: SlotId,
}

impl Heartbeat {
    pub fn new(region: Arc<SharedRegion>, slot: SlotId) -> Self {
        Self { region, slot }
    }

    /// Worker side: advance the counter
    #[inline]
    pub fn beat(&self) {
        let off = self.region.layout().slot(self.slot).heartbeat;
        // SAFETY: layout offset.
        unsafe { self.region.atomic_u64(off) }.fetch_add(1, Ordering::Relaxed);
    }

    /// Monitor side: read the counter
    #[inline]
    pub fn value(&self) -> u64 {
        let off = self.region.layout().slot(self.slot).heartbeat;
        // SAFETY: layout offset.
        unsafe { self.region.atomic_u64(off) }.load(Ordering::Relaxed)
    }

    /// Supervisor side: zero before respawning the slot's worker
    pub fn reset(&self) {
        let off = self.region.layout().slot(self.slot).heartbeat;
        // SAFETY: layout offset.
        unsafe { self.region.atomic_u64(off) }.store(0, Ordering::Release);
    }
}

/// Graceful-shutdown request cell. The supervisor raises it; the worker
/// observes it at the top of its loop and exits after the current buffer.
#[derive(Clone)]
pub struct ShutdownFlag {
    region: Arc<SharedRegion>,
    slot: SlotId,
}

impl ShutdownFlag {
    pub fn new(region: Arc<SharedRegion>, slot: SlotId) -> Self {
        Self { region, slot }
    }

    pub fn request(&self) {
        let off = self.region.layout().slot(self.slot).shutdown;
        // SAFETY: layout offset.
        unsafe { self.region.atomic_bool(off) }.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_requested(&self) -> bool {
        let off = self.region.layout().slot(self.slot).shutdown;
        // SAFETY: layout offset.
        unsafe { self.region.atomic_bool(off) }.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        let off = self.region.layout().slot(self.slot).shutdown;
        // SAFETY: layout offset.
        unsafe { self.region.atomic_bool(off) }.store(false, Ordering::Release);
    }
}

/// Wakeup hint. Raised by the supervisor after writing commands; the worker
/// takes it at the top of its loop. Strictly a hint: the worker drains its
/// command ring on every iteration whether or not the hint fired, so missed
/// or coalesced wakeups are harmless.
#[derive(Clone)]
pub struct WakeupFlag {
    region: Arc<SharedRegion>,
    slot: SlotId,
}

impl WakeupFlag {
    pub fn new(region: Arc<SharedRegion>, slot: SlotId) -> Self {
        Self { region, slot }
    }

    pub fn set(&self) {
        let off = self.region.layout().slot(self.slot).wakeup;
        // SAFETY: layout offset.
        unsafe { self.region.atomic_bool(off) }.store(true, Ordering::Release);
    }

    /// Consume the hint if raised
    #[inline]
    pub fn take(&self) -> bool {
        let off = self.region.layout().slot(self.slot).wakeup;
        // SAFETY: layout offset.
        unsafe { self.region.atomic_bool(off) }.swap(false, Ordering::AcqRel)
    }

    pub fn clear(&self) {
        let off = self.region.layout().slot(self.slot).wakeup;
        // SAFETY: layout offset.
        unsafe { self.region.atomic_bool(off) }.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::EngineConfig;

    #[test]
    fn test_cells_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let region =
            SharedRegion::create(&dir.path().join("cells.shm"), &EngineConfig::default()).unwrap();

        let hb = Heartbeat::new(region.clone(), SlotId::Slot0);
        assert_eq!(hb.value(), 0);
        hb.beat();
        hb.beat();
        assert_eq!(hb.value(), 2);
        hb.reset();
        assert_eq!(hb.value(), 0);

        let shutdown = ShutdownFlag::new(region.clone(), SlotId::Slot1);
        assert!(!shutdown.is_requested());
        shutdown.request();
        assert!(shutdown.is_requested());
        shutdown.clear();
        assert!(!shutdown.is_requested());

        let wakeup = WakeupFlag::new(region, SlotId::Slot1);
        assert!(!wakeup.take());
        wakeup.set();
        assert!(wakeup.take());
        assert!(!wakeup.take());
    }

    #[test]
    fn test_slots_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let region =
            SharedRegion::create(&dir.path().join("cells2.shm"), &EngineConfig::default()).unwrap();

        let hb0 = Heartbeat::new(region.clone(), SlotId::Slot0);
        let hb1 = Heartbeat::new(region, SlotId::Slot1);
        hb0.beat();
        assert_eq!(hb0.value(), 1);
        assert_eq!(hb1.value(), 0);
    }
}
