//! Audio callback core
//!
//! The body of the sound-device callback, factored out so tests (and any
//! host without a device) can pull blocks directly. The contract is strict:
//! never allocate, never lock, never block, always fill the output.
//!
//! Per invocation: complete any scheduled slot switch at this boundary,
//! read near-latest from the active slot's ring, fall back to the held
//! last-good block on underrun.

use std::sync::Arc;

use pulse_core::Sample;
use pulse_shm::{AudioRing, SharedRegion};

use crate::SupervisorShared;

pub struct CallbackCore {
    rings: [AudioRing; 2],
    shared: Arc<SupervisorShared>,
    last_good: Vec<Sample>,
    keep_after_read: usize,
}

impl CallbackCore {
    pub fn new(region: Arc<SharedRegion>, shared: Arc<SupervisorShared>, keep_after_read: usize) -> Self {
        let last_good = vec![0.0; region.buffer_size()];
        Self {
            rings: [
                AudioRing::new(region.clone(), pulse_core::SlotId::Slot0),
                AudioRing::new(region, pulse_core::SlotId::Slot1),
            ],
            shared,
            last_good,
            keep_after_read,
        }
    }

    /// Render one block. `output` must be one buffer long.
    pub fn render(&mut self, output: &mut [Sample]) {
        debug_assert_eq!(output.len(), self.last_good.len());

        // Phase 2 of failover happens here, at the buffer boundary.
        if self.shared.failover.apply_pending_switch().is_some() {
            self.shared.metrics.switches_performed.bump();
        }

        let active = self.shared.failover.active_slot();
        match self.rings[active.index()].read_latest_keep(self.keep_after_read) {
            Some(view) => self.last_good.copy_from_slice(view),
            None => self.shared.metrics.none_reads.bump(),
        }

        output.copy_from_slice(&self.last_good);
        self.shared.metrics.buffers_processed.bump();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::{EngineConfig, SlotId};

    fn fixture() -> (tempfile::TempDir, Arc<SharedRegion>, Arc<SupervisorShared>, CallbackCore) {
        let dir = tempfile::tempdir().unwrap();
        let region =
            SharedRegion::create(&dir.path().join("cb.shm"), &EngineConfig::default()).unwrap();
        let shared = Arc::new(SupervisorShared::default());
        let core = CallbackCore::new(region.clone(), shared.clone(), 2);
        (dir, region, shared, core)
    }

    #[test]
    fn test_empty_ring_holds_last_good() {
        let (_dir, region, shared, mut core) = fixture();
        let b = region.buffer_size();
        let mut out = vec![1.0f32; b];

        // Nothing published yet: silence, counted as a none-read.
        core.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(shared.metrics.none_reads.get(), 1);

        // Publish one buffer, render it, then hold it across underruns.
        let ring = AudioRing::new(region, SlotId::Slot0);
        ring.write(&vec![0.5f32; b]);
        core.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.5));
        core.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.5), "last_good not held");
    }

    #[test]
    fn test_switch_happens_at_boundary() {
        let (_dir, region, shared, mut core) = fixture();
        let b = region.buffer_size();
        let slot0 = AudioRing::new(region.clone(), SlotId::Slot0);
        let slot1 = AudioRing::new(region, SlotId::Slot1);
        slot0.write(&vec![0.25f32; b]);
        slot1.write(&vec![0.75f32; b]);

        let mut out = vec![0.0f32; b];
        core.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.25));

        shared.failover.request_switch(SlotId::Slot0);
        core.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.75), "did not read standby");
        assert_eq!(shared.failover.active_slot(), SlotId::Slot1);
        assert!(shared.failover.cleanup_pending());
        assert_eq!(shared.metrics.switches_performed.get(), 1);
    }

    #[test]
    fn test_latest_wins_under_backlog() {
        let (_dir, region, _shared, mut core) = fixture();
        let b = region.buffer_size();
        let ring = AudioRing::new(region, SlotId::Slot0);
        for i in 0..8 {
            ring.write(&vec![i as f32; b]);
        }

        let mut out = vec![0.0f32; b];
        core.render(&mut out);
        // occupancy 8, keep 2 → consume the frame 3 behind head (value 5).
        assert!(out.iter().all(|&s| s == 5.0));
    }
}
