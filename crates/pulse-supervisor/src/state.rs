//! Lock-free supervisor state
//!
//! Shared between the monitor thread, the audio callback, the command bus
//! and status readers. Every transition scalar has a single writer per
//! transition (monitor pre-switch, callback at the switch), so plain
//! release/acquire atomics suffice — no locks anywhere near the callback.
//!
//! Counter cells are cache-line aligned to keep the callback's stores off
//! everyone else's lines.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use pulse_core::SlotId;

/// Two-phase failover scalars
#[derive(Debug)]
pub struct FailoverState {
    /// Which slot's ring the audio callback reads
    active_slot: AtomicUsize,
    /// Phase 1 intent: the callback should switch at the next boundary
    pending_switch: AtomicBool,
    target_slot: AtomicUsize,
    /// Phase 2: the switch happened; the monitor must clean up
    cleanup_pending: AtomicBool,
    failed_slot: AtomicUsize,
    /// The standby slot has published at least one buffer since respawn
    standby_ready: AtomicBool,
}

impl Default for FailoverState {
    fn default() -> Self {
        Self {
            active_slot: AtomicUsize::new(SlotId::Slot0.index()),
            pending_switch: AtomicBool::new(false),
            target_slot: AtomicUsize::new(SlotId::Slot1.index()),
            cleanup_pending: AtomicBool::new(false),
            failed_slot: AtomicUsize::new(SlotId::Slot0.index()),
            standby_ready: AtomicBool::new(false),
        }
    }
}

impl FailoverState {
    #[inline]
    pub fn active_slot(&self) -> SlotId {
        SlotId::from_index(self.active_slot.load(Ordering::Acquire)).unwrap_or(SlotId::Slot0)
    }

    #[inline]
    pub fn pending_switch(&self) -> bool {
        self.pending_switch.load(Ordering::Acquire)
    }

    #[inline]
    pub fn cleanup_pending(&self) -> bool {
        self.cleanup_pending.load(Ordering::Acquire)
    }

    #[inline]
    pub fn failed_slot(&self) -> SlotId {
        SlotId::from_index(self.failed_slot.load(Ordering::Acquire)).unwrap_or(SlotId::Slot0)
    }

    #[inline]
    pub fn standby_ready(&self) -> bool {
        self.standby_ready.load(Ordering::Acquire)
    }

    pub fn set_standby_ready(&self, ready: bool) {
        self.standby_ready.store(ready, Ordering::Release);
    }

    /// Monitor side, phase 1: schedule a boundary switch away from
    /// `failed` onto the other slot.
    pub fn request_switch(&self, failed: SlotId) {
        self.failed_slot.store(failed.index(), Ordering::Release);
        self.target_slot
            .store(failed.other().index(), Ordering::Release);
        self.pending_switch.store(true, Ordering::Release);
    }

    /// Callback side: complete a scheduled switch at the buffer boundary.
    /// Returns the new active slot when a switch was performed.
    #[inline]
    pub fn apply_pending_switch(&self) -> Option<SlotId> {
        if !self.pending_switch.load(Ordering::Acquire) {
            return None;
        }
        let target = self.target_slot.load(Ordering::Acquire);
        self.active_slot.store(target, Ordering::Release);
        self.pending_switch.store(false, Ordering::Release);
        self.cleanup_pending.store(true, Ordering::Release);
        SlotId::from_index(target)
    }

    /// Monitor side, phase 2 done: cleanup performed.
    pub fn clear_cleanup(&self) {
        self.cleanup_pending.store(false, Ordering::Release);
    }

    /// A command written now must reach both slots to survive the window.
    #[inline]
    pub fn in_failover_window(&self) -> bool {
        self.pending_switch() || self.cleanup_pending()
    }
}

/// One cache-line-aligned counter
#[derive(Debug, Default)]
#[repr(align(64))]
pub struct PaddedCounter(AtomicU64);

impl PaddedCounter {
    #[inline]
    pub fn bump(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Cold-read, hot-write metric cells
#[derive(Debug, Default)]
pub struct Metrics {
    /// Audio callback invocations
    pub buffers_processed: PaddedCounter,
    /// Callback reads that found the active ring empty
    pub none_reads: PaddedCounter,
    /// Commands accepted into the bus
    pub commands_sent: PaddedCounter,
    /// Boundary switches completed by the callback
    pub switches_performed: PaddedCounter,
    /// Failovers initiated by the monitor
    pub failover_count: PaddedCounter,
    /// Detection-to-switch latency of the last failover, microseconds
    pub last_failover_us: PaddedCounter,
}

/// Everything the supervisor's threads share
#[derive(Debug, Default)]
pub struct SupervisorShared {
    pub failover: FailoverState,
    pub metrics: Metrics,
    /// Worker pids per slot (0 = none), maintained by the monitor
    pub worker_pids: [AtomicU32; 2],
}

impl SupervisorShared {
    pub fn worker_pid(&self, slot: SlotId) -> Option<u32> {
        let pid = self.worker_pids[slot.index()].load(Ordering::Acquire);
        (pid != 0).then_some(pid)
    }

    pub fn set_worker_pid(&self, slot: SlotId, pid: Option<u32>) {
        self.worker_pids[slot.index()].store(pid.unwrap_or(0), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_phase_switch() {
        let state = FailoverState::default();
        assert_eq!(state.active_slot(), SlotId::Slot0);
        assert!(state.apply_pending_switch().is_none());

        state.request_switch(SlotId::Slot0);
        assert!(state.pending_switch());
        assert!(state.in_failover_window());
        // Monitor never touches active_slot directly.
        assert_eq!(state.active_slot(), SlotId::Slot0);

        // Callback completes the switch at the boundary.
        assert_eq!(state.apply_pending_switch(), Some(SlotId::Slot1));
        assert_eq!(state.active_slot(), SlotId::Slot1);
        assert!(!state.pending_switch());
        assert!(state.cleanup_pending());
        assert_eq!(state.failed_slot(), SlotId::Slot0);

        state.clear_cleanup();
        assert!(!state.in_failover_window());
    }

    #[test]
    fn test_padded_counter_alignment() {
        assert!(align_of::<PaddedCounter>() >= 64);
        assert!(size_of::<PaddedCounter>() >= 64);
    }
}
