//! Monitor thread
//!
//! Runs on a ~10 ms cadence. Watches each slot's process sentinel and
//! heartbeat, schedules failover (phase 1) when the active slot dies or
//! stalls, performs post-switch cleanup (phase 2) after the callback has
//! flipped, respawns failed standbys, and maintains standby readiness.
//!
//! Heartbeat checks are suspended for a slot during its startup grace
//! period; process-exit detection never is.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use pulse_core::{EngineConfig, SlotId};
use pulse_shm::SharedRegion;

use crate::{SlotRings, SupervisorShared, WorkerProcess};

/// Repeat failure detections inside this window are ignored
const FAILURE_DEBOUNCE: Duration = Duration::from_secs(1);

struct MonitorSlot {
    rings: SlotRings,
    worker: Option<WorkerProcess>,
    last_heartbeat: u64,
    last_heartbeat_time: Instant,
}

pub(crate) struct Monitor {
    region_path: PathBuf,
    config: EngineConfig,
    shared: Arc<SupervisorShared>,
    stop: Arc<AtomicBool>,
    slots: [MonitorSlot; 2],
    last_failure_action: Option<Instant>,
    failover_detect_time: Option<Instant>,
}

impl Monitor {
    pub(crate) fn new(
        region: Arc<SharedRegion>,
        config: EngineConfig,
        shared: Arc<SupervisorShared>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let region_path = region.path().to_path_buf();
        let slot = |id: SlotId| MonitorSlot {
            rings: SlotRings::new(region.clone(), id),
            worker: None,
            last_heartbeat: 0,
            last_heartbeat_time: Instant::now(),
        };
        Self {
            region_path,
            config,
            shared,
            stop,
            slots: [slot(SlotId::Slot0), slot(SlotId::Slot1)],
            last_failure_action: None,
            failover_detect_time: None,
        }
    }

    pub(crate) fn run(mut self) {
        log::info!("monitor thread started");

        // Both slots get a worker up front; slot0 starts active.
        self.respawn(SlotId::Slot0);
        self.respawn(SlotId::Slot1);

        while !self.stop.load(Ordering::Acquire) {
            if self.shared.failover.cleanup_pending() {
                self.post_switch_cleanup();
            }
            self.check_processes();
            self.check_heartbeats();
            self.update_standby_ready();
            std::thread::sleep(self.config.monitor_period);
        }

        // Orderly shutdown: both workers, graceful then forced.
        for slot in [SlotId::Slot0, SlotId::Slot1] {
            let state = &mut self.slots[slot.index()];
            if let Some(worker) = state.worker.take() {
                self.shared.set_worker_pid(slot, None);
                worker.terminate(&state.rings.shutdown);
            }
        }
        log::info!("monitor thread stopped");
    }

    /// Terminate (if alive), reset the slot's shared cells, spawn a fresh
    /// worker into the same rings.
    fn respawn(&mut self, slot: SlotId) {
        let state = &mut self.slots[slot.index()];

        if let Some(worker) = state.worker.take() {
            self.shared.set_worker_pid(slot, None);
            worker.terminate(&state.rings.shutdown);
        }
        state.rings.reset_for_respawn();

        match WorkerProcess::spawn(slot, &self.region_path) {
            Ok(worker) => {
                self.shared.set_worker_pid(slot, Some(worker.pid()));
                state.worker = Some(worker);
            }
            Err(e) => {
                log::error!("failed to spawn worker for {slot}: {e}");
            }
        }

        state.last_heartbeat = 0;
        state.last_heartbeat_time = Instant::now();
        if slot != self.shared.failover.active_slot() {
            self.shared.failover.set_standby_ready(false);
        }
    }

    /// Phase 2: the callback flipped slots; retire the failed worker and
    /// respawn it into the same slot.
    fn post_switch_cleanup(&mut self) {
        let failed = self.shared.failover.failed_slot();
        log::info!("post-switch cleanup for failed {failed}");

        if let Some(detected) = self.failover_detect_time.take() {
            self.shared
                .metrics
                .last_failover_us
                .set(detected.elapsed().as_micros() as u64);
        }

        self.shared.failover.set_standby_ready(false);
        self.respawn(failed);
        self.shared.failover.clear_cleanup();
    }

    fn debounced(&mut self) -> bool {
        if let Some(last) = self.last_failure_action {
            if last.elapsed() < FAILURE_DEBOUNCE {
                return true;
            }
        }
        self.last_failure_action = Some(Instant::now());
        false
    }

    fn handle_active_failure(&mut self, slot: SlotId, reason: &str) {
        if self.debounced() {
            return;
        }
        let detected = Instant::now();

        if self.shared.failover.standby_ready() {
            log::warn!("active {slot} failed ({reason}); scheduling failover");
            self.failover_detect_time = Some(detected);
            self.shared.failover.request_switch(slot);
            self.shared.metrics.failover_count.bump();
        } else {
            // Degraded: no standby to switch to. The callback keeps emitting
            // last_good; respawn in place and wait for the first buffer.
            log::error!("active {slot} failed ({reason}) with no standby; degraded");
            self.respawn(slot);
        }
    }

    fn handle_standby_failure(&mut self, slot: SlotId, reason: &str) {
        if self.debounced() {
            return;
        }
        log::warn!("standby {slot} failed ({reason}); respawning");
        self.shared.failover.set_standby_ready(false);
        self.respawn(slot);
    }

    /// True when `slot` is already scheduled for post-switch cleanup; the
    /// cleanup pass owns it, nothing else should respawn it.
    fn awaiting_cleanup(&self, slot: SlotId) -> bool {
        self.shared.failover.cleanup_pending() && self.shared.failover.failed_slot() == slot
    }

    /// Process-exit sentinel. Always active, grace period or not.
    fn check_processes(&mut self) {
        for slot in [SlotId::Slot0, SlotId::Slot1] {
            if self.awaiting_cleanup(slot) {
                continue;
            }
            if self.slots[slot.index()].worker.is_none() {
                // A previous spawn failed; keep retrying at the debounce rate.
                if !self.debounced() {
                    log::warn!("{slot} has no worker; spawning");
                    self.respawn(slot);
                }
                continue;
            }
            let exited = match &mut self.slots[slot.index()].worker {
                Some(worker) => worker.has_exited(),
                None => false,
            };
            if !exited {
                continue;
            }

            let active = self.shared.failover.active_slot();
            if slot == active && !self.shared.failover.pending_switch() {
                self.handle_active_failure(slot, "process exited");
            } else if slot != active {
                self.handle_standby_failure(slot, "process exited");
            }
        }
    }

    /// Heartbeat stall detection, suspended during each slot's grace period.
    fn check_heartbeats(&mut self) {
        let now = Instant::now();
        let active = self.shared.failover.active_slot();

        for slot in [SlotId::Slot0, SlotId::Slot1] {
            if self.awaiting_cleanup(slot) {
                continue;
            }
            let state = &mut self.slots[slot.index()];
            let Some(worker) = &state.worker else {
                continue;
            };

            let heartbeat = state.rings.heartbeat.value();
            if heartbeat != state.last_heartbeat {
                state.last_heartbeat = heartbeat;
                state.last_heartbeat_time = now;
                continue;
            }

            if worker.spawn_time.elapsed() < self.config.startup_grace {
                // One-time setup may legitimately stall the heartbeat here.
                state.last_heartbeat_time = now;
                continue;
            }

            if now.duration_since(state.last_heartbeat_time) > self.config.heartbeat_timeout {
                if slot == active && !self.shared.failover.pending_switch() {
                    self.handle_active_failure(slot, "heartbeat stalled");
                } else if slot != active {
                    self.handle_standby_failure(slot, "heartbeat stalled");
                }
            }
        }
    }

    /// Standby readiness: the non-active slot has a live worker that has
    /// published at least one buffer since its respawn.
    fn update_standby_ready(&mut self) {
        let standby = self.shared.failover.active_slot().other();
        let state = &self.slots[standby.index()];
        let ready = state.worker.is_some() && state.rings.audio.has_published();

        if ready && !self.shared.failover.standby_ready() {
            log::info!("standby {standby} ready for failover");
            self.shared.failover.set_standby_ready(true);
        }
    }
}
