//! Worker render loop
//!
//! One isolated process per slot. Each iteration: take the wakeup hint (a
//! hint only — the command ring is drained every pass regardless), render
//! any due buffers, bump the heartbeat, then pace to the next absolute
//! deadline with a coarse sleep followed by a short spin window.
//!
//! Deadlines are absolute (`start + k·period`) so jitter never accumulates;
//! catch-up after a stall is bounded, and a hopeless backlog re-anchors the
//! clock instead of flooding the ring.

use std::sync::Arc;
use std::time::{Duration, Instant};

use pulse_core::{EngineConfig, SlotId};
use pulse_shm::{AudioRing, CmdRing, Heartbeat, SharedRegion, ShutdownFlag, WakeupFlag};

use crate::{ModuleHost, build_default_patch};

/// Start of the spin window before a deadline
const SPIN_MARGIN: Duration = Duration::from_millis(1);

/// Start of the coarse-sleep phase before a deadline
const COARSE_MARGIN: Duration = Duration::from_millis(3);

/// Backlog beyond this re-anchors the deadline clock
const REANCHOR_THRESHOLD: Duration = Duration::from_millis(50);

/// Run one slot's render loop until shutdown is requested. This is the whole
/// body of a worker process; a panic here takes the process down and the
/// supervisor's monitor picks it up.
pub fn worker_main(region: Arc<SharedRegion>, slot: SlotId, config: &EngineConfig) {
    let host = build_default_patch(region.sample_rate() as f64, region.buffer_size());
    run_worker_loop(region, slot, config, host);
}

/// Loop body, split out so tests can drive a custom patch
pub fn run_worker_loop(
    region: Arc<SharedRegion>,
    slot: SlotId,
    config: &EngineConfig,
    mut host: ModuleHost,
) {
    let audio = AudioRing::new(region.clone(), slot);
    let commands = CmdRing::new(region.clone(), slot);
    let heartbeat = Heartbeat::new(region.clone(), slot);
    let shutdown = ShutdownFlag::new(region.clone(), slot);
    let wakeup = WakeupFlag::new(region.clone(), slot);

    let period = Duration::from_secs_f64(region.buffer_size() as f64 / region.sample_rate() as f64);
    let lead_target = config.lead_target;
    let max_catchup = config.max_catchup;

    log::info!(
        "worker {slot} up: pid={} period={:.3}ms",
        std::process::id(),
        period.as_secs_f64() * 1000.0
    );

    // First heartbeat plus a wakeup so the supervisor sees the slot alive
    // before the first buffer lands.
    heartbeat.beat();
    wakeup.set();

    let mut dropped_writes: u64 = 0;
    let mut buffers_produced: u64 = 0;
    let mut next_deadline = Instant::now() + period;

    while !shutdown.is_requested() {
        // The wakeup event is strictly a "check the ring" hint; drain every
        // iteration to tolerate coalesced or missed wakeups.
        wakeup.take();
        while let Some(packet) = commands.read_next() {
            host.queue_command(packet);
        }

        if Instant::now() + SPIN_MARGIN >= next_deadline {
            // The scheduled buffer for this period.
            render_one(
                &mut host,
                &audio,
                &heartbeat,
                &mut next_deadline,
                period,
                &mut buffers_produced,
                &mut dropped_writes,
            );

            // Bounded catch-up: a couple of extra buffers when behind, and
            // only while below the lead target so production cannot run away.
            let mut extra = 0;
            while extra < max_catchup
                && Instant::now() >= next_deadline
                && audio.occupancy() < lead_target
            {
                render_one(
                    &mut host,
                    &audio,
                    &heartbeat,
                    &mut next_deadline,
                    period,
                    &mut buffers_produced,
                    &mut dropped_writes,
                );
                extra += 1;
            }

            // Still hopelessly behind: re-anchor instead of replaying.
            let now = Instant::now();
            if now > next_deadline + REANCHOR_THRESHOLD {
                next_deadline = now + period;
            }
        }

        pace(next_deadline, &shutdown);
    }

    log::info!(
        "worker {slot} shutting down: produced={buffers_produced} dropped={dropped_writes}"
    );
}

#[inline]
fn render_one(
    host: &mut ModuleHost,
    audio: &AudioRing,
    heartbeat: &Heartbeat,
    next_deadline: &mut Instant,
    period: Duration,
    buffers_produced: &mut u64,
    dropped_writes: &mut u64,
) {
    host.process_commands();
    let output = host.process_chain(None);
    if audio.write(output) {
        *buffers_produced += 1;
    } else {
        *dropped_writes += 1;
    }
    // Heartbeat advances per render, full ring or not: a blocked reader must
    // not look like a dead worker.
    heartbeat.beat();
    *next_deadline += period;
}

/// Two-phase deadline pacing: coarse sleep until ~3 ms out, then spin until
/// the 1 ms window opens.
fn pace(deadline: Instant, shutdown: &ShutdownFlag) {
    loop {
        if shutdown.is_requested() {
            return;
        }
        let now = Instant::now();
        if now + SPIN_MARGIN >= deadline {
            return;
        }
        let remaining = deadline - now;
        if remaining > COARSE_MARGIN {
            std::thread::sleep(remaining - COARSE_MARGIN);
        } else {
            std::hint::spin_loop();
            std::thread::yield_now();
        }
    }
}
