//! Sequencer manager thread
//!
//! Epoch-anchored scheduling: the thread derives "what buffer is it now"
//! from an absolute epoch instant rather than accumulated deltas, so tempo
//! stays accurate under scheduler jitter. Catch-up after a stall is bounded;
//! past the bound, missed buffers are skipped (and counted), never replayed.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;

use pulse_core::EngineConfig;

use crate::{CommandSink, Track, TrackUpdate};

/// Maximum buffers processed in one wakeup before skipping ahead
const MAX_CATCHUP: u64 = 100;

/// Minimum sleep between wakeups
const MIN_SLEEP: Duration = Duration::from_millis(1);

/// Per-track update queue depth (best-effort: full queues drop)
const UPDATE_QUEUE_DEPTH: usize = 100;

/// Cold-path sequencer counters
#[derive(Debug, Default)]
pub struct SeqStats {
    pub commands_emitted: AtomicU64,
    pub buffers_skipped: AtomicU64,
    pub updates_dropped: AtomicU64,
}

struct NewTrack {
    id: String,
    updates: Receiver<TrackUpdate>,
}

/// Handle to the sequencer thread
pub struct Sequencer {
    control_tx: Sender<NewTrack>,
    tracks: Mutex<HashMap<String, Sender<TrackUpdate>>>,
    running: Arc<AtomicBool>,
    stats: Arc<SeqStats>,
    thread: Option<JoinHandle<()>>,
}

impl Sequencer {
    /// Spawn the sequencer thread. Every emitted packet goes to `sink`,
    /// which must broadcast to both slots.
    pub fn start(sink: Arc<dyn CommandSink>, config: &EngineConfig) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(SeqStats::default());
        let (control_tx, control_rx) = bounded::<NewTrack>(16);

        let buffer_period = config.buffer_period_secs();
        let thread_running = Arc::clone(&running);
        let thread_stats = Arc::clone(&stats);

        let thread = std::thread::Builder::new()
            .name("pulse-sequencer".into())
            .spawn(move || {
                run_loop(sink, buffer_period, control_rx, thread_running, thread_stats);
            })
            .expect("spawn sequencer thread");

        Self {
            control_tx,
            tracks: Mutex::new(HashMap::new()),
            running,
            stats,
            thread: Some(thread),
        }
    }

    /// Create a named track with defaults. Returns false on duplicates.
    pub fn create_track(&self, id: &str) -> bool {
        let mut tracks = self.tracks.lock();
        if tracks.contains_key(id) {
            return false;
        }
        let (tx, rx) = bounded(UPDATE_QUEUE_DEPTH);
        if self
            .control_tx
            .send(NewTrack {
                id: id.to_string(),
                updates: rx,
            })
            .is_err()
        {
            return false;
        }
        tracks.insert(id.to_string(), tx);
        log::info!("sequencer: created track {id}");
        true
    }

    /// Queue an update for a track. Best-effort: a full queue drops the
    /// update and counts it.
    pub fn update_track(&self, id: &str, update: TrackUpdate) -> bool {
        let tracks = self.tracks.lock();
        let Some(tx) = tracks.get(id) else {
            return false;
        };
        match tx.try_send(update) {
            Ok(()) => true,
            Err(_) => {
                self.stats.updates_dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn track_ids(&self) -> Vec<String> {
        self.tracks.lock().keys().cloned().collect()
    }

    pub fn stats(&self) -> &SeqStats {
        &self.stats
    }

    /// Stop the thread and join it.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Sequencer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(
    sink: Arc<dyn CommandSink>,
    buffer_period: f64,
    control_rx: Receiver<NewTrack>,
    running: Arc<AtomicBool>,
    stats: Arc<SeqStats>,
) {
    log::info!("sequencer thread started (buffer period {:.3}ms)", buffer_period * 1000.0);

    let epoch = Instant::now();
    let mut global_next_buffer: u64 = 0;
    let mut tracks: Vec<(Track, Receiver<TrackUpdate>)> = Vec::new();

    while running.load(Ordering::Acquire) {
        while let Ok(new_track) = control_rx.try_recv() {
            tracks.push((Track::new(&new_track.id), new_track.updates));
        }

        let now = epoch.elapsed().as_secs_f64();
        let current_buffer = (now / buffer_period) as u64;

        let mut catchup = 0;
        while global_next_buffer <= current_buffer && catchup < MAX_CATCHUP {
            for (track, updates) in &mut tracks {
                // Drain this track's queue atomically at the boundary.
                while let Ok(update) = updates.try_recv() {
                    track.apply_update(update, global_next_buffer, buffer_period);
                }
                let emitted = track.tick(global_next_buffer, buffer_period, sink.as_ref());
                if emitted > 0 {
                    stats.commands_emitted.fetch_add(emitted, Ordering::Relaxed);
                }
            }
            global_next_buffer += 1;
            catchup += 1;
        }

        // Stalled past the catch-up bound: skip, never replay.
        if catchup >= MAX_CATCHUP && global_next_buffer <= current_buffer {
            let skipped = current_buffer + 1 - global_next_buffer;
            stats.buffers_skipped.fetch_add(skipped, Ordering::Relaxed);
            log::warn!("sequencer stalled: skipping {skipped} buffers");
            global_next_buffer = current_buffer + 1;
        }

        let elapsed = epoch.elapsed().as_secs_f64();
        let time_to_next = global_next_buffer as f64 * buffer_period - elapsed;
        let sleep = time_to_next
            .max(MIN_SLEEP.as_secs_f64())
            .min(buffer_period * 0.5);
        std::thread::sleep(Duration::from_secs_f64(sleep));
    }

    log::info!("sequencer thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use pulse_core::{CommandOp, CommandPacket};

    #[derive(Default)]
    struct TimedCapture(PlMutex<Vec<(Instant, CommandPacket)>>);

    impl CommandSink for TimedCapture {
        fn emit(&self, packet: &CommandPacket) {
            self.0.lock().push((Instant::now(), *packet));
        }
    }

    fn gate_on_times(capture: &TimedCapture) -> Vec<Instant> {
        capture
            .0
            .lock()
            .iter()
            .filter(|(_, p)| {
                let cmd = p.decode().unwrap();
                cmd.op == CommandOp::Gate && cmd.value.as_bool()
            })
            .map(|(t, _)| *t)
            .collect()
    }

    #[test]
    fn test_track_lifecycle() {
        let sink = Arc::new(TimedCapture::default());
        let mut seq = Sequencer::start(sink, &EngineConfig::default());

        assert!(seq.create_track("drums"));
        assert!(!seq.create_track("drums"));
        assert!(seq.update_track("drums", TrackUpdate::Stop));
        assert!(!seq.update_track("nope", TrackUpdate::Stop));
        assert_eq!(seq.track_ids(), vec!["drums".to_string()]);

        seq.stop();
    }

    #[test]
    fn test_gate_interval_matches_tempo() {
        // 120 bpm sixteenths with hits every 4 steps → gate-ons ~500 ms
        // apart; run long enough to collect three.
        let sink = Arc::new(TimedCapture::default());
        let mut seq = Sequencer::start(sink.clone(), &EngineConfig::default());

        seq.create_track("lead");
        seq.update_track(
            "lead",
            TrackUpdate::AssignGate { module: "env".into() },
        );
        seq.update_track("lead", TrackUpdate::Pattern("X...X...X...X...".into()));
        seq.update_track("lead", TrackUpdate::Start);

        std::thread::sleep(Duration::from_millis(1300));
        seq.stop();

        let times = gate_on_times(&sink);
        assert!(times.len() >= 3, "only {} gate-ons", times.len());
        for pair in times.windows(2) {
            let gap = pair[1].duration_since(pair[0]).as_secs_f64();
            assert!(
                (gap - 0.5).abs() < 0.08,
                "gate interval {gap:.3}s, expected ~0.5s"
            );
        }
    }

    #[test]
    fn test_emission_counted() {
        let sink = Arc::new(TimedCapture::default());
        let mut seq = Sequencer::start(sink.clone(), &EngineConfig::default());
        seq.create_track("t");
        seq.update_track("t", TrackUpdate::AssignGate { module: "env".into() });
        seq.update_track("t", TrackUpdate::Pattern("XXXX".into()));
        seq.update_track("t", TrackUpdate::Start);
        std::thread::sleep(Duration::from_millis(400));
        seq.stop();

        let emitted = seq.stats().commands_emitted.load(Ordering::Relaxed);
        assert!(emitted > 0);
        assert_eq!(emitted as usize, sink.0.lock().len());
    }
}
