//! Slot bookkeeping and worker process control
//!
//! Rings belong to slots, never to workers: a worker is respawned into the
//! same slot with the same rings, so the audio callback's handles stay
//! valid across any number of respawns.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use pulse_core::SlotId;
use pulse_shm::{AudioRing, CmdRing, Heartbeat, SharedRegion, ShutdownFlag, WakeupFlag};

/// Grace window between the shutdown request and a forced kill
const TERMINATE_GRACE: Duration = Duration::from_millis(500);

/// Environment override for the worker executable (tests point this at the
/// real binary; production defaults to the current executable)
pub const WORKER_BIN_ENV: &str = "PULSE_WORKER_BIN";

/// Process-local handles for one slot's shared resources
#[derive(Clone)]
pub struct SlotRings {
    pub audio: AudioRing,
    pub commands: CmdRing,
    pub heartbeat: Heartbeat,
    pub shutdown: ShutdownFlag,
    pub wakeup: WakeupFlag,
}

impl SlotRings {
    pub fn new(region: Arc<SharedRegion>, slot: SlotId) -> Self {
        Self {
            audio: AudioRing::new(region.clone(), slot),
            commands: CmdRing::new(region.clone(), slot),
            heartbeat: Heartbeat::new(region.clone(), slot),
            shutdown: ShutdownFlag::new(region.clone(), slot),
            wakeup: WakeupFlag::new(region, slot),
        }
    }

    /// Reset every shared cell for a fresh worker. Only valid while the
    /// slot has no live worker and the callback is not reading this slot.
    pub fn reset_for_respawn(&self) {
        self.audio.reset();
        self.commands.reset();
        self.heartbeat.reset();
        self.shutdown.clear();
        self.wakeup.clear();
    }
}

/// A spawned worker process bound to a slot
pub struct WorkerProcess {
    child: Child,
    pub spawn_time: Instant,
}

impl WorkerProcess {
    /// Spawn a worker into `slot`, re-invoking this executable (or the
    /// `PULSE_WORKER_BIN` override) with the hidden `worker` subcommand.
    pub fn spawn(slot: SlotId, region_path: &Path) -> std::io::Result<Self> {
        let exe: PathBuf = match std::env::var_os(WORKER_BIN_ENV) {
            Some(path) => PathBuf::from(path),
            None => std::env::current_exe()?,
        };

        let child = Command::new(exe)
            .arg("worker")
            .arg("--slot")
            .arg(slot.index().to_string())
            .arg("--region")
            .arg(region_path)
            .stdin(Stdio::null())
            .spawn()?;

        log::info!("spawned worker for {slot}: pid={}", child.id());
        Ok(Self {
            child,
            spawn_time: Instant::now(),
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Non-blocking exit sentinel
    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    /// Graceful shutdown via the slot's shared cell, then a forced kill
    /// after the grace window.
    pub fn terminate(mut self, shutdown: &ShutdownFlag) {
        shutdown.request();

        let deadline = Instant::now() + TERMINATE_GRACE;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    log::debug!("worker pid={} exited: {status}", self.child.id());
                    return;
                }
                Ok(None) => {
                    if Instant::now() >= deadline {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    log::warn!("worker wait failed: {e}");
                    break;
                }
            }
        }

        log::warn!("worker pid={} did not exit, killing", self.child.id());
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::EngineConfig;

    #[test]
    fn test_reset_for_respawn_clears_everything() {
        let dir = tempfile::tempdir().unwrap();
        let region =
            SharedRegion::create(&dir.path().join("slots.shm"), &EngineConfig::default()).unwrap();
        let rings = SlotRings::new(region.clone(), SlotId::Slot0);

        let buf = vec![0.25f32; region.buffer_size()];
        rings.audio.write(&buf);
        rings
            .commands
            .write(&pulse_core::CommandPacket::gate("env", true).unwrap());
        rings.heartbeat.beat();
        rings.shutdown.request();
        rings.wakeup.set();

        rings.reset_for_respawn();
        assert_eq!(rings.audio.occupancy(), 0);
        assert!(!rings.audio.has_published());
        assert!(!rings.commands.has_data());
        assert_eq!(rings.heartbeat.value(), 0);
        assert!(!rings.shutdown.is_requested());
        assert!(!rings.wakeup.take());
    }
}
