//! Supervisor
//!
//! Owns the shared region, both slots, the monitor thread, the sequencer,
//! the OSC listener and (optionally) the sound-device stream. Construction
//! allocates everything; `start` brings the control and data planes up;
//! `start_audio` additionally opens the device. Hosts without a device (and
//! the test suite) pull blocks from [`CallbackCore`] directly.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use pulse_audio::OutputStream;
use pulse_core::{CommandPacket, EngineConfig, SlotId};
use pulse_seq::Sequencer;
use pulse_shm::SharedRegion;

use crate::monitor::Monitor;
use crate::{
    CallbackCore, CommandBus, ControlInput, SlotRings, SlotStatus, SupervisorError,
    SupervisorResult, SupervisorShared, SupervisorStatus,
};

pub struct Supervisor {
    config: EngineConfig,
    region: Arc<SharedRegion>,
    shared: Arc<SupervisorShared>,
    bus: Arc<CommandBus>,
    slots: [SlotRings; 2],

    monitor_stop: Arc<AtomicBool>,
    monitor: Option<JoinHandle<()>>,
    sequencer: Option<Sequencer>,
    control: Option<ControlInput>,
    stream: Option<OutputStream>,
}

impl Supervisor {
    /// Allocate the shared region and all supervisor state. Workers are not
    /// spawned until [`Self::start`].
    pub fn new(config: EngineConfig) -> SupervisorResult<Self> {
        let region_path = default_region_path();
        let region = SharedRegion::create(&region_path, &config)?;

        let shared = Arc::new(SupervisorShared::default());
        let slots = [
            SlotRings::new(region.clone(), SlotId::Slot0),
            SlotRings::new(region.clone(), SlotId::Slot1),
        ];
        let bus = Arc::new(CommandBus::new(
            slots[0].clone(),
            slots[1].clone(),
            shared.clone(),
        ));

        Ok(Self {
            config,
            region,
            shared,
            bus,
            slots,
            monitor_stop: Arc::new(AtomicBool::new(false)),
            monitor: None,
            sequencer: None,
            control: None,
            stream: None,
        })
    }

    /// Spawn the monitor (which spawns both workers), the sequencer and the
    /// OSC listener. Audio stays down until [`Self::start_audio`] — callers
    /// without a device pull from [`Self::callback_core`] instead.
    pub fn start(&mut self) -> SupervisorResult<()> {
        if self.monitor.is_some() {
            return Err(SupervisorError::AlreadyRunning);
        }

        log::info!(
            "starting supervisor: sr={} block={} ring={}x cmd={}x",
            self.config.sample_rate.as_u32(),
            self.config.buffer_size.as_usize(),
            self.config.ring_frames,
            self.config.cmd_slots,
        );

        self.monitor_stop.store(false, Ordering::Release);
        let monitor = Monitor::new(
            self.region.clone(),
            self.config.clone(),
            self.shared.clone(),
            self.monitor_stop.clone(),
        );
        self.monitor = Some(
            std::thread::Builder::new()
                .name("pulse-monitor".into())
                .spawn(move || monitor.run())?,
        );

        self.sequencer = Some(Sequencer::start(self.bus.clone(), &self.config));

        match ControlInput::start(&self.config.osc_bind, self.bus.clone()) {
            Ok(control) => self.control = Some(control),
            Err(e) => log::warn!("OSC listener unavailable ({e}); control input disabled"),
        }

        Ok(())
    }

    /// Open the output device (default, or by name) and begin pulling from
    /// the active slot.
    pub fn start_audio(&mut self, device_name: Option<&str>) -> SupervisorResult<()> {
        if self.monitor.is_none() {
            return Err(SupervisorError::NotRunning);
        }
        if self.stream.is_some() {
            return Err(SupervisorError::AlreadyRunning);
        }

        let device = match device_name {
            Some(name) => pulse_audio::get_output_device_by_name(name)?,
            None => pulse_audio::get_default_output_device()?,
        };

        let mut core = self.callback_core();
        let stream = OutputStream::new(
            &device,
            self.config.sample_rate,
            self.config.buffer_size,
            Box::new(move |block| core.render(block)),
        )?;
        stream.start()?;
        log::info!("audio stream running ({} channels)", stream.channels());
        self.stream = Some(stream);
        Ok(())
    }

    /// A fresh callback core over this supervisor's slots. Exactly one core
    /// should be pulled at a time (it is the single reader of the rings).
    pub fn callback_core(&self) -> CallbackCore {
        CallbackCore::new(
            self.region.clone(),
            self.shared.clone(),
            self.config.keep_after_read,
        )
    }

    /// Route a command packet through the bus (steady state: active slot).
    pub fn send_command(&self, packet: &CommandPacket) {
        self.bus.send(packet);
    }

    pub fn sequencer(&self) -> Option<&Sequencer> {
        self.sequencer.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn shared(&self) -> &Arc<SupervisorShared> {
        &self.shared
    }

    /// Block until the standby slot is ready or `timeout` elapses.
    pub fn wait_standby_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.shared.failover.standby_ready() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        self.shared.failover.standby_ready()
    }

    /// Cold-path status snapshot
    pub fn status(&self) -> SupervisorStatus {
        let slot_status = |slot: SlotId| {
            let rings = &self.slots[slot.index()];
            let audio = rings.audio.stats();
            let cmd = rings.commands.stats();
            SlotStatus {
                worker_pid: self.shared.worker_pid(slot),
                heartbeat: rings.heartbeat.value(),
                ring_occupancy: audio.occupancy,
                ring_last_seq: audio.last_seq,
                ring_overruns: audio.overruns,
                ring_underruns: audio.underruns,
                cmd_occupancy: cmd.occupancy,
                cmd_coalesced: cmd.coalesced,
            }
        };

        let metrics = &self.shared.metrics;
        SupervisorStatus {
            active_slot: self.shared.failover.active_slot().index(),
            standby_ready: self.shared.failover.standby_ready(),
            pending_switch: self.shared.failover.pending_switch(),
            buffers_processed: metrics.buffers_processed.get(),
            none_reads: metrics.none_reads.get(),
            commands_sent: metrics.commands_sent.get(),
            switches_performed: metrics.switches_performed.get(),
            failover_count: metrics.failover_count.get(),
            last_failover_ms: metrics.last_failover_us.get() as f64 / 1000.0,
            sequencer_commands: self
                .sequencer
                .as_ref()
                .map(|s| {
                    s.stats()
                        .commands_emitted
                        .load(std::sync::atomic::Ordering::Relaxed)
                })
                .unwrap_or(0),
            sequencer_skipped: self
                .sequencer
                .as_ref()
                .map(|s| {
                    s.stats()
                        .buffers_skipped
                        .load(std::sync::atomic::Ordering::Relaxed)
                })
                .unwrap_or(0),
            stream_errors: self.stream.as_ref().map(|s| s.error_count()).unwrap_or(0),
            slots: [slot_status(SlotId::Slot0), slot_status(SlotId::Slot1)],
        }
    }

    /// Stop everything: workers (via the monitor), sequencer, control
    /// input, and the sound device last.
    pub fn stop(&mut self) {
        log::info!("stopping supervisor");

        // The monitor terminates both workers on its way out (graceful
        // shutdown cell, forced kill after the grace window). Stopping it
        // first keeps a winding-down worker from reading as a crash.
        self.monitor_stop.store(true, Ordering::Release);
        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.join();
        }

        if let Some(mut sequencer) = self.sequencer.take() {
            sequencer.stop();
        }
        if let Some(mut control) = self.control.take() {
            control.stop();
        }

        // Device goes down last; by now the callback only replays last_good.
        if let Some(stream) = self.stream.take() {
            let _ = stream.stop();
        }

        log::info!("supervisor stopped");
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if self.monitor.is_some() {
            self.stop();
        }
    }
}

fn default_region_path() -> PathBuf {
    use std::sync::atomic::AtomicU64;
    static INSTANCE: AtomicU64 = AtomicU64::new(0);
    let n = INSTANCE.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("pulse-{}-{n}.shm", std::process::id()))
}
