//! pulse: fault-tolerant modular synthesizer
//!
//! `pulse run` starts the supervisor (two workers, monitor, sequencer, OSC
//! input, sound device) and a small interactive shell. The hidden `worker`
//! subcommand is how the supervisor re-invokes this executable to run one
//! slot's DSP loop in an isolated process.

use std::io::BufRead;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use pulse_core::{EngineConfig, SlotId};
use pulse_shm::SharedRegion;
use pulse_supervisor::Supervisor;

#[derive(Parser)]
#[command(name = "pulse", about = "Fault-tolerant modular synthesizer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the supervisor and the sound device
    Run {
        /// Output device name (default: system default)
        #[arg(long)]
        device: Option<String>,
        /// Run the control plane without opening a sound device
        #[arg(long)]
        no_audio: bool,
    },
    /// List output devices
    Devices,
    /// Internal: run one slot's worker loop (spawned by the supervisor)
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        slot: usize,
        #[arg(long)]
        region: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let exit = match cli.command {
        Command::Run { device, no_audio } => run(device.as_deref(), no_audio),
        Command::Devices => devices(),
        Command::Worker { slot, region } => worker(slot, &region),
    };
    std::process::exit(exit);
}

fn run(device: Option<&str>, no_audio: bool) -> i32 {
    let config = EngineConfig::from_env();
    let mut supervisor = match Supervisor::new(config) {
        Ok(supervisor) => supervisor,
        Err(e) => {
            log::error!("failed to initialize: {e}");
            return 1;
        }
    };

    if let Err(e) = supervisor.start() {
        log::error!("failed to start: {e}");
        return 1;
    }

    if !no_audio {
        if let Err(e) = supervisor.start_audio(device) {
            log::error!("failed to open sound device: {e}");
            supervisor.stop();
            return 1;
        }
    }

    if supervisor.wait_standby_ready(std::time::Duration::from_secs(5)) {
        log::info!("standby ready; failover protection active");
    } else {
        log::warn!("standby not ready after 5s");
    }

    println!("pulse running. commands: status, quit");
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        match line.trim() {
            "quit" | "exit" => break,
            "status" => match serde_json::to_string_pretty(&supervisor.status()) {
                Ok(json) => println!("{json}"),
                Err(e) => log::error!("status serialization failed: {e}"),
            },
            "" => {}
            other => println!("unknown command: {other}"),
        }
    }

    supervisor.stop();
    0
}

fn devices() -> i32 {
    match pulse_audio::list_output_devices() {
        Ok(names) => {
            for name in names {
                println!("{name}");
            }
            0
        }
        Err(e) => {
            log::error!("device enumeration failed: {e}");
            1
        }
    }
}

fn worker(slot: usize, region_path: &std::path::Path) -> i32 {
    let Some(slot) = SlotId::from_index(slot) else {
        log::error!("invalid slot index: {slot}");
        return 2;
    };
    let region = match SharedRegion::open(region_path) {
        Ok(region) => region,
        Err(e) => {
            log::error!("worker cannot open region {}: {e}", region_path.display());
            return 2;
        }
    };
    let config = EngineConfig::from_env();
    pulse_engine::worker_main(region, slot, &config);
    0
}
