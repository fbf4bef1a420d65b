//! pulse-shm: Process-shared rings and control cells
//!
//! The supervisor creates one file-backed shared region before spawning
//! workers. The region holds, per slot: an audio ring (worker writes,
//! audio callback reads), a command ring (supervisor threads write, worker
//! reads), a heartbeat counter, and shutdown/wakeup cells.
//!
//! CRITICAL: every hot-path operation in this crate is lock-free and
//! allocation-free. Rings are strictly single-producer/single-consumer;
//! publication uses release stores observed with acquire loads.
//!
//! Handles are process-local: each process maps the region and constructs
//! its own [`AudioRing`] / [`CmdRing`] views. Never share a handle across a
//! process boundary; share the file path and rebind.

mod audio_ring;
mod cells;
mod cmd_ring;
mod error;
mod layout;
mod region;

pub use audio_ring::*;
pub use cells::*;
pub use cmd_ring::*;
pub use error::*;
pub use layout::{CACHE_LINE, RegionLayout, SlotLayout};
pub use region::*;
