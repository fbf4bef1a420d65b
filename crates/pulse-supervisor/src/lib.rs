//! pulse-supervisor: Slot orchestration and failover
//!
//! The supervisor owns two slots, each a permanent (audio ring, command
//! ring, heartbeat, shutdown, wakeup) bundle in shared memory, plus one
//! worker process per slot. A monitor thread watches process sentinels and
//! heartbeats; the audio callback reads the active slot's ring with a
//! last-good fallback and flips slots at a buffer boundary when the monitor
//! schedules a switch. Failover is a two-phase commit: the monitor sets
//! intent, the callback performs the switch, the monitor cleans up after.

mod bus;
mod callback;
mod control;
mod error;
mod monitor;
mod slots;
mod state;
mod status;
mod supervisor;

pub use bus::*;
pub use callback::*;
pub use control::*;
pub use error::*;
pub use slots::*;
pub use state::*;
pub use status::*;
pub use supervisor::*;
