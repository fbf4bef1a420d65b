//! pulse-engine: Module hosting and the worker render loop
//!
//! A [`ModuleHost`] owns one slot's patch and drives it deterministically
//! each buffer: drain queued commands, step every module once, hand back the
//! final buffer. Patches are an ordered chain by default; a [`PatchRouter`]
//! upgrades the host to DAG routing with pre-allocated edge buffers.
//!
//! [`worker_main`] is the body of a worker process: one host, one audio
//! ring, one command ring, deadline-paced to one buffer per period.

mod host;
mod patch;
mod router;
mod worker;

pub use host::*;
pub use patch::*;
pub use router::*;
pub use worker::*;
