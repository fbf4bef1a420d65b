//! Cold-path structured status snapshot

use serde::Serialize;

/// Per-slot snapshot
#[derive(Debug, Clone, Serialize)]
pub struct SlotStatus {
    pub worker_pid: Option<u32>,
    pub heartbeat: u64,
    pub ring_occupancy: usize,
    pub ring_last_seq: u64,
    pub ring_overruns: u64,
    pub ring_underruns: u64,
    pub cmd_occupancy: usize,
    pub cmd_coalesced: u64,
}

/// Whole-system snapshot, serializable for the status command
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    pub active_slot: usize,
    pub standby_ready: bool,
    pub pending_switch: bool,
    pub buffers_processed: u64,
    pub none_reads: u64,
    pub commands_sent: u64,
    pub switches_performed: u64,
    pub failover_count: u64,
    pub last_failover_ms: f64,
    pub sequencer_commands: u64,
    pub sequencer_skipped: u64,
    pub stream_errors: u64,
    pub slots: [SlotStatus; 2],
}
