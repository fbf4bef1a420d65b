//! Shared region memory layout
//!
//! All offsets are computed up front from the region geometry. Index cells
//! are spaced a cache line apart so the producer-owned and consumer-owned
//! indices never share a line.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ RegionHeader (magic, version, geometry)                      │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Slot 0                                                       │
//! │   audio ring: head │ tail │ seq ctr │ overruns │ underruns   │
//! │               seq[frames] │ samples[frames × buffer]         │
//! │   cmd ring:   head │ tail │ coalesced │ slots[S × 64]        │
//! │   cells:      heartbeat │ shutdown │ wakeup                  │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Slot 1 (same shape)                                          │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use pulse_core::{COMMAND_PACKET_SIZE, Sample, SlotId};

/// Cache line size used to separate index cells
pub const CACHE_LINE: usize = 64;

/// Offsets of one slot's cells, relative to the region base
#[derive(Debug, Clone, Copy)]
pub struct SlotLayout {
    pub audio_head: usize,
    pub audio_tail: usize,
    pub audio_seq_counter: usize,
    pub audio_overruns: usize,
    pub audio_underruns: usize,
    pub audio_seq: usize,
    pub audio_samples: usize,
    pub cmd_head: usize,
    pub cmd_tail: usize,
    pub cmd_coalesced: usize,
    pub cmd_slots: usize,
    pub heartbeat: usize,
    pub shutdown: usize,
    pub wakeup: usize,
}

/// Complete region layout for a given geometry
#[derive(Debug, Clone, Copy)]
pub struct RegionLayout {
    pub buffer_size: usize,
    pub ring_frames: usize,
    pub cmd_slots: usize,
    pub slots: [SlotLayout; SlotId::COUNT],
    pub total_len: usize,
}

#[inline]
const fn align_up(offset: usize, align: usize) -> usize {
    (offset + align - 1) & !(align - 1)
}

impl RegionLayout {
    /// Compute the layout for the given geometry. `header_len` is the size
    /// of the region header placed at offset zero.
    pub fn compute(
        header_len: usize,
        buffer_size: usize,
        ring_frames: usize,
        cmd_slots: usize,
    ) -> Self {
        let mut cursor = align_up(header_len, CACHE_LINE);

        let mut cell = |len: usize| {
            let off = cursor;
            // Every cell gets its own cache line; bulk arrays get their size.
            cursor = align_up(off + len.max(1), CACHE_LINE);
            off
        };

        let mut slot = || SlotLayout {
            audio_head: cell(4),
            audio_tail: cell(4),
            audio_seq_counter: cell(8),
            audio_overruns: cell(8),
            audio_underruns: cell(8),
            audio_seq: cell(ring_frames * 8),
            audio_samples: cell(ring_frames * buffer_size * size_of::<Sample>()),
            cmd_head: cell(4),
            cmd_tail: cell(4),
            cmd_coalesced: cell(8),
            cmd_slots: cell(cmd_slots * COMMAND_PACKET_SIZE),
            heartbeat: cell(8),
            shutdown: cell(4),
            wakeup: cell(4),
        };

        let slots = [slot(), slot()];
        let total_len = cursor;

        Self {
            buffer_size,
            ring_frames,
            cmd_slots,
            slots,
            total_len,
        }
    }

    #[inline]
    pub fn slot(&self, slot: SlotId) -> &SlotLayout {
        &self.slots[slot.index()]
    }
}
