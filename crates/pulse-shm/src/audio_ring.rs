//! Shared-memory SPSC audio ring
//!
//! One writer process (the slot's worker), one reader (the audio callback).
//! `head` is writer-owned, `tail` is reader-owned; each lives on its own
//! cache line. Publication order: sample payload, then the slot's sequence
//! number, then `head` with a release store, so an acquire load of `head`
//! makes the payload visible.
//!
//! Wait-free on both sides. Overruns and underruns are counted, never fatal.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use pulse_core::{Sample, SlotId};

use crate::SharedRegion;

/// Cold-path ring statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioRingStats {
    pub occupancy: usize,
    pub last_seq: u64,
    pub head: u32,
    pub tail: u32,
    pub overruns: u64,
    pub underruns: u64,
}

/// Process-local handle onto one slot's audio ring
#[derive(Clone)]
pub struct AudioRing {
    region: Arc<SharedRegion>,
    slot: SlotId,
}

impl AudioRing {
    pub fn new(region: Arc<SharedRegion>, slot: SlotId) -> Self {
        Self { region, slot }
    }

    #[inline]
    fn frames(&self) -> u32 {
        self.region.ring_frames() as u32
    }

    #[inline]
    fn buffer_size(&self) -> usize {
        self.region.buffer_size()
    }

    /// Raw view of ring frame `idx`.
    ///
    /// # Safety
    /// `idx < frames`, and per the SPSC protocol the frame must not be
    /// concurrently written by the peer.
    #[inline]
    unsafe fn frame(&self, idx: u32) -> *mut Sample {
        let layout = self.region.layout().slot(self.slot);
        let off = layout.audio_samples + idx as usize * self.buffer_size() * size_of::<Sample>();
        // SAFETY: offset is within the samples array for idx < frames.
        unsafe { self.region.ptr_at(off) as *mut Sample }
    }

    /// Writer side: copy one buffer into the ring and publish it.
    ///
    /// Returns `false` (and counts an overrun) when the ring is full; the
    /// writer never overwrites a frame the reader may still hold.
    pub fn write(&self, payload: &[Sample]) -> bool {
        debug_assert_eq!(payload.len(), self.buffer_size());
        let layout = self.region.layout().slot(self.slot);
        // SAFETY: layout offsets.
        let head_cell = unsafe { self.region.atomic_u32(layout.audio_head) };
        let tail_cell = unsafe { self.region.atomic_u32(layout.audio_tail) };

        let head = head_cell.load(Ordering::Relaxed);
        let tail = tail_cell.load(Ordering::Acquire);
        let next = (head + 1) % self.frames();
        if next == tail {
            // SAFETY: layout offset.
            unsafe { self.region.atomic_u64(layout.audio_overruns) }
                .fetch_add(1, Ordering::Relaxed);
            return false;
        }

        // SAFETY: frame `head` is outside [tail, head) so the reader will not
        // observe it until the release store below publishes it.
        unsafe {
            std::ptr::copy_nonoverlapping(payload.as_ptr(), self.frame(head), payload.len());
        }

        // SAFETY: layout offsets; seq cells are written by this producer only.
        let seq = unsafe { self.region.atomic_u64(layout.audio_seq_counter) }
            .fetch_add(1, Ordering::Relaxed)
            + 1;
        unsafe { self.region.atomic_u64(layout.audio_seq + head as usize * 8) }
            .store(seq, Ordering::Release);

        head_cell.store(next, Ordering::Release);
        true
    }

    /// Reader side: consume the next frame sequentially.
    ///
    /// The returned view stays valid until the writer has wrapped the whole
    /// ring; the caller must copy it out before returning to the driver.
    pub fn read_next(&self) -> Option<&[Sample]> {
        let layout = self.region.layout().slot(self.slot);
        // SAFETY: layout offsets.
        let head_cell = unsafe { self.region.atomic_u32(layout.audio_head) };
        let tail_cell = unsafe { self.region.atomic_u32(layout.audio_tail) };

        let tail = tail_cell.load(Ordering::Relaxed);
        let head = head_cell.load(Ordering::Acquire);
        if head == tail {
            // SAFETY: layout offset.
            unsafe { self.region.atomic_u64(layout.audio_underruns) }
                .fetch_add(1, Ordering::Relaxed);
            return None;
        }

        // Advance tail first: consuming the frame before handing out the view
        // is what keeps the writer off it.
        tail_cell.store((tail + 1) % self.frames(), Ordering::Release);

        // SAFETY: frame `tail` was published (head moved past it) and the
        // writer will not reuse it until the ring wraps.
        Some(unsafe { std::slice::from_raw_parts(self.frame(tail), self.buffer_size()) })
    }

    /// Reader side: latest-wins with cushion. Skips stale frames so the
    /// reader lands `keep` buffers behind the writer, consuming exactly one.
    ///
    /// With occupancy `occ`, the consumed frame sits `min(occ, keep+1)`
    /// behind `head`.
    pub fn read_latest_keep(&self, keep: usize) -> Option<&[Sample]> {
        let layout = self.region.layout().slot(self.slot);
        // SAFETY: layout offsets.
        let head_cell = unsafe { self.region.atomic_u32(layout.audio_head) };
        let tail_cell = unsafe { self.region.atomic_u32(layout.audio_tail) };

        let tail = tail_cell.load(Ordering::Relaxed);
        let head = head_cell.load(Ordering::Acquire);
        if head == tail {
            // SAFETY: layout offset.
            unsafe { self.region.atomic_u64(layout.audio_underruns) }
                .fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let n = self.frames();
        let occ = (head + n - tail) % n;
        let keep = (keep as u32).min(n - 1);
        let keep_desired = occ.min(keep + 1);
        let idx = (head + n - keep_desired) % n;

        tail_cell.store((idx + 1) % n, Ordering::Release);

        // SAFETY: as in read_next; idx lies in the published range.
        Some(unsafe { std::slice::from_raw_parts(self.frame(idx), self.buffer_size()) })
    }

    /// Number of published, unconsumed frames
    pub fn occupancy(&self) -> usize {
        let layout = self.region.layout().slot(self.slot);
        // SAFETY: layout offsets.
        let head = unsafe { self.region.atomic_u32(layout.audio_head) }.load(Ordering::Acquire);
        let tail = unsafe { self.region.atomic_u32(layout.audio_tail) }.load(Ordering::Acquire);
        let n = self.frames();
        ((head + n - tail) % n) as usize
    }

    /// True once the writer has published at least one frame since reset.
    /// The monitor uses this as the standby-readiness probe.
    pub fn has_published(&self) -> bool {
        let layout = self.region.layout().slot(self.slot);
        // SAFETY: layout offset.
        unsafe { self.region.atomic_u64(layout.audio_seq_counter) }.load(Ordering::Acquire) > 0
    }

    /// Cold-path statistics snapshot
    pub fn stats(&self) -> AudioRingStats {
        let layout = self.region.layout().slot(self.slot);
        // SAFETY: layout offsets.
        let head = unsafe { self.region.atomic_u32(layout.audio_head) }.load(Ordering::Acquire);
        let tail = unsafe { self.region.atomic_u32(layout.audio_tail) }.load(Ordering::Acquire);
        let n = self.frames();
        let occupancy = ((head + n - tail) % n) as usize;
        let last_seq = if occupancy > 0 {
            let last_idx = (head + n - 1) % n;
            unsafe { self.region.atomic_u64(layout.audio_seq + last_idx as usize * 8) }
                .load(Ordering::Acquire)
        } else {
            0
        };
        AudioRingStats {
            occupancy,
            last_seq,
            head,
            tail,
            overruns: unsafe { self.region.atomic_u64(layout.audio_overruns) }
                .load(Ordering::Relaxed),
            underruns: unsafe { self.region.atomic_u64(layout.audio_underruns) }
                .load(Ordering::Relaxed),
        }
    }

    /// Reset to empty. Only valid while no peer holds a live view
    /// (the supervisor calls this before respawning a slot's worker).
    pub fn reset(&self) {
        let layout = self.region.layout().slot(self.slot);
        // SAFETY: layout offsets.
        unsafe {
            self.region
                .atomic_u32(layout.audio_head)
                .store(0, Ordering::Release);
            self.region
                .atomic_u32(layout.audio_tail)
                .store(0, Ordering::Release);
            self.region
                .atomic_u64(layout.audio_seq_counter)
                .store(0, Ordering::Release);
        }
    }
}
