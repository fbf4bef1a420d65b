//! Shared-memory command ring
//!
//! Carries 64-byte command packets from the audio process into a worker.
//! Same SPSC index discipline as the audio ring with one difference: the
//! producer never blocks and never fails. When the ring is full it coalesces
//! by advancing the consumer-visible tail one slot (dropping the oldest
//! packet) and writing anyway, so the newest command always lands.
//!
//! Because the producer can move `tail` during coalescing, both sides claim
//! tail advances with a compare-exchange.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use pulse_core::{COMMAND_PACKET_SIZE, CommandPacket, SlotId};

use crate::SharedRegion;

/// Cold-path command ring statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CmdRingStats {
    pub occupancy: usize,
    pub coalesced: u64,
}

/// Process-local handle onto one slot's command ring
#[derive(Clone)]
pub struct CmdRing {
    region: Arc<SharedRegion>,
    slot: SlotId,
}

impl CmdRing {
    pub fn new(region: Arc<SharedRegion>, slot: SlotId) -> Self {
        Self { region, slot }
    }

    #[inline]
    fn slots(&self) -> u32 {
        self.region.cmd_slots() as u32
    }

    /// # Safety
    /// `idx < slots`; aliasing per the ring protocol.
    #[inline]
    unsafe fn slot_ptr(&self, idx: u32) -> *mut u8 {
        let layout = self.region.layout().slot(self.slot);
        let off = layout.cmd_slots + idx as usize * COMMAND_PACKET_SIZE;
        // SAFETY: offset is within the packet array for idx < slots.
        unsafe { self.region.ptr_at(off) }
    }

    /// Producer side: write a packet, coalescing away the oldest one when
    /// the ring is full. Never blocks, never fails.
    pub fn write(&self, packet: &CommandPacket) {
        let layout = self.region.layout().slot(self.slot);
        // SAFETY: layout offsets.
        let head_cell = unsafe { self.region.atomic_u32(layout.cmd_head) };
        let tail_cell = unsafe { self.region.atomic_u32(layout.cmd_tail) };

        let head = head_cell.load(Ordering::Relaxed);
        let next = (head + 1) % self.slots();
        loop {
            let tail = tail_cell.load(Ordering::Acquire);
            if next != tail {
                break;
            }
            // Full: drop the oldest packet. The consumer may be claiming the
            // same slot concurrently; whoever wins the CAS takes it.
            if tail_cell
                .compare_exchange(
                    tail,
                    (tail + 1) % self.slots(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                // SAFETY: layout offset.
                unsafe { self.region.atomic_u64(layout.cmd_coalesced) }
                    .fetch_add(1, Ordering::Relaxed);
                break;
            }
        }

        // SAFETY: slot `head` is unpublished until the release store below.
        unsafe {
            std::ptr::copy_nonoverlapping(
                packet.as_bytes().as_ptr(),
                self.slot_ptr(head),
                COMMAND_PACKET_SIZE,
            );
        }
        head_cell.store(next, Ordering::Release);
    }

    /// Consumer side: pop the oldest packet, strictly in order.
    ///
    /// Returns the packet by value (64 bytes) so the slot can be reclaimed
    /// immediately.
    pub fn read_next(&self) -> Option<CommandPacket> {
        let layout = self.region.layout().slot(self.slot);
        // SAFETY: layout offsets.
        let head_cell = unsafe { self.region.atomic_u32(layout.cmd_head) };
        let tail_cell = unsafe { self.region.atomic_u32(layout.cmd_tail) };

        loop {
            let tail = tail_cell.load(Ordering::Acquire);
            let head = head_cell.load(Ordering::Acquire);
            if head == tail {
                return None;
            }

            let mut bytes = [0u8; COMMAND_PACKET_SIZE];
            // SAFETY: slot `tail` was published; if the producer coalesces it
            // away while we copy, the CAS below fails and the torn copy is
            // discarded.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.slot_ptr(tail),
                    bytes.as_mut_ptr(),
                    COMMAND_PACKET_SIZE,
                );
            }

            if tail_cell
                .compare_exchange(
                    tail,
                    (tail + 1) % self.slots(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return Some(CommandPacket::from_bytes(bytes));
            }
        }
    }

    /// True when packets are waiting
    pub fn has_data(&self) -> bool {
        let layout = self.region.layout().slot(self.slot);
        // SAFETY: layout offsets.
        let head = unsafe { self.region.atomic_u32(layout.cmd_head) }.load(Ordering::Acquire);
        let tail = unsafe { self.region.atomic_u32(layout.cmd_tail) }.load(Ordering::Acquire);
        head != tail
    }

    /// Cold-path statistics snapshot
    pub fn stats(&self) -> CmdRingStats {
        let layout = self.region.layout().slot(self.slot);
        // SAFETY: layout offsets.
        let head = unsafe { self.region.atomic_u32(layout.cmd_head) }.load(Ordering::Acquire);
        let tail = unsafe { self.region.atomic_u32(layout.cmd_tail) }.load(Ordering::Acquire);
        let n = self.slots();
        CmdRingStats {
            occupancy: ((head + n - tail) % n) as usize,
            coalesced: unsafe { self.region.atomic_u64(layout.cmd_coalesced) }
                .load(Ordering::Relaxed),
        }
    }

    /// Reset to empty; supervisor-side, pre-respawn only.
    pub fn reset(&self) {
        let layout = self.region.layout().slot(self.slot);
        // SAFETY: layout offsets.
        unsafe {
            self.region
                .atomic_u32(layout.cmd_head)
                .store(0, Ordering::Release);
            self.region
                .atomic_u32(layout.cmd_tail)
                .store(0, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::EngineConfig;

    fn test_region() -> (tempfile::TempDir, Arc<SharedRegion>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cmd.shm");
        let region = SharedRegion::create(&path, &EngineConfig::default()).unwrap();
        (dir, region)
    }

    #[test]
    fn test_fifo_order() {
        let (_dir, region) = test_region();
        let ring = CmdRing::new(region, SlotId::Slot0);

        ring.write(&CommandPacket::set_float("osc", "freq", 100.0).unwrap());
        ring.write(&CommandPacket::set_float("osc", "freq", 200.0).unwrap());
        ring.write(&CommandPacket::gate("env", true).unwrap());

        let a = ring.read_next().unwrap();
        assert_eq!(a.decode().unwrap().value.as_f64(), 100.0);
        let b = ring.read_next().unwrap();
        assert_eq!(b.decode().unwrap().value.as_f64(), 200.0);
        let c = ring.read_next().unwrap();
        assert_eq!(c.decode().unwrap().param, "gate");
        assert!(ring.read_next().is_none());
    }

    #[test]
    fn test_coalescing_drops_oldest() {
        let (_dir, region) = test_region();
        let slots = region.cmd_slots();
        let ring = CmdRing::new(region, SlotId::Slot0);

        // Overfill: capacity is slots-1, write twice that.
        let total = (slots - 1) * 2;
        for i in 0..total {
            ring.write(&CommandPacket::set_float("osc", "freq", i as f64).unwrap());
        }
        let stats = ring.stats();
        assert_eq!(stats.occupancy, slots - 1);
        assert_eq!(stats.coalesced as usize, total - (slots - 1));

        // The survivors are the newest slots-1 packets, oldest first, and the
        // final packet is the last one written.
        let mut last = None;
        let mut first = None;
        while let Some(pkt) = ring.read_next() {
            let v = pkt.decode().unwrap().value.as_f64();
            first.get_or_insert(v);
            last = Some(v);
        }
        assert_eq!(first.unwrap() as usize, total - (slots - 1));
        assert_eq!(last.unwrap() as usize, total - 1);
    }

    #[test]
    fn test_flood_while_draining() {
        let (_dir, region) = test_region();
        let producer = CmdRing::new(region.clone(), SlotId::Slot1);
        let consumer = CmdRing::new(region, SlotId::Slot1);

        let writer = std::thread::spawn(move || {
            for i in 0..10_000 {
                producer.write(&CommandPacket::set_float("osc", "freq", i as f64).unwrap());
            }
        });

        let mut last_seen = -1.0f64;
        loop {
            match consumer.read_next() {
                Some(pkt) => {
                    let v = pkt.decode().unwrap().value.as_f64();
                    assert!(v > last_seen, "commands must drain in order");
                    last_seen = v;
                    if v as usize == 9_999 {
                        break;
                    }
                }
                None => {
                    if writer.is_finished() && !consumer.has_data() {
                        break;
                    }
                    std::thread::yield_now();
                }
            }
        }
        writer.join().unwrap();
        // The final applied value is the last one written into the ring.
        assert_eq!(last_seen as usize, 9_999);
    }

    #[test]
    fn test_reset_empties() {
        let (_dir, region) = test_region();
        let ring = CmdRing::new(region, SlotId::Slot0);
        ring.write(&CommandPacket::gate("env", true).unwrap());
        assert!(ring.has_data());
        ring.reset();
        assert!(!ring.has_data());
        assert!(ring.read_next().is_none());
    }
}
