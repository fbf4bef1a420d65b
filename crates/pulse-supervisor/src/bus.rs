//! Command bus
//!
//! Single funnel for every control-plane packet leaving the audio process.
//! Routing policy:
//! - steady state: commands go to the ACTIVE slot only
//! - while a switch is pending or being cleaned up: both slots, so the
//!   future active slot misses nothing
//! - the sequencer always broadcasts to both slots
//!
//! The producer side of each command ring is serialized behind a mutex so
//! the control-input and sequencer threads form one logical producer. The
//! mutex is cold-path only: the audio callback and the workers never touch
//! it.

use std::sync::Arc;

use parking_lot::Mutex;

use pulse_core::{CommandPacket, SlotId};

use crate::{SlotRings, SupervisorShared};

pub struct CommandBus {
    producers: [Mutex<SlotProducer>; 2],
    shared: Arc<SupervisorShared>,
}

struct SlotProducer {
    rings: SlotRings,
}

impl CommandBus {
    pub fn new(slot0: SlotRings, slot1: SlotRings, shared: Arc<SupervisorShared>) -> Self {
        Self {
            producers: [
                Mutex::new(SlotProducer { rings: slot0 }),
                Mutex::new(SlotProducer { rings: slot1 }),
            ],
            shared,
        }
    }

    fn write_slot(&self, slot: SlotId, packet: &CommandPacket) {
        let producer = self.producers[slot.index()].lock();
        producer.rings.commands.write(packet);
        producer.rings.wakeup.set();
    }

    /// Route a control-surface command: active slot in steady state, both
    /// slots during a failover window.
    pub fn send(&self, packet: &CommandPacket) {
        if self.shared.failover.in_failover_window() {
            self.write_slot(SlotId::Slot0, packet);
            self.write_slot(SlotId::Slot1, packet);
        } else {
            self.write_slot(self.shared.failover.active_slot(), packet);
        }
        self.shared.metrics.commands_sent.bump();
    }

    /// Write to both slots unconditionally (sequencer discipline).
    pub fn broadcast(&self, packet: &CommandPacket) {
        self.write_slot(SlotId::Slot0, packet);
        self.write_slot(SlotId::Slot1, packet);
        self.shared.metrics.commands_sent.bump();
    }
}

impl pulse_seq::CommandSink for CommandBus {
    fn emit(&self, packet: &CommandPacket) {
        self.broadcast(packet);
    }
}
