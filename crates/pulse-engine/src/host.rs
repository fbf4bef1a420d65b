//! Module host
//!
//! Owns one slot's patch and drives it deterministically each buffer:
//! drain the pending command queue, step every module once in order, return
//! the final buffer. All intermediate buffers are pre-allocated at
//! construction; the per-buffer path allocates nothing.
//!
//! Chain mode processes modules in insertion order through a rotating set of
//! pre-allocated buffers. Router mode (see [`PatchRouter`]) processes in
//! cached topological order, summing each module's incoming edge buffers
//! into a pre-allocated mix buffer.

use std::collections::VecDeque;

use pulse_core::{CommandOp, CommandPacket, Sample};
use pulse_dsp::{Module, ModuleState};

use crate::{PatchRouter, RouterResult};

/// Maximum modules in a chain (intermediate buffers are pre-allocated)
pub const MAX_CHAIN_MODULES: usize = 8;

/// Pending-command queue depth; overflow is counted and dropped
const PENDING_CAPACITY: usize = 256;

/// Cold-path host statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStats {
    pub modules: usize,
    pub buffers_processed: u64,
    pub commands_applied: u64,
    pub commands_dropped: u64,
    pub pending: usize,
}

pub struct ModuleHost {
    sample_rate: f64,
    buffer_size: usize,

    modules: Vec<(String, Box<dyn Module>)>,
    chain_buffers: Vec<Vec<Sample>>,

    pending: VecDeque<CommandPacket>,

    // Router mode
    router: Option<PatchRouter>,
    /// Cached (host module index, router index) pairs in topological order
    router_order: Vec<(usize, usize)>,
    router_generation: u64,
    work_buffers: Vec<Vec<Sample>>,
    mix_buffer: Vec<Sample>,

    buffers_processed: u64,
    commands_applied: u64,
    commands_dropped: u64,
}

impl ModuleHost {
    pub fn new(sample_rate: f64, buffer_size: usize) -> Self {
        Self {
            sample_rate,
            buffer_size,
            modules: Vec::with_capacity(MAX_CHAIN_MODULES),
            chain_buffers: (0..MAX_CHAIN_MODULES + 1)
                .map(|_| vec![0.0; buffer_size])
                .collect(),
            pending: VecDeque::with_capacity(PENDING_CAPACITY),
            router: None,
            router_order: Vec::new(),
            router_generation: 0,
            work_buffers: Vec::new(),
            mix_buffer: Vec::new(),
            buffers_processed: 0,
            commands_applied: 0,
            commands_dropped: 0,
        }
    }

    #[inline]
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Add a module to the end of the chain. Returns false at capacity or on
    /// a duplicate id.
    pub fn add_module(&mut self, id: &str, module: Box<dyn Module>) -> bool {
        if self.modules.len() >= MAX_CHAIN_MODULES || self.index_of(id).is_some() {
            return false;
        }
        self.modules.push((id.to_string(), module));
        if self.router.is_some() {
            self.work_buffers.push(vec![0.0; self.buffer_size]);
        }
        true
    }

    pub fn remove_module(&mut self, id: &str) -> bool {
        let Some(idx) = self.index_of(id) else {
            return false;
        };
        self.modules.remove(idx);
        if let Some(router) = &mut self.router {
            let _ = router.remove_module(id);
            self.work_buffers.pop();
        }
        true
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.modules.iter().position(|(m, _)| m == id)
    }

    pub fn module(&self, id: &str) -> Option<&dyn Module> {
        self.index_of(id).map(|i| self.modules[i].1.as_ref())
    }

    pub fn module_state(&self, id: &str) -> Option<ModuleState> {
        self.module(id).map(|m| m.state())
    }

    pub fn module_ids(&self) -> impl Iterator<Item = &str> {
        self.modules.iter().map(|(id, _)| id.as_str())
    }

    // ── command intake ──────────────────────────────────────────────────

    /// Queue a command for the next buffer boundary. Overflow is dropped
    /// and counted, never blocking.
    pub fn queue_command(&mut self, packet: CommandPacket) {
        if self.pending.len() >= PENDING_CAPACITY {
            self.commands_dropped += 1;
            return;
        }
        self.pending.push_back(packet);
    }

    /// Drain and apply every pending command. Called at the buffer boundary;
    /// unknown targets and malformed packets are dropped with a counter bump.
    pub fn process_commands(&mut self) {
        while let Some(packet) = self.pending.pop_front() {
            let Ok(cmd) = packet.decode() else {
                self.commands_dropped += 1;
                continue;
            };
            let Some(idx) = self.index_of(cmd.module) else {
                self.commands_dropped += 1;
                continue;
            };
            let module = &mut self.modules[idx].1;
            match cmd.op {
                CommandOp::Set => {
                    module.set_param(cmd.param, cmd.value.as_f64(), false);
                    self.commands_applied += 1;
                }
                CommandOp::Gate => {
                    module.set_gate(cmd.value.as_bool());
                    self.commands_applied += 1;
                }
                CommandOp::Patch => {
                    // Patch mutation is a build-time flow, not a render-time
                    // command; ignore here.
                    self.commands_dropped += 1;
                }
            }
        }
    }

    // ── processing ──────────────────────────────────────────────────────

    /// Drain commands and render one buffer. Allocation-free.
    ///
    /// An empty patch renders silence.
    pub fn process_chain(&mut self, input: Option<&[Sample]>) -> &[Sample] {
        self.process_commands();

        if self.router.is_some() {
            return self.process_router(input);
        }

        match input {
            Some(buf) => self.chain_buffers[0].copy_from_slice(buf),
            None => self.chain_buffers[0].fill(0.0),
        }

        let mut current = 0;
        for i in 0..self.modules.len() {
            let next = (i + 1) % self.chain_buffers.len();
            let (input_buf, output_buf) = two_slots(&mut self.chain_buffers, current, next);
            self.modules[i].1.process_buffer(Some(input_buf), output_buf);
            current = next;
        }

        self.buffers_processed += 1;
        &self.chain_buffers[current]
    }

    fn process_router(&mut self, input: Option<&[Sample]>) -> &[Sample] {
        let router = self.router.as_mut().expect("router mode");

        // Refresh the cached order after any graph mutation.
        if self.router_generation != router.generation() {
            let order: Vec<usize> = router.processing_order().to_vec();
            self.router_order.clear();
            for ri in order {
                let id = router.id_at(ri);
                if let Some(mi) = self.modules.iter().position(|(m, _)| m == id) {
                    self.router_order.push((mi, ri));
                }
            }
            self.router_generation = router.generation();
        }

        if self.router_order.is_empty() {
            self.chain_buffers[0].fill(0.0);
            self.buffers_processed += 1;
            return &self.chain_buffers[0];
        }

        let mut last = 0;
        for (k, &(mi, ri)) in self.router_order.iter().enumerate() {
            // Designated input: the sum of all incoming edges; the first
            // module in order may take the external input instead.
            if router.has_inputs(ri) {
                self.mix_buffer.fill(0.0);
                for edge in router.input_buffers(ri) {
                    for (acc, &s) in self.mix_buffer.iter_mut().zip(edge) {
                        *acc += s;
                    }
                }
            } else {
                self.mix_buffer.fill(0.0);
                if k == 0 {
                    if let Some(external) = input {
                        self.mix_buffer.copy_from_slice(external);
                    }
                }
            }

            self.modules[mi]
                .1
                .process_buffer(Some(&self.mix_buffer), &mut self.work_buffers[mi]);
            router.publish_outputs(ri, &self.work_buffers[mi]);
            last = mi;
        }

        self.buffers_processed += 1;
        &self.work_buffers[last]
    }

    // ── router management (cold path) ───────────────────────────────────

    /// Switch to DAG processing. The router's modules must be added through
    /// [`Self::router_add_module`] so host and router stay in sync.
    pub fn enable_router(&mut self, router: PatchRouter) {
        self.mix_buffer = vec![0.0; self.buffer_size];
        self.work_buffers = self
            .modules
            .iter()
            .map(|_| vec![0.0; self.buffer_size])
            .collect();
        self.router_generation = u64::MAX; // force an order rebuild
        self.router_order.clear();
        self.router = Some(router);
    }

    /// Drop the router and return to linear-chain processing.
    pub fn disable_router(&mut self) {
        self.router = None;
        self.router_order.clear();
    }

    pub fn router(&self) -> Option<&PatchRouter> {
        self.router.as_ref()
    }

    pub fn router_mut(&mut self) -> Option<&mut PatchRouter> {
        self.router.as_mut()
    }

    /// Add a module to both the host and the router
    pub fn router_add_module(&mut self, id: &str, module: Box<dyn Module>) -> RouterResult<()> {
        let router = self.router.as_mut().ok_or(crate::RouterError::RouterDisabled)?;
        router.add_module(id)?;
        if !self.add_module(id, module) {
            if let Some(router) = self.router.as_mut() {
                let _ = router.remove_module(id); // roll back
            }
            return Err(crate::RouterError::DuplicateModule(id.to_string()));
        }
        Ok(())
    }

    pub fn router_connect(&mut self, src: &str, dst: &str) -> RouterResult<()> {
        self.router
            .as_mut()
            .ok_or(crate::RouterError::RouterDisabled)?
            .connect(src, dst)
    }

    pub fn router_disconnect(&mut self, src: &str, dst: &str) -> RouterResult<()> {
        self.router
            .as_mut()
            .ok_or(crate::RouterError::RouterDisabled)?
            .disconnect(src, dst)
    }

    // ── lifecycle ───────────────────────────────────────────────────────

    /// Reset every module and clear queues, buffers and counters.
    pub fn reset(&mut self) {
        for (_, module) in &mut self.modules {
            module.prepare();
        }
        for buf in &mut self.chain_buffers {
            buf.fill(0.0);
        }
        for buf in &mut self.work_buffers {
            buf.fill(0.0);
        }
        self.pending.clear();
        self.buffers_processed = 0;
        self.commands_applied = 0;
        self.commands_dropped = 0;
    }

    pub fn stats(&self) -> HostStats {
        HostStats {
            modules: self.modules.len(),
            buffers_processed: self.buffers_processed,
            commands_applied: self.commands_applied,
            commands_dropped: self.commands_dropped,
            pending: self.pending.len(),
        }
    }
}

/// Disjoint (read, write) views of two ring positions in the buffer pool
fn two_slots(buffers: &mut [Vec<Sample>], read: usize, write: usize) -> (&[Sample], &mut [Sample]) {
    debug_assert_ne!(read, write);
    if read < write {
        let (left, right) = buffers.split_at_mut(write);
        (left[read].as_slice(), right[0].as_mut_slice())
    } else {
        let (left, right) = buffers.split_at_mut(read);
        (right[0].as_slice(), left[write].as_mut_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_dsp::{AdsrEnvelope, BiquadFilter, SineOsc, rms};

    const SR: f64 = 44100.0;
    const B: usize = 256;

    fn default_host() -> ModuleHost {
        let mut host = ModuleHost::new(SR, B);
        assert!(host.add_module("osc", Box::new(SineOsc::new(SR, B))));
        assert!(host.add_module("env", Box::new(AdsrEnvelope::new(SR, B))));
        assert!(host.add_module("filter", Box::new(BiquadFilter::new(SR, B))));
        host
    }

    #[test]
    fn test_empty_chain_is_silence() {
        let mut host = ModuleHost::new(SR, B);
        let out = host.process_chain(None);
        assert_eq!(out.len(), B);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_gated_chain_produces_audio() {
        let mut host = default_host();
        host.queue_command(CommandPacket::set_float("osc", "freq", 440.0).unwrap());
        host.queue_command(CommandPacket::set_float("osc", "gain", 0.5).unwrap());
        host.queue_command(CommandPacket::gate("env", true).unwrap());

        let mut level = 0.0;
        for _ in 0..32 {
            level = rms(host.process_chain(None));
        }
        assert!(level > 0.05 && level < 0.5, "rms = {level}");
        assert_eq!(host.stats().commands_applied, 3);
    }

    #[test]
    fn test_ungated_chain_is_silent() {
        let mut host = default_host();
        host.queue_command(CommandPacket::set_float("osc", "gain", 0.8).unwrap());
        for _ in 0..8 {
            let out = host.process_chain(None);
            assert!(rms(out) < 1e-6);
        }
    }

    #[test]
    fn test_unknown_target_silently_dropped() {
        let mut host = default_host();
        host.queue_command(CommandPacket::set_float("nope", "freq", 1.0).unwrap());
        host.process_commands();
        let stats = host.stats();
        assert_eq!(stats.commands_applied, 0);
        assert_eq!(stats.commands_dropped, 1);
    }

    #[test]
    fn test_malformed_packet_silently_dropped() {
        let mut host = default_host();
        let mut bytes = [0u8; pulse_core::COMMAND_PACKET_SIZE];
        bytes[0] = 99;
        host.queue_command(CommandPacket::from_bytes(bytes));
        host.process_commands();
        assert_eq!(host.stats().commands_dropped, 1);
    }

    #[test]
    fn test_commands_apply_at_boundary() {
        let mut host = default_host();
        host.queue_command(CommandPacket::gate("env", true).unwrap());
        host.queue_command(CommandPacket::set_float("osc", "gain", 1.0).unwrap());
        host.process_chain(None);
        // Second identical set is indistinguishable after one window.
        host.queue_command(CommandPacket::set_float("osc", "gain", 1.0).unwrap());
        for _ in 0..32 {
            host.process_chain(None);
        }
        let gain = host.module_state("osc").unwrap().param("gain").unwrap();
        assert!((gain - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_capacity_bounded() {
        let mut host = ModuleHost::new(SR, B);
        for i in 0..MAX_CHAIN_MODULES {
            assert!(host.add_module(&format!("m{i}"), Box::new(SineOsc::new(SR, B))));
        }
        assert!(!host.add_module("extra", Box::new(SineOsc::new(SR, B))));
        assert!(!host.add_module("m0", Box::new(SineOsc::new(SR, B))));
    }

    #[test]
    fn test_router_mode_matches_chain_topology() {
        // osc → env → filter as a DAG must behave like the linear chain.
        let mut host = ModuleHost::new(SR, B);
        host.enable_router(PatchRouter::new(B));
        host.router_add_module("osc", Box::new(SineOsc::new(SR, B)))
            .unwrap();
        host.router_add_module("env", Box::new(AdsrEnvelope::new(SR, B)))
            .unwrap();
        host.router_add_module("filter", Box::new(BiquadFilter::new(SR, B)))
            .unwrap();
        host.router_connect("osc", "env").unwrap();
        host.router_connect("env", "filter").unwrap();

        host.queue_command(CommandPacket::gate("env", true).unwrap());
        let mut level = 0.0;
        for _ in 0..32 {
            level = rms(host.process_chain(None));
        }
        assert!(level > 0.05, "router chain silent, rms = {level}");
    }

    #[test]
    fn test_router_sums_parallel_sources() {
        let mut host = ModuleHost::new(SR, B);
        host.enable_router(PatchRouter::new(B));
        host.router_add_module("osc1", Box::new(SineOsc::new(SR, B)))
            .unwrap();
        host.router_add_module("osc2", Box::new(SineOsc::new(SR, B)))
            .unwrap();
        host.router_add_module("filter", Box::new(BiquadFilter::new(SR, B)))
            .unwrap();
        host.router_connect("osc1", "filter").unwrap();
        host.router_connect("osc2", "filter").unwrap();
        host.queue_command(CommandPacket::set_float("osc1", "freq", 200.0).unwrap());
        host.queue_command(CommandPacket::set_float("osc2", "freq", 200.0).unwrap());

        let mut summed = 0.0;
        for _ in 0..32 {
            summed = rms(host.process_chain(None));
        }

        // One source alone is about half the level of two in phase.
        let mut single = ModuleHost::new(SR, B);
        single.enable_router(PatchRouter::new(B));
        single
            .router_add_module("osc1", Box::new(SineOsc::new(SR, B)))
            .unwrap();
        single
            .router_add_module("filter", Box::new(BiquadFilter::new(SR, B)))
            .unwrap();
        single.router_connect("osc1", "filter").unwrap();
        single.queue_command(CommandPacket::set_float("osc1", "freq", 200.0).unwrap());
        let mut one = 0.0;
        for _ in 0..32 {
            one = rms(single.process_chain(None));
        }

        assert!((summed / one - 2.0).abs() < 0.2, "sum {summed} vs one {one}");
    }

    #[test]
    fn test_reset_clears_state() {
        let mut host = default_host();
        host.queue_command(CommandPacket::gate("env", true).unwrap());
        for _ in 0..8 {
            host.process_chain(None);
        }
        host.reset();
        let stats = host.stats();
        assert_eq!(stats.buffers_processed, 0);
        assert_eq!(stats.pending, 0);
        let out = host.process_chain(None);
        assert!(rms(out) < 1e-6);
    }
}
