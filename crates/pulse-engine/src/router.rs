//! DAG signal routing
//!
//! Directed acyclic graph over module ids with a pre-allocated buffer per
//! edge. `connect` rejects any edge that would close a cycle, so the cached
//! Kahn ordering always exists. The order cache is invalidated on every
//! structural mutation and rebuilt lazily.

use std::collections::VecDeque;

use thiserror::Error;

use pulse_core::Sample;

/// Maximum modules a router can hold
pub const MAX_ROUTER_MODULES: usize = 16;

/// Maximum connections (pre-allocated edge buffers)
pub const MAX_EDGES: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("connecting {src} -> {dst} would create a cycle")]
    WouldCycle { src: String, dst: String },

    #[error("unknown module: {0}")]
    UnknownModule(String),

    #[error("module {0} already present")]
    DuplicateModule(String),

    #[error("router is at module capacity ({MAX_ROUTER_MODULES})")]
    ModuleCapacity,

    #[error("router is at edge capacity ({MAX_EDGES})")]
    EdgeCapacity,

    #[error("router mode is not enabled")]
    RouterDisabled,
}

pub type RouterResult<T> = Result<T, RouterError>;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Edge {
    src: usize,
    dst: usize,
    buffer: usize,
}

/// DAG of module ids with per-edge pre-allocated buffers
pub struct PatchRouter {
    buffer_size: usize,
    ids: Vec<String>,
    edges: Vec<Edge>,
    edge_buffers: Vec<Vec<Sample>>,
    free_buffers: Vec<usize>,
    order: Vec<usize>,
    order_valid: bool,
    generation: u64,
}

impl PatchRouter {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size,
            ids: Vec::with_capacity(MAX_ROUTER_MODULES),
            edges: Vec::with_capacity(MAX_EDGES),
            edge_buffers: (0..MAX_EDGES).map(|_| vec![0.0; buffer_size]).collect(),
            free_buffers: (0..MAX_EDGES).rev().collect(),
            order: Vec::with_capacity(MAX_ROUTER_MODULES),
            order_valid: false,
            generation: 0,
        }
    }

    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Bumped on every structural mutation; lets the host detect staleness
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn module_count(&self) -> usize {
        self.ids.len()
    }

    pub fn module_ids(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.ids.iter().position(|m| m == id)
    }

    /// Module id at a router index (valid between mutations)
    pub(crate) fn id_at(&self, idx: usize) -> &str {
        &self.ids[idx]
    }

    fn touch(&mut self) {
        self.order_valid = false;
        self.generation += 1;
    }

    pub fn add_module(&mut self, id: &str) -> RouterResult<()> {
        if self.ids.len() >= MAX_ROUTER_MODULES {
            return Err(RouterError::ModuleCapacity);
        }
        if self.index_of(id).is_some() {
            return Err(RouterError::DuplicateModule(id.to_string()));
        }
        self.ids.push(id.to_string());
        self.touch();
        log::debug!("router: added module {id}");
        Ok(())
    }

    pub fn remove_module(&mut self, id: &str) -> RouterResult<()> {
        let idx = self
            .index_of(id)
            .ok_or_else(|| RouterError::UnknownModule(id.to_string()))?;

        self.edges.retain(|e| {
            let keep = e.src != idx && e.dst != idx;
            if !keep {
                self.free_buffers.push(e.buffer);
            }
            keep
        });
        // Swap-remove keeps edge indices dense; patch up the moved module.
        let moved = self.ids.len() - 1;
        self.ids.swap_remove(idx);
        for edge in &mut self.edges {
            if edge.src == moved {
                edge.src = idx;
            }
            if edge.dst == moved {
                edge.dst = idx;
            }
        }
        self.touch();
        log::debug!("router: removed module {id}");
        Ok(())
    }

    /// Connect `src -> dst`. Fails with [`RouterError::WouldCycle`] when the
    /// edge would close a directed cycle; the graph is left untouched.
    pub fn connect(&mut self, src: &str, dst: &str) -> RouterResult<()> {
        let src_idx = self
            .index_of(src)
            .ok_or_else(|| RouterError::UnknownModule(src.to_string()))?;
        let dst_idx = self
            .index_of(dst)
            .ok_or_else(|| RouterError::UnknownModule(dst.to_string()))?;

        if self
            .edges
            .iter()
            .any(|e| e.src == src_idx && e.dst == dst_idx)
        {
            return Ok(()); // already connected
        }
        if self.free_buffers.is_empty() {
            return Err(RouterError::EdgeCapacity);
        }

        // A cycle through the new edge exists iff src is reachable from dst.
        if self.reaches(dst_idx, src_idx) {
            return Err(RouterError::WouldCycle {
                src: src.to_string(),
                dst: dst.to_string(),
            });
        }

        let buffer = self.free_buffers.pop().expect("checked non-empty");
        self.edge_buffers[buffer].fill(0.0);
        self.edges.push(Edge {
            src: src_idx,
            dst: dst_idx,
            buffer,
        });
        self.touch();
        log::debug!("router: connected {src} -> {dst}");
        Ok(())
    }

    pub fn disconnect(&mut self, src: &str, dst: &str) -> RouterResult<()> {
        let src_idx = self
            .index_of(src)
            .ok_or_else(|| RouterError::UnknownModule(src.to_string()))?;
        let dst_idx = self
            .index_of(dst)
            .ok_or_else(|| RouterError::UnknownModule(dst.to_string()))?;

        let before = self.edges.len();
        self.edges.retain(|e| {
            let keep = e.src != src_idx || e.dst != dst_idx;
            if !keep {
                self.free_buffers.push(e.buffer);
            }
            keep
        });
        if self.edges.len() == before {
            return Err(RouterError::UnknownModule(format!("{src} -> {dst}")));
        }
        self.touch();
        log::debug!("router: disconnected {src} -> {dst}");
        Ok(())
    }

    /// DFS reachability: is `to` reachable from `from`?
    fn reaches(&self, from: usize, to: usize) -> bool {
        let mut visited = [false; MAX_ROUTER_MODULES];
        let mut stack = vec![from];
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if visited[node] {
                continue;
            }
            visited[node] = true;
            for edge in &self.edges {
                if edge.src == node {
                    stack.push(edge.dst);
                }
            }
        }
        false
    }

    /// True iff the graph is acyclic (it always is, by construction; this is
    /// the cold-path verification hook)
    pub fn validate_graph(&mut self) -> bool {
        self.rebuild_order();
        self.order.len() == self.ids.len()
    }

    /// Topological processing order (Kahn), cached until the next mutation
    pub fn processing_order(&mut self) -> &[usize] {
        self.rebuild_order();
        &self.order
    }

    /// Processing order as module ids (cold path)
    pub fn processing_order_ids(&mut self) -> Vec<String> {
        self.rebuild_order();
        self.order.iter().map(|&i| self.ids[i].clone()).collect()
    }

    fn rebuild_order(&mut self) {
        if self.order_valid {
            return;
        }

        let mut in_degree = [0usize; MAX_ROUTER_MODULES];
        for edge in &self.edges {
            in_degree[edge.dst] += 1;
        }

        let mut queue: VecDeque<usize> = (0..self.ids.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();

        self.order.clear();
        while let Some(node) = queue.pop_front() {
            self.order.push(node);
            for edge in &self.edges {
                if edge.src == node {
                    in_degree[edge.dst] -= 1;
                    if in_degree[edge.dst] == 0 {
                        queue.push_back(edge.dst);
                    }
                }
            }
        }
        self.order_valid = true;
    }

    /// Iterate incoming edge buffers of module index `dst`
    pub(crate) fn input_buffers(&self, dst: usize) -> impl Iterator<Item = &[Sample]> {
        self.edges
            .iter()
            .filter(move |e| e.dst == dst)
            .map(|e| self.edge_buffers[e.buffer].as_slice())
    }

    /// Copy `output` into every outgoing edge buffer of module index `src`
    pub(crate) fn publish_outputs(&mut self, src: usize, output: &[Sample]) {
        for edge in &self.edges {
            if edge.src == src {
                self.edge_buffers[edge.buffer].copy_from_slice(output);
            }
        }
    }

    pub(crate) fn has_inputs(&self, dst: usize) -> bool {
        self.edges.iter().any(|e| e.dst == dst)
    }

    pub fn connections(&self) -> Vec<(String, String)> {
        self.edges
            .iter()
            .map(|e| (self.ids[e.src].clone(), self.ids[e.dst].clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abc() -> PatchRouter {
        let mut router = PatchRouter::new(64);
        router.add_module("a").unwrap();
        router.add_module("b").unwrap();
        router.add_module("c").unwrap();
        router
    }

    #[test]
    fn test_cycle_rejected() {
        let mut router = abc();
        router.connect("a", "b").unwrap();
        router.connect("b", "c").unwrap();

        let err = router.connect("c", "a").unwrap_err();
        assert!(matches!(err, RouterError::WouldCycle { .. }));

        // Graph unchanged: still valid, still a→b→c.
        assert!(router.validate_graph());
        assert_eq!(router.processing_order_ids(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_self_cycle_rejected() {
        let mut router = abc();
        assert!(matches!(
            router.connect("a", "a"),
            Err(RouterError::WouldCycle { .. })
        ));
    }

    #[test]
    fn test_kahn_order_respects_edges() {
        let mut router = abc();
        router.add_module("d").unwrap();
        // Diamond: a → b, a → c, b → d, c → d
        router.connect("a", "b").unwrap();
        router.connect("a", "c").unwrap();
        router.connect("b", "d").unwrap();
        router.connect("c", "d").unwrap();

        let order = router.processing_order_ids();
        let pos = |id: &str| order.iter().position(|m| m == id).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("a") < pos("c"));
        assert!(pos("b") < pos("d"));
        assert!(pos("c") < pos("d"));
    }

    #[test]
    fn test_disconnect_frees_edge_buffer() {
        let mut router = abc();
        router.connect("a", "b").unwrap();
        router.disconnect("a", "b").unwrap();
        assert!(router.connections().is_empty());
        // Re-connecting (and reversing) works after a disconnect.
        router.connect("b", "a").unwrap();
        assert!(router.validate_graph());
    }

    #[test]
    fn test_duplicate_and_unknown_modules() {
        let mut router = abc();
        assert!(matches!(
            router.add_module("a"),
            Err(RouterError::DuplicateModule(_))
        ));
        assert!(matches!(
            router.connect("a", "zz"),
            Err(RouterError::UnknownModule(_))
        ));
    }

    #[test]
    fn test_remove_module_drops_its_edges() {
        let mut router = abc();
        router.connect("a", "b").unwrap();
        router.connect("b", "c").unwrap();
        router.remove_module("b").unwrap();
        assert!(router.connections().is_empty());
        assert_eq!(router.module_count(), 2);
        assert!(router.validate_graph());
    }

    #[test]
    fn test_edge_capacity() {
        let mut router = PatchRouter::new(16);
        for i in 0..MAX_ROUTER_MODULES {
            router.add_module(&format!("m{i}")).unwrap();
        }
        // A hub fan-out saturates the edge pool eventually.
        let mut connected = 0;
        'outer: for src in 0..MAX_ROUTER_MODULES {
            for dst in src + 1..MAX_ROUTER_MODULES {
                match router.connect(&format!("m{src}"), &format!("m{dst}")) {
                    Ok(()) => connected += 1,
                    Err(RouterError::EdgeCapacity) => break 'outer,
                    Err(e) => panic!("unexpected: {e}"),
                }
            }
        }
        assert_eq!(connected, MAX_EDGES);
    }
}
