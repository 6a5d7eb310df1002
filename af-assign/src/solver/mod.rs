//! Single-origin label-setting shortest paths (Dijkstra).
//!
//! A [`Solver`] owns the scratch arrays for one worker and is reused for every origin that worker
//! processes. Each call to [`Solver::run`] only resets the nodes the previous search touched.
//!
//! Equal-cost alternatives are resolved by discovery order, which does not depend on the heap
//! implementation:
//! - a node's outgoing links are relaxed in ascending [`LinkId`] order;
//! - a label only changes on a strictly smaller distance, so the first path to reach a distance
//!   keeps the node;
//! - heap entries with equal distance are popped in insertion order.
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;

use crate::errors::AssignmentError;
use crate::graph::Graph;
use crate::ids::{
    LinkId,
    NodeId,
};

/// Predecessor sentinel for nodes without a predecessor link.
const NO_LINK: u32 = u32::MAX;

/// Heap entry: `(distance, insertion sequence, node)`, min-ordered through `Reverse`.
type QueueEntry = Reverse<(OrderedFloat<f64>, u64, u32)>;

/// Options that change which paths a search may use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SearchOptions {
    /// Never route through a centroid other than the origin: centroids are settled but their
    /// outgoing links are not relaxed.
    pub block_centroid_flows: bool,
}

/// Per-worker Dijkstra scratch state.
pub struct Solver<'g> {
    graph: &'g Graph,
    distance: Vec<f64>,
    predecessor: Vec<u32>,
    settled: Vec<bool>,
    pending: Vec<bool>,
    /// Nodes that received a label in the last search, for the reset.
    touched: Vec<NodeId>,
    /// Nodes in the order they were settled in the last search.
    order: Vec<NodeId>,
    heap: BinaryHeap<QueueEntry>,
    sequence: u64,
}

impl<'g> Solver<'g> {
    #[must_use]
    pub fn new(graph: &'g Graph) -> Self {
        let n = graph.num_nodes();
        Self {
            graph,
            distance: vec![f64::INFINITY; n],
            predecessor: vec![NO_LINK; n],
            settled: vec![false; n],
            pending: vec![false; n],
            touched: Vec::new(),
            order: Vec::new(),
            heap: BinaryHeap::new(),
            sequence: 0,
        }
    }

    #[must_use]
    pub const fn graph(&self) -> &'g Graph {
        self.graph
    }

    /// Shortest paths from `origin`.
    ///
    /// The search stops as soon as every node in `targets` is settled; with no targets it settles
    /// every reachable node. Nodes that are not settled when the search stops report no distance.
    pub fn run(
        &mut self,
        origin: NodeId,
        targets: &[NodeId],
        options: SearchOptions,
    ) -> Result<ShortestPathTree<'_>, AssignmentError> {
        let graph = self.graph;
        if !graph.contains(origin) {
            return Err(AssignmentError::UnknownNode(origin));
        }
        if let Some(&bad) = targets.iter().find(|t| !graph.contains(**t)) {
            return Err(AssignmentError::UnknownNode(bad));
        }
        self.reset();

        let mut remaining = 0usize;
        for t in targets {
            if !self.pending[t.index()] {
                self.pending[t.index()] = true;
                remaining += 1;
            }
        }

        self.label(origin, 0.0, NO_LINK);
        let (out_links, out_heads, out_costs) = graph.adjacency();

        while let Some(Reverse((OrderedFloat(dist), _, raw))) = self.heap.pop() {
            let node = NodeId(raw);
            let v = node.index();
            if self.settled[v] {
                continue;
            }
            self.settled[v] = true;
            self.order.push(node);

            if self.pending[v] {
                self.pending[v] = false;
                remaining -= 1;
                if remaining == 0 {
                    break;
                }
            }
            if options.block_centroid_flows && node != origin && graph.is_centroid(node) {
                continue;
            }

            for slot in graph.slots(node) {
                let head = out_heads[slot];
                let candidate = dist + out_costs[slot];
                if candidate < self.distance[head.index()] {
                    self.label(head, candidate, out_links[slot].0);
                }
            }
        }

        // Targets left pending were unreachable; clear them for the next search.
        for t in targets {
            self.pending[t.index()] = false;
        }

        Ok(ShortestPathTree {
            origin,
            distance: &self.distance,
            predecessor: &self.predecessor,
            settled: &self.settled,
            order: &self.order,
        })
    }

    /// Sets a tentative label and queues the node.
    fn label(&mut self, node: NodeId, distance: f64, link: u32) {
        let v = node.index();
        if self.distance[v].is_infinite() {
            self.touched.push(node);
        }
        self.distance[v] = distance;
        self.predecessor[v] = link;
        self.sequence += 1;
        self.heap.push(Reverse((OrderedFloat(distance), self.sequence, node.0)));
    }

    /// Clears the state left by the previous search.
    fn reset(&mut self) {
        for node in self.touched.drain(..) {
            let v = node.index();
            self.distance[v] = f64::INFINITY;
            self.predecessor[v] = NO_LINK;
            self.settled[v] = false;
        }
        self.order.clear();
        self.heap.clear();
        self.sequence = 0;
    }
}

/// Result of one search: final distances and predecessor links of the settled nodes, indexed by
/// node.
#[derive(Clone, Copy, Debug)]
pub struct ShortestPathTree<'s> {
    origin: NodeId,
    distance: &'s [f64],
    predecessor: &'s [u32],
    settled: &'s [bool],
    order: &'s [NodeId],
}

impl<'s> ShortestPathTree<'s> {
    #[must_use]
    pub const fn origin(&self) -> NodeId {
        self.origin
    }

    /// Shortest distance from the origin, or `None` if `node` was not reached.
    #[must_use]
    pub fn distance(&self, node: NodeId) -> Option<f64> {
        self.is_reachable(node).then(|| self.distance[node.index()])
    }

    /// Last link of the shortest path to `node`. `None` for the origin and for nodes that were not
    /// reached.
    #[must_use]
    pub fn predecessor(&self, node: NodeId) -> Option<LinkId> {
        if !self.is_reachable(node) {
            return None;
        }
        match self.predecessor[node.index()] {
            NO_LINK => None,
            link => Some(LinkId(link)),
        }
    }

    /// Whether `node` was settled, i.e. has a final shortest distance.
    #[must_use]
    pub fn is_reachable(&self, node: NodeId) -> bool {
        self.settled.get(node.index()).copied().unwrap_or(false)
    }

    /// Settled nodes in settlement order; every node appears after the tail of its predecessor
    /// link.
    #[must_use]
    pub const fn settlement_order(&self) -> &'s [NodeId] {
        self.order
    }

    /// A tree over caller-provided arrays, for exercising the tracers on hand-made (and
    /// deliberately corrupted) predecessor data.
    #[cfg(test)]
    pub(crate) const fn from_parts(
        origin: NodeId,
        distance: &'s [f64],
        predecessor: &'s [u32],
        settled: &'s [bool],
        order: &'s [NodeId],
    ) -> Self {
        Self { origin, distance, predecessor, settled, order }
    }
}
