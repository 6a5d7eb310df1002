//! Path tracing and all-or-nothing link loading.
//!
//! Paths are recovered from a [`ShortestPathTree`] by following predecessor links from the
//! destination back to the origin. Loading adds one OD pair's demand, for every core, to each link
//! of its path exactly once.
mod select_link;

use serde::{
    Deserialize,
    Serialize,
};

pub use self::select_link::{
    SelectLinkQuery,
    SelectLinkResult,
};
pub(crate) use self::select_link::{
    SelectLinkIndex,
    SelectLinkScratch,
};
use crate::errors::AssignmentError;
use crate::graph::Graph;
use crate::ids::{
    LinkId,
    NodeId,
};
use crate::matrix::OdMatrix;
use crate::solver::ShortestPathTree;

/// Quantity loaded per pair in [`Loading::Unit`] mode.
const UNIT: [f64; 1] = [1.0];

/// What gets loaded onto the shortest paths.
#[derive(Clone, Copy, Debug)]
pub enum Loading<'a> {
    /// Load the demand matrix; one volume layer per matrix core.
    Demand(&'a OdMatrix),
    /// Load one unit per reachable OD pair, which counts the paths using each link.
    Unit,
    /// Record skims only; link volumes stay zero.
    SkimOnly,
}

impl Loading<'_> {
    /// Number of volume layers this loading produces.
    #[must_use]
    pub fn cores(&self) -> usize {
        match self {
            Self::Demand(m) => m.depth(),
            Self::Unit | Self::SkimOnly => 1,
        }
    }

    /// Quantities to load for the pair at `(row, col)`, or `None` if nothing is loaded.
    pub(crate) fn quantities(&self, row: usize, col: usize) -> Option<&[f64]> {
        match self {
            Self::Demand(m) => Some(m.cell(row, col)),
            Self::Unit => Some(UNIT.as_slice()),
            Self::SkimOnly => None,
        }
    }
}

/// Link volumes, `links × cores`, stored link-major.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkVolumes {
    cores: usize,
    data: Vec<f64>,
}

impl LinkVolumes {
    #[must_use]
    pub fn new(links: usize, cores: usize) -> Self {
        Self { cores, data: vec![0.0; links * cores] }
    }

    #[must_use]
    pub fn num_links(&self) -> usize {
        self.data.len().checked_div(self.cores).unwrap_or(0)
    }

    #[must_use]
    pub const fn cores(&self) -> usize {
        self.cores
    }

    /// # Panics
    ///
    /// Panics if `link` or `core` is out of range.
    #[must_use]
    pub fn get(&self, link: LinkId, core: usize) -> f64 {
        assert!(core < self.cores, "core out of range");
        self.data[link.index() * self.cores + core]
    }

    /// All cores of one link.
    #[must_use]
    pub fn link(&self, link: LinkId) -> &[f64] {
        let start = link.index() * self.cores;
        &self.data[start..start + self.cores]
    }

    /// Volumes of one core, indexed by link.
    pub fn core(&self, core: usize) -> impl Iterator<Item = f64> + '_ {
        self.data.iter().skip(core).step_by(self.cores.max(1)).copied()
    }

    /// Sum over all links of one core.
    #[must_use]
    pub fn total(&self, core: usize) -> f64 {
        self.core(core).sum()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Adds `quantities` (one per core) to every link of `path`.
    pub fn add_path(&mut self, path: &[LinkId], quantities: &[f64]) {
        debug_assert_eq!(quantities.len(), self.cores);
        for link in path {
            let start = link.index() * self.cores;
            for (v, q) in self.data[start..start + self.cores].iter_mut().zip(quantities) {
                *v += q;
            }
        }
    }

    /// Element-wise `self += other`.
    pub fn absorb(&mut self, other: &Self) {
        debug_assert_eq!(self.data.len(), other.data.len());
        for (v, o) in self.data.iter_mut().zip(&other.data) {
            *v += o;
        }
    }
}

/// Writes the links of the shortest path to `destination` into `path`, in travel order.
///
/// Returns `Ok(false)` and leaves `path` empty if the destination was not reached. A predecessor
/// chain that does not return to the origin within `N` steps, or that breaks off at a settled
/// node, is reported as corruption.
pub fn trace_path(
    graph: &Graph,
    tree: &ShortestPathTree<'_>,
    destination: NodeId,
    path: &mut Vec<LinkId>,
) -> Result<bool, AssignmentError> {
    path.clear();
    if !tree.is_reachable(destination) {
        return Ok(false);
    }

    let origin = tree.origin();
    let mut node = destination;
    while node != origin {
        let link = tree.predecessor(node).ok_or(AssignmentError::MissingPredecessor { origin, node })?;
        path.push(link);
        if path.len() > graph.num_nodes() {
            return Err(AssignmentError::CyclicPredecessor { origin, destination, steps: path.len() });
        }
        node = graph.tail(link);
    }
    path.reverse();
    Ok(true)
}
