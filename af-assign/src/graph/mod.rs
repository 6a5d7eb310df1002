//! Immutable network representation shared by every search in a run.
//!
//! Outgoing links are stored row-compressed: the links leaving node `v` occupy the slots
//! `offsets[v]..offsets[v + 1]` of the adjacency arrays, in ascending [`LinkId`] order. The head
//! node and path cost of each slot are stored next to the link id so that relaxing a node touches
//! three contiguous arrays and nothing else.
//!
//! A graph is built once per assignment class through [`GraphBuilder`] and is never mutated
//! afterwards, so any number of threads can traverse it at once without locking.
use std::ops::Range;

use serde::{
    Deserialize,
    Serialize,
};
use tracing::{
    debug,
    instrument,
    warn,
};

use crate::errors::GraphError;
use crate::ids::{
    LinkId,
    NodeId,
};

/// Largest node count the graph accepts; `u32::MAX` is reserved as a sentinel.
pub const MAX_NODES: usize = u32::MAX as usize - 1;

/// Which link cost the shortest paths minimize.
///
/// Resolved once by [`GraphBuilder::build`] into a single cost column, so the relaxation loop
/// reads one `f64` per link regardless of the variant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathCost {
    /// Minimize one declared cost field.
    Field(String),
    /// Minimize a weighted sum of declared cost fields. Weights must be finite and non-negative.
    Generalized(Vec<(String, f64)>),
}

impl PathCost {
    /// Shorthand for [`PathCost::Field`].
    pub fn field(name: impl Into<String>) -> Self {
        Self::Field(name.into())
    }
}

/// Collects nodes, cost fields, centroids and links, then validates them into a [`Graph`].
#[derive(Clone, Debug)]
pub struct GraphBuilder {
    num_nodes: usize,
    fields: Vec<String>,
    centroids: Vec<u32>,
    endpoints: Vec<(u32, u32)>,
    costs: Vec<f64>,
}

impl GraphBuilder {
    /// A builder for a graph with nodes `0..num_nodes` and the given cost fields. Every link must
    /// carry one value per field, in this order.
    pub fn new<I, S>(num_nodes: usize, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            num_nodes,
            fields: fields.into_iter().map(Into::into).collect(),
            centroids: Vec::new(),
            endpoints: Vec::new(),
            costs: Vec::new(),
        }
    }

    /// Declares nodes as centroids (valid origins and destinations).
    #[must_use]
    pub fn with_centroids(mut self, centroids: impl IntoIterator<Item = u32>) -> Self {
        self.centroids.extend(centroids);
        self
    }

    /// Adds a directed link and returns its id. Links get consecutive ids in insertion order.
    ///
    /// Only the number of cost values is checked here; endpoints and values are validated by
    /// [`build`](Self::build) so every problem is reported against the link that caused it.
    pub fn add_link(&mut self, tail: u32, head: u32, costs: &[f64]) -> Result<LinkId, GraphError> {
        let link = LinkId(u32::try_from(self.endpoints.len()).map_err(|_| GraphError::TooManyLinks(self.endpoints.len()))?);
        if costs.len() != self.fields.len() {
            return Err(GraphError::CostArity { link, expected: self.fields.len(), found: costs.len() });
        }
        self.endpoints.push((tail, head));
        self.costs.extend_from_slice(costs);
        Ok(link)
    }

    /// Number of links added so far.
    #[must_use]
    pub fn num_links(&self) -> usize {
        self.endpoints.len()
    }

    /// Validates the collected data and lays it out for traversal, minimizing `path_cost`.
    #[instrument(skip_all, fields(nodes = self.num_nodes, links = self.endpoints.len()))]
    #[allow(clippy::cast_possible_truncation)] // node and link counts are checked against u32 first
    pub fn build(self, path_cost: &PathCost) -> Result<Graph, GraphError> {
        self.validate_fields()?;
        if self.num_nodes > MAX_NODES {
            return Err(GraphError::TooManyNodes(self.num_nodes));
        }
        if self.endpoints.len() >= u32::MAX as usize {
            return Err(GraphError::TooManyLinks(self.endpoints.len()));
        }

        let num_fields = self.fields.len();
        let num_links = self.endpoints.len();
        let mut columns = vec![Vec::with_capacity(num_links); num_fields];
        for (l, (&(tail, head), values)) in self.endpoints.iter().zip(self.costs.chunks_exact(num_fields)).enumerate() {
            let link = LinkId(l as u32);
            for node in [tail, head] {
                if node as usize >= self.num_nodes {
                    return Err(GraphError::DanglingNode { link, node, num_nodes: self.num_nodes });
                }
            }
            for (f, &value) in values.iter().enumerate() {
                if !value.is_finite() {
                    return Err(GraphError::NonFiniteCost { link, field: self.fields[f].clone(), value });
                }
                if value < 0.0 {
                    return Err(GraphError::NegativeCost { link, field: self.fields[f].clone(), value });
                }
                columns[f].push(value);
            }
        }

        let mut is_centroid = vec![false; self.num_nodes];
        for &c in &self.centroids {
            let slot = is_centroid
                .get_mut(c as usize)
                .ok_or(GraphError::CentroidOutOfRange { node: c, num_nodes: self.num_nodes })?;
            *slot = true;
        }

        let resolved = resolve_path_cost(&self.fields, &columns, path_cost)?;

        // Stable counting sort by tail keeps each node's links in ascending id order.
        let mut offsets = vec![0usize; self.num_nodes + 1];
        for &(tail, _) in &self.endpoints {
            offsets[tail as usize + 1] += 1;
        }
        for v in 0..self.num_nodes {
            offsets[v + 1] += offsets[v];
        }
        let mut cursor = offsets.clone();
        let mut out_links = vec![LinkId(0); num_links];
        let mut out_heads = vec![NodeId(0); num_links];
        let mut out_costs = vec![0.0; num_links];
        for (l, &(tail, head)) in self.endpoints.iter().enumerate() {
            let slot = cursor[tail as usize];
            cursor[tail as usize] += 1;
            let link = LinkId(l as u32);
            out_links[slot] = link;
            out_heads[slot] = NodeId(head);
            out_costs[slot] = resolved[l];
        }

        let centroids: Vec<NodeId> = is_centroid
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c)
            .map(|(v, _)| NodeId(v as u32))
            .collect();
        let isolated_centroids: Vec<NodeId> =
            centroids.iter().copied().filter(|c| offsets[c.index()] == offsets[c.index() + 1]).collect();
        if !isolated_centroids.is_empty() {
            warn!(count = isolated_centroids.len(), centroids = ?isolated_centroids, "centroids without outgoing connectors");
        }

        debug!(centroids = centroids.len(), fields = num_fields, "graph built");
        Ok(Graph {
            num_nodes: self.num_nodes,
            fields: self.fields,
            path_cost: path_cost.clone(),
            offsets,
            out_links,
            out_heads,
            out_costs,
            tails: self.endpoints.iter().map(|&(t, _)| NodeId(t)).collect(),
            heads: self.endpoints.iter().map(|&(_, h)| NodeId(h)).collect(),
            costs: columns,
            path_costs: resolved,
            is_centroid,
            centroids,
            isolated_centroids,
        })
    }

    /// Field names must exist and be unique.
    fn validate_fields(&self) -> Result<(), GraphError> {
        if self.fields.is_empty() {
            return Err(GraphError::NoCostFields);
        }
        for (i, name) in self.fields.iter().enumerate() {
            if self.fields[..i].contains(name) {
                return Err(GraphError::DuplicateField(name.clone()));
            }
        }
        Ok(())
    }
}

/// Collapses the selected path cost into one value per link.
fn resolve_path_cost(fields: &[String], columns: &[Vec<f64>], path_cost: &PathCost) -> Result<Vec<f64>, GraphError> {
    let column = |name: &str| {
        fields
            .iter()
            .position(|f| f == name)
            .map(|i| &columns[i])
            .ok_or_else(|| GraphError::UnknownField(name.to_owned()))
    };

    match path_cost {
        PathCost::Field(name) => Ok(column(name)?.clone()),
        PathCost::Generalized(terms) => {
            let num_links = columns.first().map_or(0, Vec::len);
            let mut total = vec![0.0; num_links];
            for (name, weight) in terms {
                if !weight.is_finite() || *weight < 0.0 {
                    return Err(GraphError::InvalidWeight { field: name.clone(), weight: *weight });
                }
                for (t, c) in total.iter_mut().zip(column(name)?) {
                    *t += weight * c;
                }
            }
            Ok(total)
        },
    }
}

/// Read-only view of one link.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinkView {
    pub id: LinkId,
    pub tail: NodeId,
    pub head: NodeId,
    /// Cost minimized by the shortest paths.
    pub path_cost: f64,
}

/// Row-compressed directed graph for one assignment class. See the module docs.
#[derive(Clone, Debug)]
pub struct Graph {
    num_nodes: usize,
    fields: Vec<String>,
    path_cost: PathCost,

    /// `offsets[v]..offsets[v + 1]` are the adjacency slots of node `v`.
    offsets: Vec<usize>,
    out_links: Vec<LinkId>,
    out_heads: Vec<NodeId>,
    out_costs: Vec<f64>,

    // Link-indexed columns.
    tails: Vec<NodeId>,
    heads: Vec<NodeId>,
    costs: Vec<Vec<f64>>,
    path_costs: Vec<f64>,

    is_centroid: Vec<bool>,
    centroids: Vec<NodeId>,
    isolated_centroids: Vec<NodeId>,
}

impl Graph {
    #[must_use]
    pub const fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    #[must_use]
    pub fn num_links(&self) -> usize {
        self.tails.len()
    }

    /// Declared cost field names, in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// The cost the graph was built to minimize.
    #[must_use]
    pub const fn path_cost(&self) -> &PathCost {
        &self.path_cost
    }

    #[must_use]
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }

    /// Per-link values of one cost field, indexed by [`LinkId`].
    pub fn link_costs(&self, field: &str) -> Result<&[f64], GraphError> {
        self.field_index(field)
            .map(|i| self.costs[i].as_slice())
            .ok_or_else(|| GraphError::UnknownField(field.to_owned()))
    }

    /// Per-link values of the field at `index`.
    pub(crate) fn field_column(&self, index: usize) -> &[f64] {
        &self.costs[index]
    }

    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        node.index() < self.num_nodes
    }

    #[must_use]
    pub fn contains_link(&self, link: LinkId) -> bool {
        link.index() < self.num_links()
    }

    /// `false` for nodes outside the graph.
    #[must_use]
    pub fn is_centroid(&self, node: NodeId) -> bool {
        self.is_centroid.get(node.index()).copied().unwrap_or(false)
    }

    /// All centroids, ascending.
    #[must_use]
    pub fn centroids(&self) -> &[NodeId] {
        &self.centroids
    }

    /// Centroids with no outgoing link. Every destination is unreachable from these.
    #[must_use]
    pub fn isolated_centroids(&self) -> &[NodeId] {
        &self.isolated_centroids
    }

    /// # Panics
    ///
    /// Panics if `link` is not in the graph.
    #[must_use]
    pub fn link(&self, link: LinkId) -> LinkView {
        let l = link.index();
        LinkView { id: link, tail: self.tails[l], head: self.heads[l], path_cost: self.path_costs[l] }
    }

    #[must_use]
    pub fn tail(&self, link: LinkId) -> NodeId {
        self.tails[link.index()]
    }

    #[must_use]
    pub fn head(&self, link: LinkId) -> NodeId {
        self.heads[link.index()]
    }

    /// Links leaving `node`, ascending by id.
    #[must_use]
    pub fn out_links(&self, node: NodeId) -> &[LinkId] {
        &self.out_links[self.slots(node)]
    }

    #[must_use]
    pub fn out_degree(&self, node: NodeId) -> usize {
        self.slots(node).len()
    }

    /// Adjacency slots of `node`.
    pub(crate) fn slots(&self, node: NodeId) -> Range<usize> {
        self.offsets[node.index()]..self.offsets[node.index() + 1]
    }

    /// Link, head and path cost of every slot, for the relaxation loop.
    pub(crate) fn adjacency(&self) -> (&[LinkId], &[NodeId], &[f64]) {
        (&self.out_links, &self.out_heads, &self.out_costs)
    }
}
