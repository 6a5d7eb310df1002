//! Error types for graph construction, matrices, input files and assignment runs.
use std::path::PathBuf;

use af_core::errors::Error;

use crate::ids::{
    LinkId,
    NodeId,
};

/// A graph that cannot be built. Nothing is run on a malformed graph.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphError {
    #[error("graph declares no cost fields")]
    NoCostFields,

    #[error("cost field `{0}` is declared more than once")]
    DuplicateField(String),

    #[error("unknown cost field `{0}`")]
    UnknownField(String),

    #[error("generalized cost weight {weight} for field `{field}` must be finite and non-negative")]
    InvalidWeight { field: String, weight: f64 },

    #[error("graph declares {0} nodes, more than the supported maximum")]
    TooManyNodes(usize),

    #[error("graph has {0} links, more than the supported maximum")]
    TooManyLinks(usize),

    #[error("link {link} carries {found} cost values but {expected} cost fields are declared")]
    CostArity { link: LinkId, expected: usize, found: usize },

    #[error("link {link} references node {node}, which is not declared (graph has {num_nodes} nodes)")]
    DanglingNode { link: LinkId, node: u32, num_nodes: usize },

    #[error("link {link} has negative `{field}` cost {value}")]
    NegativeCost { link: LinkId, field: String, value: f64 },

    #[error("link {link} has non-finite `{field}` cost {value}")]
    NonFiniteCost { link: LinkId, field: String, value: f64 },

    #[error("centroid {node} is not a declared node (graph has {num_nodes} nodes)")]
    CentroidOutOfRange { node: u32, num_nodes: usize },
}

/// Shape and content problems with a dense OD matrix.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MatrixError {
    #[error("matrix data has {found} values but a {rows}x{cols}x{depth} matrix needs {expected}")]
    Size { rows: usize, cols: usize, depth: usize, expected: usize, found: usize },

    #[error("matrix entry ({row}, {col}, {layer}) is {value}; demand must be finite and non-negative")]
    InvalidValue { row: usize, col: usize, layer: usize, value: f64 },
}

/// Problems reading a network description from disk.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("could not read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON network description")]
    Json(#[from] serde_json::Error),

    #[error("invalid YAML network description")]
    Yaml(#[from] serde_yaml::Error),

    #[error("demand record {origin} -> {destination} references a zone outside the origin or destination set")]
    UnknownZone { origin: u32, destination: u32 },

    #[error("demand record {origin} -> {destination} has {found} values but the file declares {expected} cores")]
    CoreCount { origin: u32, destination: u32, expected: usize, found: usize },

    #[error(transparent)]
    Matrix(#[from] MatrixError),
}

/// Failures of an assignment run. Any of these aborts the whole run; unreachable destinations
/// are not errors and are reported in the result instead.
#[derive(Debug, Error)]
pub enum AssignmentError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Matrix(#[from] MatrixError),

    #[error("node {0} is not in the graph")]
    UnknownNode(NodeId),

    #[error("node {0} is not a centroid")]
    NotACentroid(NodeId),

    #[error("zone {zone} appears more than once in the {set} set")]
    DuplicateZone { zone: NodeId, set: &'static str },

    #[error("demand matrix is {found:?} (origins, destinations) but the run has {expected:?}")]
    DemandShape { expected: (usize, usize), found: (usize, usize) },

    #[error("demand matrix has no cores")]
    NoDemandCores,

    #[error("select link query `{query}` references link {link}, which is not in the graph")]
    UnknownSelectLink { query: String, link: LinkId },

    #[error("select link query name `{0}` is used more than once")]
    DuplicateSelectLink(String),

    #[error("origins_per_block must be at least 1")]
    EmptyBlocks,

    #[error(
        "corrupted predecessor chain from origin {origin} to destination {destination}: origin not reached after {steps} steps"
    )]
    CyclicPredecessor { origin: NodeId, destination: NodeId, steps: usize },

    #[error("corrupted predecessor chain from origin {origin}: settled node {node} has no predecessor link")]
    MissingPredecessor { origin: NodeId, node: NodeId },

    #[error("assignment was cancelled")]
    Cancelled,

    #[error("worker failed while processing origin block {block}: {message}")]
    WorkerFailed { block: usize, message: String },

    #[error("could not start the worker pool")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}
