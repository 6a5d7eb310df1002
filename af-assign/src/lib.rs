#![deny(clippy::nursery, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
)]

//! # af-assign: all-or-nothing traffic assignment and skimming
//!
//! One call of the kernel assigns every origin-destination demand to the least-cost path of a
//! directed network and aggregates the result, as one iteration of an outer equilibrium loop:
//!
//! 1. Graph construction ([`GraphBuilder`]): validates links and costs and lays the network out
//!    as a row-compressed adjacency with the path cost resolved to a single column.
//! 2. Shortest paths ([`Solver`]): one Dijkstra search per origin with reusable scratch arrays
//!    and a deterministic tie-break.
//! 3. Loading ([`loading`]): traces each destination's path and adds its demand to every link
//!    on it; optional select-link analysis.
//! 4. Skimming ([`skims`]): sums cost fields along the chosen paths into an OD matrix.
//! 5. Scheduling ([`Assignment`]): spreads origin blocks over a rayon pool and reduces the
//!    per-block results in a fixed order, so output never depends on the thread count.
//!
//! Everything a run produces is returned in an [`AssignmentResult`]; unreachable pairs are
//! reported there, not raised as errors.

pub mod assignment;
pub mod errors;
pub mod graph;
pub mod ids;
pub mod input;
pub mod loading;
pub mod matrix;
pub mod skims;
pub mod solver;

#[cfg(any(test, feature = "testutils"))]
pub mod testutils;

pub use assignment::{
    Assignment,
    AssignmentConfig,
    AssignmentResult,
    CancelToken,
};
pub use errors::{
    AssignmentError,
    GraphError,
    InputError,
    MatrixError,
};
pub use graph::{
    Graph,
    GraphBuilder,
    PathCost,
};
pub use ids::{
    LinkId,
    NodeId,
    OdPair,
};
pub use loading::{
    LinkVolumes,
    Loading,
    SelectLinkQuery,
    SelectLinkResult,
};
pub use matrix::OdMatrix;
pub use skims::{
    SkimMatrix,
    UNREACHABLE,
};
pub use solver::{
    SearchOptions,
    ShortestPathTree,
    Solver,
};
