//! Select-link analysis: which OD pairs route over a chosen set of links, and where their demand
//! goes on the rest of the network.
use serde::{
    Deserialize,
    Serialize,
};

use super::LinkVolumes;
use crate::errors::AssignmentError;
use crate::graph::Graph;
use crate::ids::LinkId;
use crate::matrix::OdMatrix;

/// A named set of links. An OD pair matches if its shortest path uses any of them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectLinkQuery {
    pub name: String,
    pub links: Vec<LinkId>,
}

/// Output of one [`SelectLinkQuery`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectLinkResult {
    pub name: String,
    /// Demand of the matching OD pairs, `origins × destinations × cores`.
    pub od: OdMatrix,
    /// Volumes that only the matching OD pairs put on each link.
    pub volumes: LinkVolumes,
}

/// For every link, the queries that select it.
#[derive(Clone, Debug)]
pub(crate) struct SelectLinkIndex {
    names: Vec<String>,
    by_link: Vec<Vec<usize>>,
}

impl SelectLinkIndex {
    pub(crate) fn new(graph: &Graph, queries: &[SelectLinkQuery]) -> Result<Self, AssignmentError> {
        let mut by_link = vec![Vec::new(); graph.num_links()];
        let mut names: Vec<String> = Vec::with_capacity(queries.len());
        for (q, query) in queries.iter().enumerate() {
            if names.contains(&query.name) {
                return Err(AssignmentError::DuplicateSelectLink(query.name.clone()));
            }
            for &link in &query.links {
                let selecting: &mut Vec<usize> = by_link
                    .get_mut(link.index())
                    .ok_or_else(|| AssignmentError::UnknownSelectLink { query: query.name.clone(), link })?;
                if selecting.last() != Some(&q) {
                    selecting.push(q);
                }
            }
            names.push(query.name.clone());
        }
        Ok(Self { names, by_link })
    }

    pub(crate) fn len(&self) -> usize {
        self.names.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Splits the combined OD output (`queries × cores` layers per cell) and the per-query volumes
    /// into one result per query.
    pub(crate) fn results(&self, od: &OdMatrix, volumes: Vec<LinkVolumes>, cores: usize) -> Vec<SelectLinkResult> {
        self.names
            .iter()
            .zip(volumes)
            .enumerate()
            .map(|(q, (name, volumes))| SelectLinkResult { name: name.clone(), od: od.layers(q * cores, cores), volumes })
            .collect()
    }
}

/// Per-block select-link accumulators.
#[derive(Clone, Debug)]
pub(crate) struct SelectLinkScratch {
    hits: Vec<bool>,
    pub(crate) volumes: Vec<LinkVolumes>,
}

impl SelectLinkScratch {
    pub(crate) fn new(index: &SelectLinkIndex, links: usize, cores: usize) -> Self {
        Self { hits: vec![false; index.len()], volumes: vec![LinkVolumes::new(links, cores); index.len()] }
    }

    /// Records one loaded path. `od_cell` holds the `queries × cores` select-link layers of the
    /// path's OD cell.
    pub(crate) fn record(&mut self, index: &SelectLinkIndex, path: &[LinkId], quantities: &[f64], od_cell: &mut [f64]) {
        self.hits.fill(false);
        for link in path {
            for &q in &index.by_link[link.index()] {
                self.hits[q] = true;
            }
        }

        let cores = quantities.len();
        for (q, _) in self.hits.iter().enumerate().filter(|&(_, &hit)| hit) {
            for (cell, quantity) in od_cell[q * cores..(q + 1) * cores].iter_mut().zip(quantities) {
                *cell += quantity;
            }
            self.volumes[q].add_path(path, quantities);
        }
    }
}
