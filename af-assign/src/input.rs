//! Network descriptions read from JSON or YAML files.
//!
//! ```yaml
//! nodes: 4
//! centroids: [0, 3]
//! cost_fields: [time, distance]
//! links:
//!   - { tail: 0, head: 1, costs: [1.0, 1.0] }
//!   - { tail: 1, head: 3, costs: [1.0, 1.0] }
//! demand:
//!   - { origin: 0, destination: 3, values: [10.0] }
//! ```
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{
    Deserialize,
    Serialize,
};
use tracing::{
    debug,
    instrument,
};

use crate::errors::{
    GraphError,
    InputError,
};
use crate::graph::{
    Graph,
    GraphBuilder,
    PathCost,
};
use crate::ids::NodeId;
use crate::matrix::OdMatrix;

/// One directed link; `costs` follow the file's `cost_fields`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkRecord {
    pub tail: u32,
    pub head: u32,
    pub costs: Vec<f64>,
}

/// Demand from one origin to one destination, one value per core.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DemandRecord {
    pub origin: u32,
    pub destination: u32,
    pub values: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkFile {
    pub nodes: usize,
    pub centroids: Vec<u32>,
    pub cost_fields: Vec<String>,
    pub links: Vec<LinkRecord>,

    /// Sparse demand; pairs not listed have none.
    #[serde(default)]
    pub demand: Vec<DemandRecord>,

    /// Number of demand cores. Taken from the first demand record if omitted.
    #[serde(default)]
    pub cores: Option<usize>,
}

impl NetworkFile {
    /// Reads a network file: JSON if the extension is `.json`, YAML otherwise.
    #[instrument]
    pub fn from_path(path: &Path) -> Result<Self, InputError> {
        let contents = fs::read_to_string(path).map_err(|source| InputError::Io { path: path.to_path_buf(), source })?;
        let network = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&contents)?,
            _ => Self::from_yaml_str(&contents)?,
        };
        debug!(nodes = network.nodes, links = network.links.len(), demand = network.demand.len(), "network read");
        Ok(network)
    }

    pub fn from_json_str(contents: &str) -> Result<Self, InputError> {
        Ok(serde_json::from_str(contents)?)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, InputError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// A builder holding the file's nodes, centroids and links.
    pub fn builder(&self) -> Result<GraphBuilder, GraphError> {
        let mut builder =
            GraphBuilder::new(self.nodes, &self.cost_fields).with_centroids(self.centroids.iter().copied());
        for link in &self.links {
            builder.add_link(link.tail, link.head, &link.costs)?;
        }
        Ok(builder)
    }

    /// Builds the graph minimizing `path_cost`.
    pub fn graph(&self, path_cost: &PathCost) -> Result<Graph, GraphError> {
        self.builder()?.build(path_cost)
    }

    /// Demand cores: declared, or inferred from the first record, or 1 without demand.
    #[must_use]
    pub fn cores(&self) -> usize {
        self.cores.or_else(|| self.demand.first().map(|d| d.values.len())).unwrap_or(1)
    }

    /// Dense demand over `origins × destinations`. Records for the same pair are added up.
    pub fn demand_matrix(&self, origins: &[NodeId], destinations: &[NodeId]) -> Result<OdMatrix, InputError> {
        let rows: HashMap<u32, usize> = origins.iter().enumerate().map(|(i, o)| (o.0, i)).collect();
        let cols: HashMap<u32, usize> = destinations.iter().enumerate().map(|(j, d)| (d.0, j)).collect();
        let cores = self.cores();

        let mut matrix = OdMatrix::new(origins.len(), destinations.len(), cores);
        for DemandRecord { origin, destination, values } in &self.demand {
            let (Some(&row), Some(&col)) = (rows.get(origin), cols.get(destination)) else {
                return Err(InputError::UnknownZone { origin: *origin, destination: *destination });
            };
            if values.len() != cores {
                return Err(InputError::CoreCount {
                    origin: *origin,
                    destination: *destination,
                    expected: cores,
                    found: values.len(),
                });
            }
            for (core, value) in values.iter().enumerate() {
                matrix.add(row, col, core, *value);
            }
        }
        matrix.validate_demand()?;
        Ok(matrix)
    }
}
