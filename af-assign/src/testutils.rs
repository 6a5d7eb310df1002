//! Fixture networks and brute-force references for tests.
use petgraph::graph::{
    DiGraph,
    NodeIndex,
};
use rand::rngs::StdRng;
use rand::{
    Rng,
    SeedableRng,
};

use crate::graph::{
    Graph,
    GraphBuilder,
    PathCost,
};
use crate::ids::NodeId;
use crate::matrix::OdMatrix;

/// Cost fields of every fixture network.
pub const FIELDS: [&str; 2] = ["time", "distance"];

/// Builds a graph over [`FIELDS`] minimizing `time`.
///
/// # Panics
///
/// Panics if the links do not make a valid graph.
#[must_use]
pub fn build(num_nodes: usize, centroids: &[u32], links: &[(u32, u32, f64, f64)]) -> Graph {
    let mut b = GraphBuilder::new(num_nodes, FIELDS).with_centroids(centroids.iter().copied());
    for &(tail, head, time, distance) in links {
        b.add_link(tail, head, &[time, distance]).expect("fixture link");
    }
    b.build(&PathCost::field("time")).expect("fixture graph")
}

/// Four nodes, two equal-time routes from 0 to 3:
///
/// ```text
///   0 --l0--> 1 --l2--> 3
///   0 --l1--> 2 --l3--> 3
/// ```
///
/// The upper route is shorter in distance. Centroids are 0 and 3.
#[must_use]
pub fn diamond() -> Graph {
    build(4, &[0, 3], &[(0, 1, 1.0, 1.0), (0, 2, 1.0, 2.0), (1, 3, 1.0, 1.0), (2, 3, 1.0, 2.0)])
}

/// A single link 0 -> 1 with time 5 and distance 2.
#[must_use]
pub fn single_link() -> Graph {
    build(2, &[0, 1], &[(0, 1, 5.0, 2.0)])
}

/// A directed chain `0 -> 1 -> ... -> n-1` with unit costs; every node is a centroid.
#[must_use]
pub fn line(n: u32) -> Graph {
    let links: Vec<_> = (1..n).map(|v| (v - 1, v, 1.0, 1.0)).collect();
    let centroids: Vec<u32> = (0..n).collect();
    build(n as usize, &centroids, &links)
}

/// A `width × height` grid with links in both directions between neighbours and small integer
/// costs, so that equal-cost ties are common. The four corners and every seventh node are
/// centroids.
#[must_use]
pub fn grid(width: u32, height: u32, seed: u64) -> Graph {
    let mut rng = StdRng::seed_from_u64(seed);
    let id = |x: u32, y: u32| y * width + x;
    let mut links = Vec::new();
    for y in 0..height {
        for x in 0..width {
            let mut neighbours = Vec::new();
            if x + 1 < width {
                neighbours.push(id(x + 1, y));
            }
            if y + 1 < height {
                neighbours.push(id(x, y + 1));
            }
            for n in neighbours {
                for (tail, head) in [(id(x, y), n), (n, id(x, y))] {
                    links.push((tail, head, f64::from(rng.gen_range(1..4u8)), f64::from(rng.gen_range(1..10u8))));
                }
            }
        }
    }
    let n = width * height;
    let mut centroids: Vec<u32> = (0..n).step_by(7).collect();
    centroids.extend([id(0, 0), id(width - 1, 0), id(0, height - 1), id(width - 1, height - 1)]);
    centroids.sort_unstable();
    centroids.dedup();
    build(n as usize, &centroids, &links)
}

/// A random sparse digraph with integer costs, including zero-cost links. Every node is a
/// centroid; some nodes may be unreachable from others.
#[must_use]
pub fn random_graph(num_nodes: u32, num_links: usize, seed: u64) -> Graph {
    let mut rng = StdRng::seed_from_u64(seed);
    let links: Vec<_> = (0..num_links)
        .map(|_| {
            (
                rng.gen_range(0..num_nodes),
                rng.gen_range(0..num_nodes),
                f64::from(rng.gen_range(0..6u8)),
                f64::from(rng.gen_range(1..20u8)),
            )
        })
        .collect();
    let centroids: Vec<u32> = (0..num_nodes).collect();
    build(num_nodes as usize, &centroids, &links)
}

/// A demand matrix with integer trips in every core, roughly a third of them zero.
#[must_use]
pub fn random_demand(rows: usize, cols: usize, cores: usize, seed: u64) -> OdMatrix {
    let mut rng = StdRng::seed_from_u64(seed);
    let data = (0..rows * cols * cores).map(|_| f64::from(rng.gen_range(0..3u8)) * 5.0).collect();
    OdMatrix::from_vec(rows, cols, cores, data).expect("demand shape")
}

/// A demand matrix of fractional trips that are not exactly representable, so that link sums
/// depend on the order they are added in.
#[must_use]
pub fn fractional_demand(rows: usize, cols: usize, cores: usize, seed: u64) -> OdMatrix {
    let mut rng = StdRng::seed_from_u64(seed);
    let data = (0..rows * cols * cores).map(|_| f64::from(rng.gen_range(0..50u8)).mul_add(0.1, 0.037)).collect();
    OdMatrix::from_vec(rows, cols, cores, data).expect("demand shape")
}

/// All-pairs shortest path-cost distances by Floyd-Warshall; `None` for unreachable pairs.
#[must_use]
pub fn floyd_warshall(graph: &Graph) -> Vec<Vec<Option<f64>>> {
    let n = graph.num_nodes();
    let mut dist = vec![vec![f64::INFINITY; n]; n];
    for (v, row) in dist.iter_mut().enumerate() {
        row[v] = 0.0;
    }
    for l in 0..graph.num_links() {
        let link = graph.link(crate::ids::LinkId(u32::try_from(l).expect("link id")));
        let cell = &mut dist[link.tail.index()][link.head.index()];
        *cell = cell.min(link.path_cost);
    }
    for k in 0..n {
        for i in 0..n {
            for j in 0..n {
                let via = dist[i][k] + dist[k][j];
                if via < dist[i][j] {
                    dist[i][j] = via;
                }
            }
        }
    }
    dist.into_iter().map(|row| row.into_iter().map(|d| d.is_finite().then_some(d)).collect()).collect()
}

/// The same network as a `petgraph` digraph weighted by path cost.
#[must_use]
pub fn to_petgraph(graph: &Graph) -> DiGraph<(), f64> {
    let mut pg = DiGraph::with_capacity(graph.num_nodes(), graph.num_links());
    for _ in 0..graph.num_nodes() {
        pg.add_node(());
    }
    for l in 0..graph.num_links() {
        let link = graph.link(crate::ids::LinkId(u32::try_from(l).expect("link id")));
        pg.add_edge(NodeIndex::new(link.tail.index()), NodeIndex::new(link.head.index()), link.path_cost);
    }
    pg
}

/// Node ids `0..n`.
#[must_use]
pub fn nodes(n: u32) -> Vec<NodeId> {
    (0..n).map(NodeId).collect()
}
