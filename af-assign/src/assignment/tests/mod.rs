use std::sync::atomic::{
    AtomicUsize,
    Ordering,
};
use std::sync::Mutex;

use assertables::*;
use rstest::*;
use tracing_test::traced_test;

use super::*;
use crate::errors::{
    GraphError,
    MatrixError,
};
use crate::skims::UNREACHABLE;
use crate::testutils::{
    build,
    diamond,
    fractional_demand,
    grid,
    line,
    nodes,
    random_demand,
    random_graph,
    single_link,
};

fn config(workers: usize) -> AssignmentConfig {
    AssignmentConfig { workers, skim_fields: vec!["time".into(), "distance".into()], ..Default::default() }
}

fn zones(ids: &[u32]) -> Vec<NodeId> {
    ids.iter().copied().map(NodeId).collect()
}

#[rstest]
fn test_diamond_loads_one_path_without_splitting() {
    let g = diamond();
    let assignment = Assignment::new(&g, config(2)).unwrap();
    let demand = OdMatrix::from_rows(&[vec![10.0]]).unwrap();

    let result = assignment.run(&zones(&[0]), &zones(&[3]), Loading::Demand(&demand)).unwrap();

    assert_eq!(result.volumes.core(0).collect::<Vec<_>>(), vec![10.0, 0.0, 10.0, 0.0]);
    assert_eq!(result.skims.value(0, 0, "time"), Some(2.0));
    assert_eq!(result.skims.value(0, 0, "distance"), Some(2.0));
    assert!(result.unreachable.is_empty());
    assert_eq!(result.unassigned_demand, vec![0.0]);
}

#[rstest]
fn test_single_link_volume_and_skim() {
    let g = single_link();
    let assignment = Assignment::new(&g, config(1)).unwrap();
    let demand = OdMatrix::from_rows(&[vec![10.0]]).unwrap();

    let result = assignment.run(&zones(&[0]), &zones(&[1]), Loading::Demand(&demand)).unwrap();

    assert_eq!(result.volumes.get(LinkId(0), 0), 10.0);
    assert_eq!(result.skims.value(0, 0, "time"), Some(5.0));
    assert_eq!(result.skims.value(0, 0, "distance"), Some(2.0));
}

#[rstest]
fn test_unreachable_pair_is_reported_not_fatal() {
    let g = build(3, &[0, 2], &[(0, 1, 1.0, 1.0)]);
    let assignment = Assignment::new(&g, config(1)).unwrap();
    let demand = OdMatrix::from_rows(&[vec![7.0]]).unwrap();

    let result = assignment.run(&zones(&[0]), &zones(&[2]), Loading::Demand(&demand)).unwrap();

    assert_eq!(result.skims.value(0, 0, "time"), Some(UNREACHABLE));
    assert_eq!(result.volumes.total(0), 0.0);
    assert_eq!(result.unreachable, vec![OdPair { origin: NodeId(0), destination: NodeId(2) }]);
    assert_eq!(result.unassigned_demand, vec![7.0]);
}

#[rstest]
fn test_intrazonal_pairs_are_zero_and_unloaded() {
    let g = diamond();
    let assignment = Assignment::new(&g, config(1)).unwrap();
    let demand = OdMatrix::from_rows(&[vec![4.0, 1.0], vec![2.0, 3.0]]).unwrap();

    let result = assignment.run(&zones(&[0, 3]), &zones(&[0, 3]), Loading::Demand(&demand)).unwrap();

    assert_eq!(result.skims.value(0, 0, "time"), Some(0.0));
    assert_eq!(result.skims.value(1, 1, "distance"), Some(0.0));
    assert_eq!(result.skims.value(1, 0, "time"), Some(UNREACHABLE));
    // Only 0 -> 3 is loaded; 3 -> 0 has no path.
    assert_eq!(result.volumes.core(0).collect::<Vec<_>>(), vec![1.0, 0.0, 1.0, 0.0]);
    assert_eq!(result.unreachable, vec![OdPair { origin: NodeId(3), destination: NodeId(0) }]);
    assert_eq!(result.unassigned_demand, vec![2.0]);
}

#[rstest]
fn test_multiple_cores_load_along_the_same_path() {
    let g = diamond();
    let assignment = Assignment::new(&g, config(1)).unwrap();
    let demand = OdMatrix::from_vec(1, 1, 3, vec![1.0, 0.0, 2.5]).unwrap();

    let result = assignment.run(&zones(&[0]), &zones(&[3]), Loading::Demand(&demand)).unwrap();

    assert_eq!(result.volumes.cores(), 3);
    assert_eq!(result.volumes.link(LinkId(0)), &[1.0, 0.0, 2.5]);
    assert_eq!(result.volumes.link(LinkId(2)), &[1.0, 0.0, 2.5]);
    assert_eq!(result.volumes.link(LinkId(1)), &[0.0, 0.0, 0.0]);
}

#[rstest]
fn test_unit_loading_counts_paths() {
    let g = line(4);
    let assignment = Assignment::new(&g, AssignmentConfig::default()).unwrap();
    let all = nodes(4);

    let result = assignment.run(&all, &all, Loading::Unit).unwrap();

    assert_eq!(result.volumes.core(0).collect::<Vec<_>>(), vec![3.0, 4.0, 3.0]);
    assert_eq!(result.unreachable.len(), 6);
    assert_eq!(result.unassigned_demand, vec![6.0]);
}

#[rstest]
fn test_skim_only_leaves_volumes_zero() {
    let g = diamond();
    let assignment = Assignment::new(&g, config(2)).unwrap();

    let result = assignment.run(&zones(&[0]), &zones(&[3]), Loading::SkimOnly).unwrap();

    assert_eq!(result.volumes.total(0), 0.0);
    assert_eq!(result.skims.value(0, 0, "time"), Some(2.0));
    assert_eq!(result.unassigned_demand, vec![0.0]);
}

#[rstest]
fn test_zero_demand_is_not_loaded() {
    let g = diamond();
    let assignment = Assignment::new(&g, config(1)).unwrap();
    let demand = OdMatrix::from_rows(&[vec![0.0, 5.0]]).unwrap();

    let result = assignment.run(&zones(&[0]), &zones(&[3, 0]), Loading::Demand(&demand)).unwrap();

    assert_eq!(result.volumes.total(0), 0.0);
    // Skims are still recorded for the zero-demand pair.
    assert_eq!(result.skims.value(0, 0, "time"), Some(2.0));
}

#[rstest]
fn test_block_centroid_flows() {
    let g = build(3, &[0, 1, 2], &[(0, 1, 1.0, 1.0), (1, 2, 1.0, 1.0)]);
    let demand = OdMatrix::from_rows(&[vec![3.0]]).unwrap();

    let open = Assignment::new(&g, config(1)).unwrap();
    let result = open.run(&zones(&[0]), &zones(&[2]), Loading::Demand(&demand)).unwrap();
    assert_eq!(result.volumes.total(0), 6.0);

    let blocked = Assignment::new(&g, AssignmentConfig { block_centroid_flows: true, ..config(1) }).unwrap();
    let result = blocked.run(&zones(&[0]), &zones(&[2]), Loading::Demand(&demand)).unwrap();
    assert_eq!(result.volumes.total(0), 0.0);
    assert_eq!(result.unreachable.len(), 1);
}

#[rstest]
fn test_empty_destinations() {
    let g = diamond();
    let assignment = Assignment::new(&g, config(1)).unwrap();
    let demand = OdMatrix::new(2, 0, 1);

    let result = assignment.run(&zones(&[0, 3]), &[], Loading::Demand(&demand)).unwrap();

    assert_eq!(result.skims.matrix().shape(), (2, 0, 2));
    assert_eq!(result.volumes.total(0), 0.0);
}

/// Loads every pair separately, path by path, as an independent reference. Demands are integer
/// multiples of 5, so summation order does not matter.
fn reference_volumes(graph: &Graph, origins: &[NodeId], destinations: &[NodeId], demand: &OdMatrix) -> LinkVolumes {
    let mut volumes = LinkVolumes::new(graph.num_links(), demand.depth());
    let mut solver = Solver::new(graph);
    let mut path = Vec::new();
    for (i, &o) in origins.iter().enumerate() {
        let tree = solver.run(o, &[], SearchOptions::default()).unwrap();
        for (j, &d) in destinations.iter().enumerate() {
            if o != d && trace_path(graph, &tree, d, &mut path).unwrap() {
                volumes.add_path(&path, demand.cell(i, j));
            }
        }
    }
    volumes
}

#[rstest]
#[case::grid(grid(12, 9, 3), 2)]
#[case::random(random_graph(60, 180, 5), 1)]
fn test_results_identical_for_any_worker_count(#[case] g: Graph, #[case] cores: usize) {
    let origins = g.centroids().to_vec();
    let demand = random_demand(origins.len(), origins.len(), cores, 42);
    let select_links = vec![SelectLinkQuery { name: "first".into(), links: vec![LinkId(0), LinkId(5)] }];

    let run = |workers: usize, origins_per_block: usize, blocks_per_wave: usize| {
        let config = AssignmentConfig {
            workers,
            origins_per_block,
            blocks_per_wave,
            skim_fields: vec!["distance".into()],
            select_links: select_links.clone(),
            ..Default::default()
        };
        Assignment::new(&g, config).unwrap().run(&origins, &origins, Loading::Demand(&demand)).unwrap()
    };

    let baseline = run(1, 3, 0);
    assert_eq!(baseline.volumes, reference_volumes(&g, &origins, &origins, &demand));
    for workers in [2, 3, 8] {
        for blocks_per_wave in [0, 1, 5] {
            let result = run(workers, 3, blocks_per_wave);
            // Exact f64 comparison: every bit must match.
            assert_eq!(result, baseline, "workers = {workers}, blocks_per_wave = {blocks_per_wave}");
        }
    }
}

#[rstest]
fn test_fractional_demand_identical_for_any_worker_count() {
    let g = grid(15, 12, 8);
    let origins = g.centroids().to_vec();
    let demand = fractional_demand(origins.len(), origins.len(), 2, 7);
    let run = |workers: usize| {
        let config = AssignmentConfig { workers, origins_per_block: 2, blocks_per_wave: 3, ..config(workers) };
        Assignment::new(&g, config).unwrap().run(&origins, &origins, Loading::Demand(&demand)).unwrap()
    };

    let baseline = run(1);
    assert_gt!(baseline.volumes.total(0), 0.0);
    for workers in [2, 3, 8] {
        assert_eq!(run(workers), baseline, "workers = {workers}");
    }
}

#[rstest]
fn test_unreachable_pairs_are_never_finite_or_loaded() {
    let g = random_graph(40, 60, 9);
    let all = nodes(40);
    let assignment = Assignment::new(&g, AssignmentConfig { skim_fields: vec!["time".into()], ..config(3) }).unwrap();
    let demand = random_demand(40, 40, 1, 1);

    let result = assignment.run(&all, &all, Loading::Demand(&demand)).unwrap();

    assert_gt!(result.unreachable.len(), 0);
    let mut lost = 0.0;
    for pair in &result.unreachable {
        let (i, j) = (pair.origin.index(), pair.destination.index());
        assert!(result.skims.value(i, j, "time").unwrap().is_infinite());
        lost += demand.get(i, j, 0);
    }
    assert_eq!(result.unassigned_demand, vec![lost]);
    assert_eq!(result.volumes, reference_volumes(&g, &all, &all, &demand));
    // Reported in row-major order.
    assert!(result.unreachable.windows(2).all(|w| w[0] < w[1]));
}

#[rstest]
fn test_reusing_an_assignment_gives_the_same_result() {
    let g = grid(6, 6, 1);
    let origins = g.centroids().to_vec();
    let demand = random_demand(origins.len(), origins.len(), 1, 2);
    let assignment = Assignment::new(&g, config(4)).unwrap();

    let first = assignment.run(&origins, &origins, Loading::Demand(&demand)).unwrap();
    let second = assignment.run(&origins, &origins, Loading::Demand(&demand)).unwrap();
    assert_eq!(first, second);
}

#[rstest]
fn test_scratch_is_allocated_once_per_thread() {
    let g = grid(30, 30, 4);
    let origins = g.centroids().to_vec();
    let config = AssignmentConfig { workers: 2, origins_per_block: 1, ..Default::default() };
    let assignment = Assignment::new(&g, config).unwrap();

    for _ in 0..2 {
        assignment.run(&origins, &origins, Loading::Unit).unwrap();
    }

    assert_le!(assignment.workers.len(), assignment.num_workers());
    let blocks: usize = assignment.workers.iter().map(|w| w.lock().unwrap().blocks).sum();
    assert_eq!(blocks, 2 * origins.len());
}

#[rstest]
fn test_select_link() {
    let g = diamond();
    let queries = vec![
        SelectLinkQuery { name: "upper".into(), links: vec![LinkId(2)] },
        SelectLinkQuery { name: "lower".into(), links: vec![LinkId(1), LinkId(3)] },
    ];
    let assignment = Assignment::new(&g, AssignmentConfig { select_links: queries, ..config(2) }).unwrap();
    let demand = OdMatrix::from_rows(&[vec![10.0, 0.0], vec![0.0, 0.0]]).unwrap();

    let result = assignment.run(&zones(&[0, 3]), &zones(&[3, 0]), Loading::Demand(&demand)).unwrap();

    let [upper, lower] = &result.select_link[..] else {
        panic!("expected two select link results");
    };
    assert_eq!(upper.name, "upper");
    assert_eq!(upper.od.shape(), (2, 2, 1));
    assert_eq!(upper.od.get(0, 0, 0), 10.0);
    assert_eq!(upper.od.layer_total(0), 10.0);
    assert_eq!(upper.volumes, result.volumes);
    assert_eq!(lower.od.layer_total(0), 0.0);
    assert_eq!(lower.volumes.total(0), 0.0);
}

#[rstest]
fn test_select_link_volume_on_selected_link_matches_total() {
    let g = grid(8, 8, 4);
    let origins = g.centroids().to_vec();
    let demand = random_demand(origins.len(), origins.len(), 2, 3);
    let link = LinkId(17);
    let queries = vec![SelectLinkQuery { name: "one".into(), links: vec![link] }];
    let assignment = Assignment::new(&g, AssignmentConfig { select_links: queries, ..config(3) }).unwrap();

    let result = assignment.run(&origins, &origins, Loading::Demand(&demand)).unwrap();

    let select = &result.select_link[0];
    assert_eq!(select.od.depth(), 2);
    assert_eq!(select.volumes.link(link), result.volumes.link(link));
    for core in 0..2 {
        assert_eq!(select.od.layer_total(core), select.volumes.get(link, core));
        assert_le!(select.volumes.total(core), result.volumes.total(core));
    }
}

#[rstest]
fn test_invalid_configuration_rejected() {
    let g = diamond();
    assert!(matches!(
        Assignment::new(&g, AssignmentConfig { origins_per_block: 0, ..Default::default() }),
        Err(AssignmentError::EmptyBlocks)
    ));
    assert!(matches!(
        Assignment::new(&g, AssignmentConfig { skim_fields: vec!["toll".into()], ..Default::default() }),
        Err(AssignmentError::Graph(GraphError::UnknownField(_)))
    ));
    let select_links = vec![SelectLinkQuery { name: "x".into(), links: vec![LinkId(4)] }];
    assert!(matches!(
        Assignment::new(&g, AssignmentConfig { select_links, ..Default::default() }),
        Err(AssignmentError::UnknownSelectLink { link: LinkId(4), .. })
    ));
}

#[rstest]
fn test_invalid_zones_rejected() {
    let g = diamond();
    let assignment = Assignment::new(&g, config(1)).unwrap();
    let run = |o: &[u32], d: &[u32]| assignment.run(&zones(o), &zones(d), Loading::SkimOnly);

    assert!(matches!(run(&[1], &[3]), Err(AssignmentError::NotACentroid(NodeId(1)))));
    assert!(matches!(run(&[0], &[7]), Err(AssignmentError::UnknownNode(NodeId(7)))));
    assert!(matches!(
        run(&[0, 3, 0], &[3]),
        Err(AssignmentError::DuplicateZone { zone: NodeId(0), set: "origin" })
    ));
    assert!(matches!(
        run(&[0], &[3, 3]),
        Err(AssignmentError::DuplicateZone { zone: NodeId(3), set: "destination" })
    ));
}

#[rstest]
fn test_invalid_demand_rejected() {
    let g = diamond();
    let assignment = Assignment::new(&g, config(1)).unwrap();
    let (o, d) = (zones(&[0]), zones(&[3]));

    let wrong_shape = OdMatrix::new(2, 1, 1);
    assert!(matches!(
        assignment.run(&o, &d, Loading::Demand(&wrong_shape)),
        Err(AssignmentError::DemandShape { expected: (1, 1), found: (2, 1) })
    ));

    let no_cores = OdMatrix::new(1, 1, 0);
    assert!(matches!(assignment.run(&o, &d, Loading::Demand(&no_cores)), Err(AssignmentError::NoDemandCores)));

    let negative = OdMatrix::from_rows(&[vec![-1.0]]).unwrap();
    assert!(matches!(
        assignment.run(&o, &d, Loading::Demand(&negative)),
        Err(AssignmentError::Matrix(MatrixError::InvalidValue { .. }))
    ));

    let nan = OdMatrix::from_rows(&[vec![f64::NAN]]).unwrap();
    assert!(assignment.run(&o, &d, Loading::Demand(&nan)).is_err());
}

#[rstest]
fn test_cancelled_before_start() {
    let g = grid(5, 5, 2);
    let origins = g.centroids().to_vec();
    let token = CancelToken::new();
    let assignment = Assignment::new(&g, config(2)).unwrap().with_cancel_token(token.clone());

    token.cancel();
    assert!(assignment.cancel_token().is_cancelled());
    assert!(matches!(assignment.run(&origins, &origins, Loading::Unit), Err(AssignmentError::Cancelled)));
}

#[rstest]
fn test_reset_token_allows_the_next_run() {
    let g = grid(5, 5, 2);
    let origins = g.centroids().to_vec();
    let assignment = Assignment::new(&g, config(2)).unwrap();
    let token = assignment.cancel_token();

    token.cancel();
    assert!(matches!(assignment.run(&origins, &origins, Loading::Unit), Err(AssignmentError::Cancelled)));
    assert!(matches!(assignment.run(&origins, &origins, Loading::Unit), Err(AssignmentError::Cancelled)));

    token.reset();
    assert!(!assignment.cancel_token().is_cancelled());
    assert_ok!(assignment.run(&origins, &origins, Loading::Unit));
}

#[rstest]
fn test_cancelled_mid_run() {
    let g = grid(10, 10, 2);
    let origins = g.centroids().to_vec();
    let config = AssignmentConfig { workers: 1, origins_per_block: 1, blocks_per_wave: 1, ..Default::default() };
    let assignment = Assignment::new(&g, config).unwrap();
    let token = assignment.cancel_token();
    let calls = AtomicUsize::new(0);

    let result = assignment.run_with_progress(&origins, &origins, Loading::Unit, |_| {
        calls.fetch_add(1, Ordering::Relaxed);
        token.cancel();
    });

    assert!(matches!(result, Err(AssignmentError::Cancelled)));
    assert_eq!(calls.load(Ordering::Relaxed), 1);
}

#[rstest]
fn test_panicking_worker_fails_the_run() {
    let g = grid(6, 6, 2);
    let origins = g.centroids().to_vec();
    let config = AssignmentConfig { workers: 2, origins_per_block: 2, ..Default::default() };
    let assignment = Assignment::new(&g, config).unwrap();

    let result = assignment.run_with_progress(&origins, &origins, Loading::Unit, |_| panic!("progress sink broke"));

    match result {
        Err(AssignmentError::WorkerFailed { message, .. }) => assert_eq!(message, "progress sink broke"),
        other => panic!("expected a worker failure, got {other:?}"),
    }
}

#[rstest]
fn test_progress_reaches_origin_count() {
    let g = grid(9, 7, 6);
    let origins = g.centroids().to_vec();
    let assignment =
        Assignment::new(&g, AssignmentConfig { workers: 3, origins_per_block: 2, ..Default::default() }).unwrap();
    let calls = AtomicUsize::new(0);
    let highest = AtomicUsize::new(0);

    assignment
        .run_with_progress(&origins, &origins, Loading::Unit, |done| {
            calls.fetch_add(1, Ordering::Relaxed);
            highest.fetch_max(done, Ordering::Relaxed);
        })
        .unwrap();

    assert_eq!(calls.load(Ordering::Relaxed), origins.len().div_ceil(2));
    assert_eq!(highest.load(Ordering::Relaxed), origins.len());
}

#[rstest]
fn test_progress_only_increases() {
    let g = grid(12, 12, 3);
    let origins = g.centroids().to_vec();
    let assignment =
        Assignment::new(&g, AssignmentConfig { workers: 8, origins_per_block: 1, ..Default::default() }).unwrap();
    let reports = Mutex::new(Vec::new());

    assignment
        .run_with_progress(&origins, &origins, Loading::Unit, |done| reports.lock().unwrap().push(done))
        .unwrap();

    let reports = reports.into_inner().unwrap();
    assert_eq!(reports, (1..=origins.len()).collect::<Vec<_>>());
}

#[rstest]
#[traced_test]
fn test_run_logs_summary() {
    let g = build(3, &[0, 2], &[(0, 1, 1.0, 1.0)]);
    let assignment = Assignment::new(&g, config(1)).unwrap();
    assignment.run(&zones(&[0]), &zones(&[2]), Loading::Unit).unwrap();

    assert!(logs_contain("assignment finished"));
    assert!(logs_contain("some origin-destination pairs have no path"));
}

#[rstest]
fn test_config_defaults_from_yaml() {
    let config: AssignmentConfig = serde_yaml::from_str("workers: 3\nskim_fields: [time]\n").unwrap();
    assert_eq!(config.workers, 3);
    assert_eq!(config.origins_per_block, 8);
    assert_eq!(config.skim_fields, vec!["time".to_string()]);
    assert!(config.select_links.is_empty());

    assert_err!(serde_yaml::from_str::<AssignmentConfig>("threads: 3\n"));
}

#[rstest]
fn test_worker_count() {
    let g = diamond();
    assert_eq!(Assignment::new(&g, config(3)).unwrap().num_workers(), 3);
    assert_eq!(Assignment::new(&g, config(0)).unwrap().num_workers(), rayon::current_num_threads());
}
