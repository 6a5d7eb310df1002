//! Parallel all-or-nothing assignment over many origins.
//!
//! Origins are split into fixed blocks of [`AssignmentConfig::origins_per_block`] consecutive
//! origins. Blocks are handed to a rayon pool in waves. Each pool thread owns one [`Solver`] and
//! skim scratch for the lifetime of the [`Assignment`] and reuses them for every origin of every
//! block it takes, in every run. Each block accumulates link volumes in a private vector. After every wave the block vectors are added into the total in
//! block order.
//!
//! The block layout and the summation order depend only on the origins and the configuration,
//! never on the number of threads or on scheduling, so volumes and skims are bit-identical for
//! any worker count. Skim and select-link rows are written in place: every origin row belongs to
//! exactly one block.
use std::any::Any;
use std::panic::{
    self,
    AssertUnwindSafe,
};
use std::sync::atomic::{
    AtomicBool,
    Ordering,
};
use std::sync::{
    Arc,
    Mutex,
    MutexGuard,
    PoisonError,
};

use rayon::prelude::*;
use rayon::{
    ThreadPool,
    ThreadPoolBuilder,
};
use serde::{
    Deserialize,
    Serialize,
};
use tracing::{
    debug,
    info,
    instrument,
    warn,
};

use crate::errors::AssignmentError;
use crate::graph::Graph;
use crate::ids::{
    LinkId,
    NodeId,
    OdPair,
};
use crate::loading::{
    trace_path,
    LinkVolumes,
    Loading,
    SelectLinkIndex,
    SelectLinkQuery,
    SelectLinkResult,
    SelectLinkScratch,
};
use crate::matrix::OdMatrix;
use crate::skims::{
    SkimMatrix,
    SkimRecorder,
};
use crate::solver::{
    SearchOptions,
    Solver,
};

const DEFAULT_ORIGINS_PER_BLOCK: usize = 8;

/// Waves hold this many blocks per worker thread unless configured otherwise.
const BLOCKS_PER_THREAD: usize = 4;

/// Settings of an [`Assignment`]. Missing keys take their defaults when deserialized.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssignmentConfig {
    /// Worker threads; 0 uses every hardware thread.
    pub workers: usize,
    /// Consecutive origins per block. Results never depend on this value or on `workers`.
    pub origins_per_block: usize,
    /// Blocks per wave, which bounds the number of private volume vectors alive at once; 0
    /// means four per worker thread.
    pub blocks_per_wave: usize,
    /// Never route through centroids other than the origin.
    pub block_centroid_flows: bool,
    /// Cost fields to skim, in layer order.
    pub skim_fields: Vec<String>,
    pub select_links: Vec<SelectLinkQuery>,
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            origins_per_block: DEFAULT_ORIGINS_PER_BLOCK,
            blocks_per_wave: 0,
            block_centroid_flows: false,
            skim_fields: Vec::new(),
            select_links: Vec::new(),
        }
    }
}

/// Cooperative cancellation for a running assignment. Clones share the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Workers notice before starting their next origin.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Clears a cancellation so the next run can proceed. Runs already cancelled stay cancelled.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Everything one run produces.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AssignmentResult {
    /// Origin of each matrix row.
    pub origins: Vec<NodeId>,
    /// Destination of each matrix column.
    pub destinations: Vec<NodeId>,
    pub volumes: LinkVolumes,
    pub skims: SkimMatrix,
    /// Pairs without a path, in row then column order.
    pub unreachable: Vec<OdPair>,
    /// Per core, the demand of the unreachable pairs, which was not loaded.
    pub unassigned_demand: Vec<f64>,
    pub select_link: Vec<SelectLinkResult>,
}

/// A reusable assignment kernel bound to one graph. The worker pool and the per-thread search
/// scratch are created once and reused by every run.
///
/// A cancelled token stays cancelled until [`CancelToken::reset`] is called, so every run in
/// between returns [`AssignmentError::Cancelled`].
pub struct Assignment<'g> {
    graph: &'g Graph,
    config: AssignmentConfig,
    skim_width: usize,
    select: SelectLinkIndex,
    pool: ThreadPool,
    /// One per pool thread, indexed by `rayon::current_thread_index`.
    workers: Vec<Mutex<Worker<'g>>>,
    cancel: CancelToken,
}

impl<'g> Assignment<'g> {
    /// Validates the configuration against the graph and starts the worker pool.
    #[instrument(skip_all, fields(workers = config.workers, origins_per_block = config.origins_per_block))]
    pub fn new(graph: &'g Graph, config: AssignmentConfig) -> Result<Self, AssignmentError> {
        if config.origins_per_block == 0 {
            return Err(AssignmentError::EmptyBlocks);
        }
        let skims = SkimRecorder::new(graph, &config.skim_fields)?;
        let select = SelectLinkIndex::new(graph, &config.select_links)?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("af-worker-{i}"))
            .build()?;
        let workers = (0..pool.current_num_threads())
            .map(|_| Mutex::new(Worker::new(graph, skims.clone())))
            .collect();
        debug!(threads = pool.current_num_threads(), "worker pool started");

        Ok(Self { graph, config, skim_width: skims.width(), select, pool, workers, cancel: CancelToken::new() })
    }

    /// Uses `token` to cancel runs from elsewhere.
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    #[must_use]
    pub const fn graph(&self) -> &'g Graph {
        self.graph
    }

    #[must_use]
    pub const fn config(&self) -> &AssignmentConfig {
        &self.config
    }

    #[must_use]
    pub fn num_workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Assigns `loading` from every origin to every destination. Row `i` of every matrix in the
    /// result belongs to `origins[i]` and column `j` to `destinations[j]`.
    pub fn run(
        &self,
        origins: &[NodeId],
        destinations: &[NodeId],
        loading: Loading<'_>,
    ) -> Result<AssignmentResult, AssignmentError> {
        self.run_with_progress(origins, destinations, loading, |_| ())
    }

    /// Like [`run`](Self::run), calling `progress` with the number of origins finished so far
    /// after each block. Calls never overlap and the counts they report only increase.
    ///
    /// `progress` runs on the worker pool and must not start parallel work on it.
    #[allow(clippy::needless_pass_by_value)]
    #[instrument(
        skip_all,
        fields(origins = origins.len(), destinations = destinations.len(), cores = loading.cores())
    )]
    pub fn run_with_progress<F>(
        &self,
        origins: &[NodeId],
        destinations: &[NodeId],
        loading: Loading<'_>,
        progress: F,
    ) -> Result<AssignmentResult, AssignmentError>
    where
        F: Fn(usize) + Sync,
    {
        self.validate(origins, destinations, &loading)?;

        let cores = loading.cores();
        let rows_per_block = self.config.origins_per_block;
        let mut skims = OdMatrix::new(origins.len(), destinations.len(), self.skim_width);
        let mut select_od = OdMatrix::new(origins.len(), destinations.len(), self.select.len() * cores);

        let tasks: Vec<BlockTask<'_>> = origins
            .chunks(rows_per_block)
            .zip(skims.row_blocks_mut(rows_per_block))
            .zip(select_od.row_blocks_mut(rows_per_block))
            .enumerate()
            .map(|(index, ((origins, skims), select))| BlockTask {
                index,
                first_row: index * rows_per_block,
                origins,
                skims,
                select,
            })
            .collect();
        let job = Job {
            graph: self.graph,
            destinations,
            loading,
            options: SearchOptions { block_centroid_flows: self.config.block_centroid_flows },
            select: &self.select,
            cancel: &self.cancel,
            cores,
            abort: AtomicBool::new(false),
            done: Mutex::new(0),
        };
        let totals = self.schedule(&job, tasks, &progress)?;

        if !totals.unreachable.is_empty() {
            warn!(pairs = totals.unreachable.len(), "some origin-destination pairs have no path");
        }
        info!(
            total_volume = totals.volumes.total(0),
            unreachable = totals.unreachable.len(),
            "assignment finished"
        );

        Ok(AssignmentResult {
            origins: origins.to_vec(),
            destinations: destinations.to_vec(),
            volumes: totals.volumes,
            skims: SkimMatrix::new(self.config.skim_fields.clone(), skims),
            unreachable: totals.unreachable,
            unassigned_demand: totals.unassigned,
            select_link: self.select.results(&select_od, totals.select, cores),
        })
    }

    fn validate(&self, origins: &[NodeId], destinations: &[NodeId], loading: &Loading<'_>) -> Result<(), AssignmentError> {
        for (set, zones) in [("origin", origins), ("destination", destinations)] {
            let mut seen = vec![false; self.graph.num_nodes()];
            for &zone in zones {
                if !self.graph.contains(zone) {
                    return Err(AssignmentError::UnknownNode(zone));
                }
                if !self.graph.is_centroid(zone) {
                    return Err(AssignmentError::NotACentroid(zone));
                }
                if std::mem::replace(&mut seen[zone.index()], true) {
                    return Err(AssignmentError::DuplicateZone { zone, set });
                }
            }
        }

        if let Loading::Demand(demand) = loading {
            if demand.depth() == 0 {
                return Err(AssignmentError::NoDemandCores);
            }
            let expected = (origins.len(), destinations.len());
            let found = (demand.rows(), demand.cols());
            if expected != found {
                return Err(AssignmentError::DemandShape { expected, found });
            }
            demand.validate_demand()?;
        }
        Ok(())
    }

    /// Runs the blocks wave by wave and sums their partial results in block order.
    fn schedule<F>(&self, job: &Job<'_, 'g>, tasks: Vec<BlockTask<'_>>, progress: &F) -> Result<Totals, AssignmentError>
    where
        F: Fn(usize) + Sync,
    {
        let wave_size = match self.config.blocks_per_wave {
            0 => BLOCKS_PER_THREAD * self.pool.current_num_threads(),
            n => n,
        };
        let mut totals = Totals::new(self.graph.num_links(), job.cores, self.select.len());
        let mut pending = tasks.into_iter().peekable();

        while pending.peek().is_some() {
            let wave: Vec<_> = pending.by_ref().take(wave_size).collect();
            let outputs: Vec<_> = self
                .pool
                .install(|| wave.into_par_iter().map(|task| self.worker().run_block(job, task, progress)).collect());

            // The first error in block order wins; blocks abandoned after a failure yield `None`.
            let outputs = outputs.into_iter().collect::<Result<Vec<_>, _>>()?;
            for output in outputs.into_iter().flatten() {
                totals.absorb(output);
            }
        }
        Ok(totals)
    }

    /// Scratch of the calling pool thread. A thread holds its lock only while it processes one
    /// block and starts no parallel work meanwhile, so within a run the lock is uncontended.
    fn worker(&self) -> MutexGuard<'_, Worker<'g>> {
        let slot = rayon::current_thread_index().unwrap_or(0) % self.workers.len();
        // Every search resets the scratch it uses, so a poisoned worker is still usable.
        self.workers[slot].lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Read-only state shared by all blocks of one run.
struct Job<'a, 'g> {
    graph: &'g Graph,
    destinations: &'a [NodeId],
    loading: Loading<'a>,
    options: SearchOptions,
    select: &'a SelectLinkIndex,
    cancel: &'a CancelToken,
    cores: usize,
    /// Set when any block fails, so that the others stop early.
    abort: AtomicBool,
    /// Origins finished so far. Held while `progress` runs, so reports arrive in order.
    done: Mutex<usize>,
}

/// One block of consecutive origins and the output rows it owns.
struct BlockTask<'a> {
    index: usize,
    first_row: usize,
    origins: &'a [NodeId],
    skims: &'a mut [f64],
    select: &'a mut [f64],
}

/// Private accumulators of one block.
struct BlockOutput {
    volumes: LinkVolumes,
    select: Option<SelectLinkScratch>,
    unreachable: Vec<OdPair>,
    unassigned: Vec<f64>,
}

struct Totals {
    volumes: LinkVolumes,
    select: Vec<LinkVolumes>,
    unreachable: Vec<OdPair>,
    unassigned: Vec<f64>,
}

impl Totals {
    fn new(links: usize, cores: usize, queries: usize) -> Self {
        Self {
            volumes: LinkVolumes::new(links, cores),
            select: vec![LinkVolumes::new(links, cores); queries],
            unreachable: Vec::new(),
            unassigned: vec![0.0; cores],
        }
    }

    fn absorb(&mut self, output: BlockOutput) {
        self.volumes.absorb(&output.volumes);
        if let Some(select) = output.select {
            for (total, part) in self.select.iter_mut().zip(&select.volumes) {
                total.absorb(part);
            }
        }
        self.unreachable.extend(output.unreachable);
        for (total, part) in self.unassigned.iter_mut().zip(&output.unassigned) {
            *total += part;
        }
    }
}

/// Per-thread scratch, reused across the blocks and runs a thread takes.
struct Worker<'g> {
    solver: Solver<'g>,
    skims: SkimRecorder<'g>,
    path: Vec<LinkId>,
    /// Blocks processed with this scratch, over all runs.
    blocks: usize,
}

impl<'g> Worker<'g> {
    fn new(graph: &'g Graph, skims: SkimRecorder<'g>) -> Self {
        Self { solver: Solver::new(graph), skims, path: Vec::new(), blocks: 0 }
    }

    /// Processes one block, turning panics into errors and raising the abort flag on failure.
    fn run_block<F>(
        &mut self,
        job: &Job<'_, 'g>,
        task: BlockTask<'_>,
        progress: &F,
    ) -> Result<Option<BlockOutput>, AssignmentError>
    where
        F: Fn(usize) + Sync,
    {
        let block = task.index;
        let count = task.origins.len();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<_, AssignmentError> {
            let output = self.process(job, task)?;
            if output.is_some() {
                let mut done = job.done.lock().unwrap_or_else(PoisonError::into_inner);
                *done += count;
                progress(*done);
            }
            Ok(output)
        }));
        let result = outcome
            .unwrap_or_else(|payload| Err(AssignmentError::WorkerFailed { block, message: panic_message(&*payload) }));
        if let Err(err) = &result {
            if !job.abort.swap(true, Ordering::Relaxed) {
                debug!(block, %err, "stopping the remaining blocks");
            }
        }
        result
    }

    /// Searches from every origin of the block, records its skim rows and loads its paths.
    /// Returns `None` if the block was abandoned because another block failed.
    fn process(&mut self, job: &Job<'_, 'g>, task: BlockTask<'_>) -> Result<Option<BlockOutput>, AssignmentError> {
        let BlockTask { index, first_row, origins, skims, select } = task;
        self.blocks += 1;
        let destinations = job.destinations;
        let skim_len = destinations.len() * self.skims.width();
        let select_len = job.select.len() * job.cores;

        let mut output = BlockOutput {
            volumes: LinkVolumes::new(job.graph.num_links(), job.cores),
            select: (!job.select.is_empty())
                .then(|| SelectLinkScratch::new(job.select, job.graph.num_links(), job.cores)),
            unreachable: Vec::new(),
            unassigned: vec![0.0; job.cores],
        };

        for (k, &origin) in origins.iter().enumerate() {
            if job.cancel.is_cancelled() {
                return Err(AssignmentError::Cancelled);
            }
            if job.abort.load(Ordering::Relaxed) {
                return Ok(None);
            }
            if destinations.is_empty() {
                continue;
            }

            let row = first_row + k;
            let tree = self.solver.run(origin, destinations, job.options)?;
            self.skims.record_row(&tree, destinations, &mut skims[k * skim_len..(k + 1) * skim_len])?;

            for (j, &destination) in destinations.iter().enumerate() {
                if destination == origin {
                    continue;
                }
                let quantities = job.loading.quantities(row, j);
                if !tree.is_reachable(destination) {
                    output.unreachable.push(OdPair { origin, destination });
                    for (lost, q) in output.unassigned.iter_mut().zip(quantities.unwrap_or_default()) {
                        *lost += q;
                    }
                    continue;
                }
                let Some(quantities) = quantities else {
                    continue;
                };
                if !quantities.iter().any(|q| *q > 0.0) {
                    continue;
                }

                trace_path(job.graph, &tree, destination, &mut self.path)?;
                output.volumes.add_path(&self.path, quantities);
                if let Some(scratch) = output.select.as_mut() {
                    let at = (k * destinations.len() + j) * select_len;
                    scratch.record(job.select, &self.path, quantities, &mut select[at..at + select_len]);
                }
            }
        }

        debug!(block = index, origins = origins.len(), "block finished");
        Ok(Some(output))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "worker panicked".to_string())
}

#[cfg(test)]
mod tests;
