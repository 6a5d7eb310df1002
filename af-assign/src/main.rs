#![deny(clippy::nursery, clippy::pedantic)]
//! Command-line driver for the af-assign kernel.
//!
//! Reads a network description (JSON or YAML), runs one all-or-nothing assignment from every
//! centroid to every centroid and logs a summary of volumes, skims and unreachable pairs. With
//! `--output` the full result is written as JSON; unreachable skims appear there as `null`.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::time::Duration;

use af_assign::input::NetworkFile;
use af_assign::{
    Assignment,
    AssignmentConfig,
    LinkId,
    Loading,
    PathCost,
    SelectLinkQuery,
};
use af_core::prelude::*;
use clap::{
    Parser,
    ValueEnum,
};
use indicatif::{
    ProgressBar,
    ProgressFinish,
    ProgressStyle,
};
use itertools::{
    Itertools,
    MinMaxResult,
};
use tracing::{
    error,
    info,
    warn,
};

/// What gets loaded onto the shortest paths.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Load the demand listed in the network file.
    Demand,
    /// Load one unit per reachable pair.
    Unit,
    /// Only compute skims.
    SkimOnly,
}

/// af-assign: all-or-nothing traffic assignment and skimming over a directed network
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Network description with nodes, centroids, links and optional demand.
    network: PathBuf,

    /// Cost field the shortest paths minimize.
    #[arg(short = 'c', long, default_value = "time")]
    path_cost: String,

    /// Minimize a generalized cost instead, given as `field=weight`; repeat for every term.
    #[arg(short = 'g', long = "generalized", value_parser = parse_weight)]
    generalized: Vec<(String, f64)>,

    /// What to load.
    #[arg(short, long, value_enum, default_value_t = Mode::Demand)]
    mode: Mode,

    /// Cost field to skim; repeat for several.
    #[arg(short, long = "skim")]
    skim: Vec<String>,

    /// Select-link query, given as `name=link[,link...]`; repeat for several.
    #[arg(long = "select-link", value_parser = parse_select_link)]
    select_link: Vec<SelectLinkQuery>,

    /// Worker threads (0 = all hardware threads).
    #[arg(short = 'j', long, default_value_t = 0)]
    workers: usize,

    /// Origins per scheduling block.
    #[arg(long, default_value_t = 8)]
    origins_per_block: usize,

    /// Blocks per wave (0 = four per worker).
    #[arg(long, default_value_t = 0)]
    blocks_per_wave: usize,

    /// Do not route through centroids other than the origin.
    #[arg(long)]
    block_centroid_flows: bool,

    /// Write the full result to this file as JSON.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Logging verbosity level (`trace`, `debug`, `info`, `warn`, `error`).
    #[arg(short, long, default_value = "info")]
    verbosity: String,
}

/// Parses `field=weight`.
fn parse_weight(s: &str) -> Result<(String, f64), String> {
    let (field, weight) = s.split_once('=').ok_or_else(|| format!("expected field=weight, got `{s}`"))?;
    let weight: f64 = weight.trim().parse().map_err(|e| format!("invalid weight `{weight}`: {e}"))?;
    Ok((field.trim().to_string(), weight))
}

/// Parses `name=link[,link...]`.
fn parse_select_link(s: &str) -> Result<SelectLinkQuery, String> {
    let (name, links) = s.split_once('=').ok_or_else(|| format!("expected name=link[,link...], got `{s}`"))?;
    let links = links
        .split(',')
        .map(|l| l.trim().parse().map(LinkId).map_err(|e| format!("invalid link id `{l}`: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(SelectLinkQuery { name: name.trim().to_string(), links })
}

fn main() {
    let args = Cli::parse();

    // Conform to crate-standard logging.
    af_core::logging::setup(&args.verbosity);

    if let Err(err) = run(&args) {
        error!("{}", error_chain(&*err));
        std::process::exit(1);
    }
}

fn run(args: &Cli) -> EmptyResult {
    let network = NetworkFile::from_path(&args.network)
        .with_context(|| format!("could not load network from {}", args.network.display()))?;
    let path_cost = if args.generalized.is_empty() {
        PathCost::Field(args.path_cost.clone())
    } else {
        PathCost::Generalized(args.generalized.clone())
    };
    let graph = network.graph(&path_cost).context("invalid network")?;
    let zones = graph.centroids().to_vec();
    ensure!(!zones.is_empty(), "the network declares no centroids");
    info!(
        nodes = graph.num_nodes(),
        links = graph.num_links(),
        centroids = zones.len(),
        ?path_cost,
        "network loaded"
    );

    let demand;
    let loading = match args.mode {
        Mode::Demand => {
            demand = network.demand_matrix(&zones, &zones).context("invalid demand")?;
            Loading::Demand(&demand)
        },
        Mode::Unit => Loading::Unit,
        Mode::SkimOnly => Loading::SkimOnly,
    };

    let config = AssignmentConfig {
        workers: args.workers,
        origins_per_block: args.origins_per_block,
        blocks_per_wave: args.blocks_per_wave,
        block_centroid_flows: args.block_centroid_flows,
        skim_fields: args.skim.clone(),
        select_links: args.select_link.clone(),
    };
    let assignment = Assignment::new(&graph, config).context("invalid assignment settings")?;
    info!(workers = assignment.num_workers(), "starting assignment");

    let pb = ProgressBar::new(zones.len() as u64)
        .with_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} origins ({percent}%) {msg}")?,
        )
        .with_message("All-or-nothing assignment")
        .with_finish(ProgressFinish::AndLeave);
    pb.enable_steady_tick(Duration::from_millis(100));

    let result = assignment
        .run_with_progress(&zones, &zones, loading, |done| pb.set_position(done as u64))
        .context("assignment failed")?;
    pb.finish_using_style();

    for core in 0..result.volumes.cores() {
        info!(core, total = result.volumes.total(core), "link volume");
    }
    for (layer, field) in result.skims.fields().iter().enumerate() {
        let (min, max) = match result.skims.matrix().layer_values(layer).filter(|v| v.is_finite()).minmax() {
            MinMaxResult::NoElements => (f64::NAN, f64::NAN),
            MinMaxResult::OneElement(v) => (v, v),
            MinMaxResult::MinMax(lo, hi) => (lo, hi),
        };
        info!(field = %field, min, max, "skim range");
    }
    for select in &result.select_link {
        info!(query = %select.name, demand = select.od.layer_total(0), "select link");
    }
    if !result.unreachable.is_empty() {
        warn!(
            pairs = result.unreachable.len(),
            unassigned = %result.unassigned_demand.iter().join(", "),
            first = %result.unreachable[0],
            "unreachable origin-destination pairs"
        );
    }

    if let Some(path) = &args.output {
        let file = File::create(path).with_context(|| format!("could not create {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &result).context("could not write the result")?;
        info!("Result written to: {}", path.display());
    }
    Ok(())
}
