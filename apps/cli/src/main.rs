#![deny(warnings)]

//! Headless CLI: load or synthesize a parcel inventory, apply a rule file
//! and report baseline and plan totals.

use anyhow::{bail, Context, Result};
use capacity_core::Inventory;
use capacity_rules::{Rule, RuleSet};
use capacity_runtime::{CacheStats, ParcelDetail, PlanTotals, Planner};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: capacity (--model <csv> [--overlay <csv>] | --synthetic <n> [--seed <u64>]) \
[--rules <yaml>] [--inspect <blocklot>] [--json]";

#[derive(Debug, Default)]
struct Args {
    model: Option<PathBuf>,
    overlay: Option<PathBuf>,
    rules: Option<PathBuf>,
    synthetic: Option<usize>,
    seed: Option<u64>,
    inspect: Option<String>,
    json: bool,
}

fn parse_args() -> Result<Args> {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--model" => args.model = it.next().map(PathBuf::from),
            "--overlay" => args.overlay = it.next().map(PathBuf::from),
            "--rules" => args.rules = it.next().map(PathBuf::from),
            "--synthetic" => {
                let n = it.next().context("--synthetic needs a parcel count")?;
                args.synthetic = Some(n.parse().with_context(|| format!("bad count {n:?}"))?);
            }
            "--seed" => {
                let s = it.next().context("--seed needs a value")?;
                args.seed = Some(s.parse().with_context(|| format!("bad seed {s:?}"))?);
            }
            "--inspect" => args.inspect = it.next(),
            "--json" => args.json = true,
            "-h" | "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other => warn!(arg = other, "ignoring unknown argument"),
        }
    }
    Ok(args)
}

fn load(args: &Args) -> Result<Inventory> {
    match (&args.model, args.synthetic) {
        (Some(model), None) => data_pipeline::load_inventory(model, args.overlay.as_deref()),
        (None, Some(n)) => Ok(data_pipeline::synthetic_inventory(n, args.seed.unwrap_or(42))),
        (Some(_), Some(_)) => bail!("--model and --synthetic are exclusive\n{USAGE}"),
        (None, None) => bail!("no inventory given\n{USAGE}"),
    }
}

#[derive(Serialize)]
struct Report<'a> {
    parcels: usize,
    baseline: PlanTotals,
    plan: PlanTotals,
    rules: &'a [Rule],
    cache: CacheStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    parcel: Option<ParcelDetail>,
}

fn main() -> Result<()> {
    // Logging setup
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;
    info!(
        git_sha = env!("GIT_SHA"),
        build_date = env!("BUILD_DATE"),
        "starting capacity planner"
    );

    let inventory = load(&args)?;
    let rules = match &args.rules {
        Some(path) => RuleSet::load(path)
            .with_context(|| format!("loading rules {}", path.display()))?,
        None => RuleSet::new(),
    };
    let mut planner = Planner::with_rules(inventory, rules)?;
    let plan = planner.recalculate();

    let parcel = match &args.inspect {
        Some(id) => {
            let detail = planner.inspect(id);
            if detail.is_none() {
                warn!(block_lot = id.as_str(), "parcel not in inventory");
            }
            detail
        }
        None => None,
    };

    let report = Report {
        parcels: planner.inventory().len(),
        baseline: planner.baseline_totals(),
        plan,
        rules: planner.rules().rules(),
        cache: planner.cache_stats(),
        parcel,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "Inventory OK | parcels: {} | rules: {}",
        report.parcels,
        report.rules.len()
    );
    println!(
        "Baseline | low: {} | high: {}",
        report.baseline.low, report.baseline.high
    );
    println!(
        "Plan     | low: {} | high: {} | net low: {:+} | net high: {:+}",
        report.plan.low,
        report.plan.high,
        report.plan.low as i64 - report.baseline.low as i64,
        report.plan.high as i64 - report.baseline.high as i64
    );
    if let Some(d) = &report.parcel {
        println!(
            "Parcel {} | height: {} -> {} | envelope: {:.1} | bonus: {} | p(low): {:.4} | p(high): {:.4} | units low: {:.2} | units high: {:.2}",
            d.block_lot,
            d.baseline_height,
            d.effective_height,
            d.envelope,
            if d.sdb_eligible { "yes" } else { "no" },
            d.probability_low,
            d.probability_high,
            d.expected_units.low,
            d.expected_units.high
        );
    }
    Ok(())
}
