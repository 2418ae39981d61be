//! Stress command - Randomized consistency checks
//!
//! Two checks driven by a seeded random generator:
//! - import structure: random import additions and removals between many
//!   contexts, with `imports` compared against a petgraph reachability
//!   oracle after every cycle
//! - set algebra: union, intersection and difference of random sets
//!   compared against `BTreeSet`

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use clap::Args;
use duchain_core::{
    ChainBuilder, ChainOptions, ContextType, DUChain, DUChainWriteLocker, IdentifiedFile,
    IndexedContext, SetRepository, SimpleCursor, SimpleRange,
};
use indicatif::ProgressBar;
use petgraph::algo::has_path_connecting;
use petgraph::graphmap::DiGraphMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use super::{chain_options, load_config, resolve_workspace};
use crate::progress::{clear, cycle_bar};
use crate::GlobalOptions;

/// Mismatches reported before giving up on a check.
const MAX_REPORTED: usize = 20;

/// Arguments for the stress command
#[derive(Args, Debug)]
pub struct StressArgs {
    /// Number of contexts in the import graph
    #[arg(long, default_value = "100")]
    contexts: usize,

    /// Number of edit cycles
    #[arg(long, default_value = "50")]
    cycles: usize,

    /// Random seed (default: random)
    #[arg(long)]
    seed: Option<u64>,

    /// Number of sets per set-algebra cycle
    #[arg(long, default_value = "12")]
    sets: usize,
}

/// Outcome of one check
#[derive(Debug, Default)]
struct CheckReport {
    comparisons: u64,
    mismatches: Vec<String>,
}

impl CheckReport {
    fn record(&mut self, ok: bool, describe: impl FnOnce() -> String) {
        self.comparisons += 1;
        if !ok && self.mismatches.len() < MAX_REPORTED {
            self.mismatches.push(describe());
        }
    }

    fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Execute the stress command
pub async fn execute(args: StressArgs, global: GlobalOptions) -> Result<()> {
    if args.contexts < 2 {
        anyhow::bail!("--contexts must be at least 2");
    }
    let workspace = resolve_workspace(&global)?;
    let config = load_config(&global, &workspace)?;
    let options = chain_options(&config);
    let seed = args.seed.unwrap_or_else(rand::random);
    info!("Stress seed {}", seed);
    println!("Seed: {}", seed);

    let quiet = global.quiet;
    let (imports, sets) = tokio::task::spawn_blocking(move || {
        let pb = cycle_bar(args.cycles, "Import structure", quiet);
        let imports = check_import_structure(&options, &args, seed, pb.as_ref());
        clear(pb);

        let pb = cycle_bar(args.cycles, "Set algebra", quiet);
        let sets = check_set_algebra(&options, &args, seed, pb.as_ref());
        clear(pb);
        (imports, sets)
    })
    .await
    .context("Stress task failed")?;

    let mut failed = false;
    for (name, report) in [("Import structure", imports?), ("Set algebra", sets)] {
        if report.passed() {
            println!("{:<18} ok ({} comparisons)", name, report.comparisons);
            continue;
        }
        failed = true;
        println!(
            "{:<18} FAILED ({} comparisons, {} mismatch(es))",
            name,
            report.comparisons,
            report.mismatches.len()
        );
        for mismatch in &report.mismatches {
            eprintln!("  {}", mismatch);
        }
    }

    if failed {
        anyhow::bail!("Consistency check failed (seed {})", seed);
    }
    Ok(())
}

fn check_import_structure(
    options: &ChainOptions,
    args: &StressArgs,
    seed: u64,
    pb: Option<&ProgressBar>,
) -> Result<CheckReport> {
    let chain = DUChain::with_options(options.clone());
    let _write = DUChainWriteLocker::new(chain.lock());
    let invalid = SimpleCursor::invalid();

    let builder = ChainBuilder::begin(
        &chain,
        IdentifiedFile::from("stress.cpp"),
        SimpleRange::from_coordinates(0, 0, args.contexts as i32 + 1, 0),
    )?;
    let top = builder.finish()?;
    let root = chain
        .root_context(top)
        .ok_or_else(|| anyhow::anyhow!("Stress document vanished"))?;
    let contexts: Vec<IndexedContext> = (0..args.contexts)
        .map(|index| {
            let line = index as i32 + 1;
            chain.open_context(
                root,
                SimpleRange::from_coordinates(line, 0, line, 10),
                ContextType::Namespace,
                None,
            )
        })
        .collect::<duchain_core::Result<_>>()?;

    let mut rng = StdRng::seed_from_u64(seed);
    let mut oracle: DiGraphMap<usize, ()> = DiGraphMap::new();
    let mut report = CheckReport::default();

    for cycle in 0..args.cycles {
        let edits = rng.gen_range(1..=args.contexts / 4 + 1);
        for _ in 0..edits {
            let a = rng.gen_range(0..args.contexts);
            let b = rng.gen_range(0..args.contexts);
            if a == b {
                continue;
            }
            if rng.gen_bool(0.7) {
                // Edges closing a cycle are refused by the chain
                if chain.imports(contexts[b], contexts[a], invalid) {
                    continue;
                }
                chain.add_imported_parent_context(contexts[a], contexts[b], invalid)?;
                oracle.add_edge(a, b, ());
            } else {
                chain.remove_imported_parent_context(contexts[a], contexts[b])?;
                oracle.remove_edge(a, b);
            }
        }

        for a in 0..args.contexts {
            for b in 0..args.contexts {
                if a == b {
                    continue;
                }
                let expected = oracle.contains_node(a)
                    && oracle.contains_node(b)
                    && has_path_connecting(&oracle, a, b, None);
                let actual = chain.imports(contexts[a], contexts[b], invalid);
                report.record(actual == expected, || {
                    format!(
                        "cycle {}: imports({}, {}) = {}, expected {}",
                        cycle, a, b, actual, expected
                    )
                });
            }
        }
        if let Some(pb) = pb {
            pb.inc(1);
        }
    }

    for problem in chain.self_analysis() {
        report.record(false, || problem);
    }
    let metrics = chain.import_cache_metrics();
    debug!(
        "Import cache: {} hits, {} misses, {} invalidations ({:.1}% hit rate)",
        metrics.hits,
        metrics.misses,
        metrics.invalidations,
        metrics.hit_rate() * 100.0
    );
    Ok(report)
}

fn random_elements(rng: &mut StdRng) -> BTreeSet<u32> {
    let size = rng.gen_range(0..200);
    let spread = rng.gen_range(1..600);
    (0..size).map(|_| rng.gen_range(0..spread)).collect()
}

fn check_set_algebra(
    options: &ChainOptions,
    args: &StressArgs,
    seed: u64,
    pb: Option<&ProgressBar>,
) -> CheckReport {
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(1));
    let repository = SetRepository::with_prune_interval("stress", options.set_prune_interval);
    let mut report = CheckReport::default();

    for cycle in 0..args.cycles {
        let sets: Vec<_> = (0..args.sets.max(1))
            .map(|_| {
                let elements = random_elements(&mut rng);
                (repository.create_set(elements.iter().copied()), elements)
            })
            .collect();

        for _ in 0..args.sets.max(1) * 4 {
            let (a, expected_a) = &sets[rng.gen_range(0..sets.len())];
            let (b, expected_b) = &sets[rng.gen_range(0..sets.len())];

            let checks = [
                ("union", a.union(b), expected_a | expected_b),
                ("intersection", a.intersection(b), expected_a & expected_b),
                ("difference", a.difference(b), expected_a - expected_b),
            ];
            for (operation, actual, expected) in checks {
                let ok = actual.std_set() == expected && actual.count() == expected.len();
                report.record(ok, || {
                    format!(
                        "cycle {}: {} has {} elements, expected {}",
                        cycle,
                        operation,
                        actual.count(),
                        expected.len()
                    )
                });
            }
        }
        if let Some(pb) = pb {
            pb.inc(1);
        }
    }

    repository.prune();
    debug!(
        "Set repository: {} nodes, {} live",
        repository.node_count(),
        repository.live_node_count()
    );
    report
}
