//! motif CLI — projection motif inference from barcode count matrices
//!
//! Commands:
//!   motif fit         — free run, summaries, refit and motif tests
//!   motif resume      — continue a checkpointed free run and analyse it
//!   motif checkpoints — list and verify saved checkpoints
//!   motif simulate    — write a synthetic dataset with known motifs
//!   motif demo        — run the whole pipeline on synthetic data

use motif_core::data::synthetic::{separable, SeparableSpec};
use motif_core::sampler::CheckpointStore;
use motif_core::{
    analyze_trace, run_pipeline, CancelToken, CountMatrixStore, MixtureModel, Partition, PipelineConfig,
    PipelineReport, Sampler,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::env;
use std::sync::Arc;

const REPORT_FILE: &str = "motif-report.json";

fn print_usage() {
    println!(
        r#"
╔══════════════════════════════════════════════════════════════╗
║        motif v0.1 — Projection Motif Inference               ║
║        Hierarchical stick-breaking mixture + MCMC            ║
╚══════════════════════════════════════════════════════════════╝

Usage: motif <command> [options]

Commands:
  fit         <data.json> [config.json] [report.json] [seed.json]   Run the full pipeline
  resume      <data.json> <checkpoint-dir> [config.json] [report.json]
                                                                    Continue a saved free run
  checkpoints <dir>                                                 List and verify checkpoints
  simulate    <out.json> [motifs] [animals] [seed]                  Write synthetic data
  demo                                                              Full run on synthetic data

A seed file holds one one-based motif label per neuron, e.g. [1, 1, 2, 3].
Use "-" for the config to keep the defaults.

Examples:
  motif simulate counts.json 4 3
  motif fit counts.json config.json report.json
  motif resume counts.json checkpoints/ config.json
  motif checkpoints checkpoints/
  RUST_LOG=debug motif demo
"#
    );
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        return;
    }

    match args[1].as_str() {
        "fit" => cmd_fit(&args[2..]),
        "resume" => cmd_resume(&args[2..]),
        "checkpoints" => cmd_checkpoints(&args[2..]),
        "simulate" => cmd_simulate(&args[2..]),
        "demo" => cmd_demo(),
        "help" | "--help" | "-h" => print_usage(),
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
        }
    }
}

/// Load a config file, or the defaults for a missing or "-" argument
fn load_config(arg: Option<&String>) -> Option<PipelineConfig> {
    match arg.map(|s| s.as_str()) {
        None | Some("-") => Some(PipelineConfig::default()),
        Some(path) => match PipelineConfig::load(path) {
            Ok(config) => {
                println!("  Loaded config from {}", path);
                Some(config)
            }
            Err(e) => {
                eprintln!("  Bad config {}: {}", path, e);
                None
            }
        },
    }
}

fn load_data(path: &str) -> Option<Arc<CountMatrixStore>> {
    match CountMatrixStore::load(path) {
        Ok(data) => {
            println!("  Loaded {}", data.summary());
            Some(Arc::new(data))
        }
        Err(e) => {
            eprintln!("  Failed to load {}: {}", path, e);
            None
        }
    }
}

fn load_seed(path: &str) -> Option<Partition> {
    let labels: Vec<usize> = match std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|json| serde_json::from_str(&json).map_err(|e| e.to_string()))
    {
        Ok(labels) => labels,
        Err(e) => {
            eprintln!("  Failed to read seed {}: {}", path, e);
            return None;
        }
    };
    match Partition::from_one_based(&labels) {
        Ok(p) => Some(p),
        Err(e) => {
            eprintln!("  Invalid seed partition: {}", e);
            None
        }
    }
}

fn print_report(report: &PipelineReport) {
    println!("\n  Run {}", report.run_id);
    println!("  {}", "-".repeat(70));
    println!(
        "  Free chain: {} snapshots, point estimate with {} clusters (loss {:.2})",
        report.trace.len(),
        report.point_estimate.num_clusters,
        report.point_estimate.loss
    );
    match &report.prominence {
        Some(prominence) => {
            for (label, prom) in report.relabeling.labels.iter().zip(&prominence.motifs) {
                let flag = if prom.prominent { "prominent" } else { "" };
                println!(
                    "  motif {:>2} | {:>4} neurons | {:<30} | P(ω>{:.2}) = {:.3} {}",
                    label.motif, label.size, label.label, prominence.threshold, prom.probability, flag
                );
            }
        }
        None => {
            for label in &report.relabeling.labels {
                println!("  motif {:>2} | {:>4} neurons | {}", label.motif, label.size, label.label);
            }
        }
    }
    if report.cancelled {
        println!("  Run was cancelled; later stages are incomplete");
    }
    if let Some(v) = &report.variability {
        println!(
            "  Variable across animals: {:?} ({} permutations)",
            v.variable, v.replicates_completed
        );
    }
    if let Some(p) = &report.predictive {
        println!(
            "  Predictive check: {} replicates, mean histogram distance {:.3}",
            p.replicates, p.mean_histogram_distance
        );
    }
}

fn save_report(report: &PipelineReport, path: &str) {
    match report.save(path) {
        Ok(()) => println!("\n  Report saved to {}", path),
        Err(e) => eprintln!("\n  Failed to save report: {}", e),
    }
}

fn cmd_fit(args: &[String]) {
    if args.is_empty() {
        eprintln!("Usage: motif fit <data.json> [config.json] [report.json] [seed.json]");
        return;
    }
    let Some(data) = load_data(&args[0]) else { return };
    let Some(config) = load_config(args.get(1)) else { return };
    let out = args.get(2).map(|s| s.as_str()).unwrap_or(REPORT_FILE);
    let seed = match args.get(3) {
        Some(path) => match load_seed(path) {
            Some(p) => Some(p),
            None => return,
        },
        None => None,
    };

    match run_pipeline(data, seed.as_ref(), &config, &CancelToken::new()) {
        Ok(report) => {
            print_report(&report);
            save_report(&report, out);
        }
        Err(e) => eprintln!("  Pipeline failed: {}", e),
    }
}

fn cmd_resume(args: &[String]) {
    if args.len() < 2 {
        eprintln!("Usage: motif resume <data.json> <checkpoint-dir> [config.json] [report.json]");
        return;
    }
    let Some(data) = load_data(&args[0]) else { return };
    let Some(config) = load_config(args.get(2)) else { return };
    let out = args.get(3).map(|s| s.as_str()).unwrap_or(REPORT_FILE);

    let store = CheckpointStore::open(&args[1]);
    let checkpoint = match store.load_latest() {
        Ok(Some(c)) => c,
        Ok(None) => {
            eprintln!("  No checkpoints in {}", args[1]);
            return;
        }
        Err(e) => {
            eprintln!("  Failed to load checkpoint: {}", e);
            return;
        }
    };
    println!(
        "  Resuming run {} from sweep {}",
        checkpoint.run_id, checkpoint.chain.iteration
    );

    let cancel = CancelToken::new();
    let result = MixtureModel::new(data.clone(), config.priors.clone(), config.truncation)
        .and_then(|model| Sampler::resume(model, checkpoint))
        .and_then(|sampler| {
            let run_id = sampler.run_id().to_string();
            let trace = sampler.run(&cancel);
            analyze_trace(data, run_id, &trace, &config, &cancel)
        });
    match result {
        Ok(report) => {
            print_report(&report);
            save_report(&report, out);
        }
        Err(e) => eprintln!("  Resume failed: {}", e),
    }
}

fn cmd_checkpoints(args: &[String]) {
    let Some(dir) = args.first() else {
        eprintln!("Usage: motif checkpoints <dir>");
        return;
    };
    let store = CheckpointStore::open(dir);
    if store.list().is_empty() {
        println!("\n  No checkpoints in {}", dir);
        return;
    }
    let verified: Vec<(u64, bool)> = store.verify_all();
    println!("\n  Checkpoints ({}):", store.list().len());
    println!("  {}", "-".repeat(70));
    for meta in store.list() {
        let ok = verified
            .iter()
            .find(|(v, _)| *v == meta.version)
            .map(|(_, ok)| *ok)
            .unwrap_or(false);
        println!(
            "  v{:>4} | {} | sweep {:>6} | {} bytes | {} | {}",
            meta.version,
            meta.timestamp.format("%Y-%m-%d %H:%M:%S"),
            meta.iteration,
            meta.size_bytes,
            &meta.run_id[..8.min(meta.run_id.len())],
            if ok { "OK" } else { "CORRUPTED" }
        );
    }
}

fn cmd_simulate(args: &[String]) {
    let Some(out) = args.first() else {
        eprintln!("Usage: motif simulate <out.json> [motifs] [animals] [seed]");
        return;
    };
    let defaults = SeparableSpec::default();
    let spec = SeparableSpec {
        motifs: args.get(1).and_then(|s| s.parse().ok()).unwrap_or(defaults.motifs),
        animals: args.get(2).and_then(|s| s.parse().ok()).unwrap_or(defaults.animals),
        ..defaults
    };
    let seed: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(42);

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    match separable(&mut rng, &spec).and_then(|(data, truth)| {
        data.save(out)?;
        Ok((data, truth))
    }) {
        Ok((data, truth)) => {
            println!("\n  Wrote {} to {}", data.summary(), out);
            println!("  True motif sizes: {:?}", truth.cluster_sizes());
        }
        Err(e) => eprintln!("  Simulation failed: {}", e),
    }
}

fn cmd_demo() {
    println!("\n  === Motif demo ===\n");
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let (data, truth) = match separable(&mut rng, &SeparableSpec::default()) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("  Failed to generate data: {}", e);
            return;
        }
    };
    println!("  [1/2] Synthetic {}", data.summary());
    println!("        true motif sizes {:?}", truth.cluster_sizes());

    println!("  [2/2] Running pipeline with quick settings...");
    match run_pipeline(Arc::new(data), None, &PipelineConfig::quick(), &CancelToken::new()) {
        Ok(report) => {
            print_report(&report);
            println!("\n  Recovered {} motifs (truth: {})", report.num_motifs(), truth.num_clusters());
        }
        Err(e) => eprintln!("  Demo failed: {}", e),
    }
}
