//! Variable motifs: animal-to-animal weight spread beyond a permutation null
//!
//! The statistic for motif j is the posterior mean of the across-animal
//! variance of ω_{m,j}. Under the null, animal identity carries no
//! information, so neurons are shuffled across animals (per-animal sizes and
//! every neuron's motif kept) and the fixed-partition refit is repeated.
//!
//! Replicates are independent chains. They run on a rayon pool, each with a
//! private ChaCha stream, and report back over a channel; the reduction only
//! sorts and counts, so completion order does not matter.

use crate::data::{CountMatrixStore, Partition};
use crate::error::{MotifError, Result};
use crate::postprocess::PostProcessFitter;
use crate::sampler::{CancelToken, Trace};
use crate::summary::stats::{mean, quantile};
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::sync::mpsc;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariabilityConfig {
    /// Permutation replicates in the null
    pub replicates: usize,
    /// Test level; the null quantile used is 1 − significance
    pub significance: f64,
    pub seed: u64,
    /// Worker threads, 0 for the rayon default
    pub threads: usize,
}

impl Default for VariabilityConfig {
    fn default() -> Self {
        Self {
            replicates: 100,
            significance: 0.05,
            seed: 2024,
            threads: 0,
        }
    }
}

impl VariabilityConfig {
    pub fn validate(&self) -> Result<()> {
        if self.replicates == 0 {
            return Err(MotifError::Config("variability test needs at least one replicate".into()));
        }
        if !(self.significance > 0.0 && self.significance < 1.0) {
            return Err(MotifError::Config(format!(
                "significance must lie in (0, 1), got {}",
                self.significance
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotifVariability {
    pub motif: usize,
    pub observed: f64,
    /// (1 − significance) quantile of the null; NaN without replicates
    pub null_quantile: f64,
    pub null_mean: f64,
    /// (1 + #{null ≥ observed}) / (1 + replicates)
    pub p_value: f64,
    pub variable: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariabilityReport {
    pub motifs: Vec<MotifVariability>,
    /// Indices of the variable motifs
    pub variable: Vec<usize>,
    pub replicates_completed: usize,
    pub cancelled: bool,
}

/// Posterior mean of the across-animal variance of each motif's local weight
pub fn variance_statistic(trace: &Trace) -> Result<Vec<f64>> {
    let j = trace.truncation().ok_or(MotifError::EmptyTrace)?;
    let mut acc = vec![0.0; j];
    for snap in trace.iter() {
        for (a, v) in acc.iter_mut().zip(snap.local_weight_variance()) {
            *a += v;
        }
    }
    let s = trace.len() as f64;
    Ok(acc.into_iter().map(|a| a / s).collect())
}

/// Shuffle neurons across animals; returns the permuted data and partition
pub fn permute_animals<R: Rng + ?Sized>(
    rng: &mut R,
    data: &CountMatrixStore,
    partition: &Partition,
) -> Result<(CountMatrixStore, Partition)> {
    let mut perm: Vec<usize> = (0..data.num_neurons()).collect();
    perm.shuffle(rng);
    Ok((data.permuted(&perm)?, partition.permuted(&perm)))
}

fn run_replicate(
    fitter: &PostProcessFitter,
    data: &CountMatrixStore,
    partition: &Partition,
    base_seed: u64,
    replicate: usize,
    cancel: &CancelToken,
) -> Result<Option<Vec<f64>>> {
    let mut rng = ChaCha8Rng::seed_from_u64(base_seed);
    rng.set_stream(replicate as u64 + 1);
    let (shuffled, labels) = permute_animals(&mut rng, data, partition)?;
    let result = fitter.fit_replicate(Arc::new(shuffled), &labels, rng.gen(), cancel)?;
    if result.trace.cancelled {
        return Ok(None);
    }
    variance_statistic(&result.trace).map(Some)
}

/// Test every motif of `observed` (a fixed-partition trace over `partition`) for variability
pub fn variable_motifs(
    fitter: &PostProcessFitter,
    data: &CountMatrixStore,
    partition: &Partition,
    observed: &Trace,
    config: &VariabilityConfig,
    cancel: &CancelToken,
) -> Result<VariabilityReport> {
    config.validate()?;
    let observed_stat = variance_statistic(observed)?;
    let partition = partition.squeezed();
    if partition.len() != data.num_neurons() {
        return Err(MotifError::Partition(format!(
            "partition covers {} neurons, dataset has {}",
            partition.len(),
            data.num_neurons()
        )));
    }
    if partition.num_clusters() != observed_stat.len() {
        return Err(MotifError::Partition(format!(
            "partition has {} clusters, trace has {} motifs",
            partition.num_clusters(),
            observed_stat.len()
        )));
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .build()
        .map_err(|e| MotifError::Config(format!("cannot build worker pool: {}", e)))?;
    info!(
        "Variability test: {} permutation replicates on {} threads",
        config.replicates,
        pool.current_num_threads()
    );

    let (tx, rx) = mpsc::channel();
    pool.scope(|scope| {
        for r in 0..config.replicates {
            let tx = tx.clone();
            let partition = &partition;
            scope.spawn(move |_| {
                if cancel.is_cancelled() {
                    return;
                }
                let outcome = run_replicate(fitter, data, partition, config.seed, r, cancel);
                let _ = tx.send((r, outcome));
            });
        }
    });
    drop(tx);

    let mut nulls: Vec<(usize, Vec<f64>)> = Vec::with_capacity(config.replicates);
    for (r, outcome) in rx {
        match outcome {
            Ok(Some(stat)) => nulls.push((r, stat)),
            Ok(None) => debug!("Replicate {} cancelled mid-chain", r),
            Err(e) => warn!("Replicate {} failed: {}", r, e),
        }
    }
    nulls.sort_by_key(|(r, _)| *r);
    let completed = nulls.len();
    let cancelled = cancel.is_cancelled();
    if cancelled {
        warn!("Variability test cancelled after {} of {} replicates", completed, config.replicates);
    }

    let motifs: Vec<MotifVariability> = observed_stat
        .iter()
        .enumerate()
        .map(|(k, &obs)| {
            let null: Vec<f64> = nulls.iter().map(|(_, stat)| stat[k]).collect();
            let null_quantile = quantile(&null, 1.0 - config.significance);
            let exceed = null.iter().filter(|&&v| v >= obs).count();
            MotifVariability {
                motif: k,
                observed: obs,
                null_quantile,
                null_mean: mean(&null),
                p_value: (1 + exceed) as f64 / (1 + null.len()) as f64,
                variable: !null.is_empty() && obs > null_quantile,
            }
        })
        .collect();
    let variable: Vec<usize> = motifs.iter().filter(|m| m.variable).map(|m| m.motif).collect();
    info!("Variable motifs: {:?} ({} replicates)", variable, completed);

    Ok(VariabilityReport {
        motifs,
        variable,
        replicates_completed: completed,
        cancelled,
    })
}
