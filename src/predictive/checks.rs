//! Posterior predictive checks on total-count histograms and zero incidence

use super::simulate::{simulate_replicate, DissectionNoise};
use crate::data::{CountMatrixStore, Partition};
use crate::error::{MotifError, Result};
use crate::sampler::{CancelToken, Trace};
use crate::summary::stats::{mean, std_dev};
use log::{info, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Log2 bin of a neuron total: 0 for no reads, then ⌊log2 n⌋ + 1
pub fn log2_bin(total: u32) -> usize {
    (u32::BITS - total.leading_zeros()) as usize
}

/// Summary statistics compared between observed and simulated data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateStats {
    /// Fraction of neurons per log2 total bin; totals past the last bin land in it
    pub total_histogram: Vec<f64>,
    /// Fraction of neurons with zero reads in each region
    pub zero_fraction: Vec<f64>,
}

impl ReplicateStats {
    pub fn compute(data: &CountMatrixStore, bins: usize) -> Self {
        let n = data.num_neurons().max(1) as f64;
        let bins = bins.max(1);
        let mut hist = vec![0.0; bins];
        let mut zeros = vec![0.0; data.num_regions()];
        for neuron in data.neurons() {
            hist[log2_bin(neuron.total).min(bins - 1)] += 1.0;
            for (z, &c) in zeros.iter_mut().zip(&neuron.counts) {
                if c == 0 {
                    *z += 1.0;
                }
            }
        }
        hist.iter_mut().for_each(|h| *h /= n);
        zeros.iter_mut().for_each(|z| *z /= n);
        Self {
            total_histogram: hist,
            zero_fraction: zeros,
        }
    }

    /// Bin count that covers every total of `data`
    pub fn bins_for(data: &CountMatrixStore) -> usize {
        data.neurons().iter().map(|n| log2_bin(n.total)).max().unwrap_or(0) + 1
    }

    /// Total-variation distance between the two total-count histograms
    pub fn histogram_distance(&self, other: &Self) -> f64 {
        let len = self.total_histogram.len().max(other.total_histogram.len());
        let at = |h: &[f64], k: usize| h.get(k).copied().unwrap_or(0.0);
        0.5 * (0..len)
            .map(|k| (at(&self.total_histogram, k) - at(&other.total_histogram, k)).abs())
            .sum::<f64>()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleReplicateCheck {
    pub observed: ReplicateStats,
    pub simulated: ReplicateStats,
    /// simulated − observed zero fraction per region
    pub zero_fraction_diff: Vec<f64>,
    pub histogram_distance: f64,
}

/// Compare one simulated dataset with the observed one
pub fn single_replicate_check(observed: &CountMatrixStore, simulated: &CountMatrixStore) -> Result<SingleReplicateCheck> {
    if observed.num_regions() != simulated.num_regions() {
        return Err(MotifError::Data(format!(
            "observed has {} regions, simulated has {}",
            observed.num_regions(),
            simulated.num_regions()
        )));
    }
    let bins = ReplicateStats::bins_for(observed);
    let obs = ReplicateStats::compute(observed, bins);
    let sim = ReplicateStats::compute(simulated, bins);
    let zero_fraction_diff = sim
        .zero_fraction
        .iter()
        .zip(&obs.zero_fraction)
        .map(|(s, o)| s - o)
        .collect();
    let histogram_distance = obs.histogram_distance(&sim);
    Ok(SingleReplicateCheck {
        observed: obs,
        simulated: sim,
        zero_fraction_diff,
        histogram_distance,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictiveConfig {
    pub replicates: usize,
    pub noise: DissectionNoise,
    pub seed: u64,
    /// Worker threads, 0 for the rayon default
    pub threads: usize,
}

impl Default for PredictiveConfig {
    fn default() -> Self {
        Self {
            replicates: 50,
            noise: DissectionNoise::none(),
            seed: 99,
            threads: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiReplicateCheck {
    pub observed: ReplicateStats,
    pub zero_fraction_mean: Vec<f64>,
    pub zero_fraction_sd: Vec<f64>,
    /// Fraction of replicates whose zero fraction is at least the observed one
    pub zero_fraction_p_value: Vec<f64>,
    pub mean_histogram_distance: f64,
    pub mean_histogram: Vec<f64>,
    /// Replicates actually completed
    pub replicates: usize,
    /// True when a cancel request skipped some replicates
    pub cancelled: bool,
}

/// Simulate `config.replicates` datasets from random snapshots of `trace` and
/// compare them with `observed`. Deterministic for a given seed. Replicates
/// not yet started when `cancel` fires are skipped.
pub fn multi_replicate_check(
    observed: &CountMatrixStore,
    trace: &Trace,
    partition: &Partition,
    config: &PredictiveConfig,
    cancel: &CancelToken,
) -> Result<MultiReplicateCheck> {
    if trace.is_empty() {
        return Err(MotifError::EmptyTrace);
    }
    if config.replicates == 0 {
        return Err(MotifError::Config("predictive check needs at least one replicate".into()));
    }
    config.noise.validate(observed.num_regions())?;

    let bins = ReplicateStats::bins_for(observed);
    let obs = ReplicateStats::compute(observed, bins);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .build()
        .map_err(|e| MotifError::Config(format!("cannot build worker pool: {}", e)))?;

    let outcomes: Vec<Option<ReplicateStats>> = pool.install(|| {
        (0..config.replicates)
            .into_par_iter()
            .map(|r| -> Result<Option<ReplicateStats>> {
                if cancel.is_cancelled() {
                    return Ok(None);
                }
                let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
                rng.set_stream(r as u64);
                let snap = &trace.snapshots[rng.gen_range(0..trace.len())];
                let rep = simulate_replicate(snap, observed, partition, &config.noise, &mut rng)?;
                Ok(Some(ReplicateStats::compute(&rep.data, bins)))
            })
            .collect::<Result<Vec<_>>>()
    })?;
    let stats: Vec<ReplicateStats> = outcomes.into_iter().flatten().collect();
    let cancelled = stats.len() < config.replicates;
    if cancelled {
        warn!(
            "Predictive check cancelled after {} of {} replicates",
            stats.len(),
            config.replicates
        );
    }

    let r = observed.num_regions();
    let column = |k: usize| stats.iter().map(|s| s.zero_fraction[k]).collect::<Vec<f64>>();
    let zero_fraction_mean = (0..r).map(|k| mean(&column(k))).collect();
    let zero_fraction_sd = (0..r).map(|k| std_dev(&column(k))).collect();
    let zero_fraction_p_value = (0..r)
        .map(|k| {
            if stats.is_empty() {
                return f64::NAN;
            }
            let hits = stats.iter().filter(|s| s.zero_fraction[k] >= obs.zero_fraction[k]).count();
            hits as f64 / stats.len() as f64
        })
        .collect();
    let distances: Vec<f64> = stats.iter().map(|s| obs.histogram_distance(s)).collect();
    let mean_histogram = (0..bins)
        .map(|b| mean(&stats.iter().map(|s| s.total_histogram[b]).collect::<Vec<f64>>()))
        .collect();

    let check = MultiReplicateCheck {
        observed: obs,
        zero_fraction_mean,
        zero_fraction_sd,
        zero_fraction_p_value,
        mean_histogram_distance: mean(&distances),
        mean_histogram,
        replicates: stats.len(),
        cancelled,
    };
    info!(
        "Predictive check: {} replicates, mean histogram distance {:.3}",
        check.replicates, check.mean_histogram_distance
    );
    Ok(check)
}
