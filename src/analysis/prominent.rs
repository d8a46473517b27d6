//! Prominent motifs: global weight above a threshold with high posterior probability

use crate::error::{MotifError, Result};
use crate::sampler::Trace;
use crate::summary::stats::mean;
use log::info;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProminenceConfig {
    /// Global weight a motif must exceed
    pub threshold: f64,
    /// Posterior probability required to call a motif prominent
    pub probability_level: f64,
}

impl Default for ProminenceConfig {
    fn default() -> Self {
        Self {
            threshold: 0.02,
            probability_level: 0.95,
        }
    }
}

impl ProminenceConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.threshold > 0.0 && self.threshold < 1.0) {
            return Err(MotifError::Config(format!(
                "prominence threshold must lie in (0, 1), got {}",
                self.threshold
            )));
        }
        if !(self.probability_level >= 0.0 && self.probability_level < 1.0) {
            return Err(MotifError::Config(format!(
                "probability_level must lie in [0, 1), got {}",
                self.probability_level
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotifProminence {
    pub motif: usize,
    /// Fraction of snapshots with ω_j above the threshold
    pub probability: f64,
    pub mean_weight: f64,
    pub prominent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProminenceReport {
    pub motifs: Vec<MotifProminence>,
    /// Indices of the prominent motifs
    pub prominent: Vec<usize>,
    /// round(threshold · N), the smallest motif the threshold implies
    pub min_neurons: usize,
    pub threshold: f64,
    pub probability_level: f64,
}

/// Run the prominence test over a fixed-partition trace of `num_neurons` neurons
pub fn prominent_motifs(trace: &Trace, num_neurons: usize, config: &ProminenceConfig) -> Result<ProminenceReport> {
    config.validate()?;
    let j = trace.truncation().ok_or(MotifError::EmptyTrace)?;
    let s = trace.len() as f64;

    let motifs: Vec<MotifProminence> = (0..j)
        .map(|k| {
            let weights: Vec<f64> = trace.iter().map(|snap| snap.omega[k]).collect();
            let above = weights.iter().filter(|&&w| w > config.threshold).count();
            let probability = above as f64 / s;
            MotifProminence {
                motif: k,
                probability,
                mean_weight: mean(&weights),
                prominent: probability > config.probability_level,
            }
        })
        .collect();
    let prominent: Vec<usize> = motifs.iter().filter(|m| m.prominent).map(|m| m.motif).collect();
    let min_neurons = (config.threshold * num_neurons as f64).round() as usize;

    info!(
        "Prominent motifs at threshold {} (level {}): {:?} of {}, min {} neurons",
        config.threshold,
        config.probability_level,
        prominent,
        j,
        min_neurons
    );
    Ok(ProminenceReport {
        motifs,
        prominent,
        min_neurons,
        threshold: config.threshold,
        probability_level: config.probability_level,
    })
}
