//! Prior hyperparameters and sampler control
//!
//! Both are plain value types handed to constructors; nothing here is global.

use crate::error::{MotifError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Hyperparameters of the hierarchical mixture
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorConfig {
    /// Symmetric Dirichlet shape of the region-probability prior q_j ~ Dir(a·1)
    pub a: f64,
    /// Precision of the Dirichlet proposal q' ~ Dir(tau·q + nu)
    pub tau: f64,
    /// Pseudo-count floor of the Dirichlet proposal
    pub nu: f64,
    /// Shape of the Gamma prior on the over-dispersion γ_j
    pub a_gamma: f64,
    /// Rate of the Gamma prior on γ_j
    pub b_gamma: f64,
    /// Lower bound on γ_j; proposals below it are rejected
    pub lb_gamma: f64,
    /// Shape / rate of the Gamma prior on the local concentration α
    pub a_alpha: f64,
    pub b_alpha: f64,
    /// Shape / rate of the Gamma prior on the global concentration α₀
    pub a_alpha0: f64,
    pub b_alpha0: f64,
}

impl Default for PriorConfig {
    fn default() -> Self {
        Self {
            a: 1.0,
            tau: 200.0,
            nu: 0.5,
            a_gamma: 2.0,
            b_gamma: 20.0,
            lb_gamma: 1e-3,
            a_alpha: 2.0,
            b_alpha: 0.2,
            a_alpha0: 2.0,
            b_alpha0: 1.0,
        }
    }
}

impl PriorConfig {
    /// Fail fast on hyperparameters outside their support
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("a", self.a),
            ("tau", self.tau),
            ("nu", self.nu),
            ("a_gamma", self.a_gamma),
            ("b_gamma", self.b_gamma),
            ("a_alpha", self.a_alpha),
            ("b_alpha", self.b_alpha),
            ("a_alpha0", self.a_alpha0),
            ("b_alpha0", self.b_alpha0),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(MotifError::Config(format!(
                    "{} must be positive and finite, got {}",
                    name, value
                )));
            }
        }
        if !(self.lb_gamma.is_finite() && self.lb_gamma >= 0.0) {
            return Err(MotifError::Config(format!(
                "lb_gamma must be nonnegative, got {}",
                self.lb_gamma
            )));
        }
        Ok(())
    }

    /// Prior mean of γ, moved onto the support when the bound cuts it off
    pub fn gamma_start(&self) -> f64 {
        (self.a_gamma / self.b_gamma).max(self.lb_gamma * 2.0).max(1e-6)
    }
}

/// Chain length, recording schedule and adaptation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Total sweeps, burn-in included
    pub number_iter: usize,
    pub burn_in: usize,
    pub thinning: usize,
    /// Robbins-Monro rate for the random-walk proposal scales
    pub adaptive_prop: f64,
    /// Write a checkpoint every this many sweeps
    pub save_frequency: Option<usize>,
    pub checkpoint_dir: Option<PathBuf>,
    pub seed: u64,
    /// Sweeps between debug progress lines
    pub log_interval: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            number_iter: 5000,
            burn_in: 2500,
            thinning: 5,
            adaptive_prop: 0.5,
            save_frequency: None,
            checkpoint_dir: None,
            seed: 42,
            log_interval: 500,
        }
    }
}

impl SamplerConfig {
    /// Short chain for smoke runs and demos
    pub fn quick() -> Self {
        Self {
            number_iter: 400,
            burn_in: 200,
            thinning: 2,
            log_interval: 100,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.thinning == 0 {
            return Err(MotifError::Config("thinning must be at least 1".into()));
        }
        if self.number_iter <= self.burn_in {
            return Err(MotifError::Config(format!(
                "number_iter ({}) must exceed burn_in ({})",
                self.number_iter, self.burn_in
            )));
        }
        if !(self.adaptive_prop.is_finite() && self.adaptive_prop >= 0.0) {
            return Err(MotifError::Config(format!(
                "adaptive_prop must be nonnegative, got {}",
                self.adaptive_prop
            )));
        }
        match (self.save_frequency, &self.checkpoint_dir) {
            (Some(0), _) => Err(MotifError::Config("save_frequency must be at least 1".into())),
            (Some(_), None) => Err(MotifError::Config(
                "save_frequency requires a checkpoint_dir".into(),
            )),
            _ => Ok(()),
        }
    }

    /// Number of snapshots a complete run records
    pub fn retained(&self) -> usize {
        if self.number_iter <= self.burn_in || self.thinning == 0 {
            return 0;
        }
        (self.number_iter - self.burn_in + self.thinning - 1) / self.thinning
    }

    pub fn records(&self, iteration: usize) -> bool {
        iteration >= self.burn_in && (iteration - self.burn_in) % self.thinning == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_priors_valid() {
        assert!(PriorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_nonpositive_prior_rejected() {
        let priors = PriorConfig { b_gamma: 0.0, ..PriorConfig::default() };
        assert!(matches!(priors.validate(), Err(MotifError::Config(_))));
        let priors = PriorConfig { lb_gamma: -1.0, ..PriorConfig::default() };
        assert!(priors.validate().is_err());
    }

    #[test]
    fn test_sampler_validation() {
        assert!(SamplerConfig::default().validate().is_ok());
        let bad = SamplerConfig { burn_in: 10, number_iter: 10, ..SamplerConfig::default() };
        assert!(bad.validate().is_err());
        let bad = SamplerConfig { save_frequency: Some(10), ..SamplerConfig::default() };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_retained_matches_records() {
        let cfg = SamplerConfig { number_iter: 200, burn_in: 100, thinning: 3, ..SamplerConfig::default() };
        let counted = (0..cfg.number_iter).filter(|&t| cfg.records(t)).count();
        assert_eq!(counted, cfg.retained());
        assert_eq!(cfg.retained(), 34);
    }
}
