//! Fixed-partition refit
//!
//! Free sampling lets motif identities permute between sweeps, so per-motif
//! summaries of a free trace are meaningless. Holding Z at the point
//! estimate and resampling only q, γ and the weights gives a uniquely
//! labelled posterior for the analyses downstream.

use crate::data::{CountMatrixStore, Partition};
use crate::error::{MotifError, Result};
use crate::model::{MixtureModel, PriorConfig, SamplerConfig};
use crate::sampler::{CancelToken, Sampler, Trace, UpdateFlags};
use crate::summary::stats::{mean, quantile};
use log::info;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Sampler settings and update selection for the refit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostProcessConfig {
    pub sampler: SamplerConfig,
    /// Resample ω, ω_m, α and α₀
    pub run_omega: bool,
    /// Resample q and γ
    pub run_q_gamma: bool,
}

impl Default for PostProcessConfig {
    fn default() -> Self {
        Self {
            sampler: SamplerConfig {
                number_iter: 2000,
                burn_in: 1000,
                thinning: 2,
                ..SamplerConfig::default()
            },
            run_omega: true,
            run_q_gamma: true,
        }
    }
}

impl PostProcessConfig {
    /// Short refit for smoke runs and permutation replicates
    pub fn quick() -> Self {
        Self {
            sampler: SamplerConfig::quick(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.sampler.validate()?;
        if !self.run_omega && !self.run_q_gamma {
            return Err(MotifError::Config(
                "post-processing must update at least one of omega or q/gamma".into(),
            ));
        }
        Ok(())
    }

    pub fn flags(&self) -> UpdateFlags {
        UpdateFlags::post_process(self.run_q_gamma, self.run_omega)
    }
}

/// Posterior means of the per-motif parameters plus 95% intervals of ω
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PosteriorSummary {
    pub q_mean: DMatrix<f64>,
    pub gamma_mean: DVector<f64>,
    pub omega_mean: DVector<f64>,
    pub omega_lower: DVector<f64>,
    pub omega_upper: DVector<f64>,
    pub omega_local_mean: DMatrix<f64>,
    pub alpha_mean: f64,
    pub alpha0_mean: f64,
}

impl PosteriorSummary {
    pub fn from_trace(trace: &Trace) -> Result<Self> {
        let first = trace.snapshots.first().ok_or(MotifError::EmptyTrace)?;
        let s = trace.len() as f64;
        let j = first.gamma.len();

        let mut q_mean = DMatrix::zeros(first.q.nrows(), first.q.ncols());
        let mut gamma_mean = DVector::zeros(j);
        let mut omega_mean = DVector::zeros(j);
        let mut omega_local_mean = DMatrix::zeros(first.omega_local.nrows(), j);
        for snap in trace.iter() {
            q_mean += &snap.q;
            gamma_mean += &snap.gamma;
            omega_mean += &snap.omega;
            omega_local_mean += &snap.omega_local;
        }
        q_mean /= s;
        gamma_mean /= s;
        omega_mean /= s;
        omega_local_mean /= s;

        let column = |k: usize| trace.iter().map(|snap| snap.omega[k]).collect::<Vec<f64>>();
        let omega_lower = DVector::from_iterator(j, (0..j).map(|k| quantile(&column(k), 0.025)));
        let omega_upper = DVector::from_iterator(j, (0..j).map(|k| quantile(&column(k), 0.975)));

        let alphas: Vec<f64> = trace.iter().map(|snap| snap.alpha).collect();
        let alpha0s: Vec<f64> = trace.iter().map(|snap| snap.alpha0).collect();
        Ok(Self {
            q_mean,
            gamma_mean,
            omega_mean,
            omega_lower,
            omega_upper,
            omega_local_mean,
            alpha_mean: mean(&alphas),
            alpha0_mean: mean(&alpha0s),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostProcessResult {
    /// The partition the refit held fixed, labels squeezed to `0..K`
    pub partition: Partition,
    pub trace: Trace,
    pub summary: PosteriorSummary,
}

/// Runs the sampler in fixed-partition mode
#[derive(Debug, Clone)]
pub struct PostProcessFitter {
    priors: PriorConfig,
    config: PostProcessConfig,
}

impl PostProcessFitter {
    pub fn new(priors: PriorConfig, config: PostProcessConfig) -> Result<Self> {
        priors.validate()?;
        config.validate()?;
        Ok(Self { priors, config })
    }

    pub fn priors(&self) -> &PriorConfig {
        &self.priors
    }

    pub fn config(&self) -> &PostProcessConfig {
        &self.config
    }

    /// Refit with the configured sampler seed
    pub fn fit(&self, data: Arc<CountMatrixStore>, partition: &Partition, cancel: &CancelToken) -> Result<PostProcessResult> {
        self.fit_with(data, partition, self.config.sampler.clone(), cancel)
    }

    /// Refit with a different chain seed and no checkpointing; used by replicates
    pub fn fit_replicate(
        &self,
        data: Arc<CountMatrixStore>,
        partition: &Partition,
        seed: u64,
        cancel: &CancelToken,
    ) -> Result<PostProcessResult> {
        let sampler = SamplerConfig {
            seed,
            save_frequency: None,
            checkpoint_dir: None,
            ..self.config.sampler.clone()
        };
        self.fit_with(data, partition, sampler, cancel)
    }

    fn fit_with(
        &self,
        data: Arc<CountMatrixStore>,
        partition: &Partition,
        sampler: SamplerConfig,
        cancel: &CancelToken,
    ) -> Result<PostProcessResult> {
        let partition = partition.squeezed();
        let model = MixtureModel::fixed(data, self.priors.clone(), partition.clone())?;
        info!(
            "Fixed-partition refit: {} clusters, q/gamma={}, omega={}",
            model.truncation(),
            self.config.run_q_gamma,
            self.config.run_omega
        );
        let trace = Sampler::new(model, sampler, None)?
            .with_flags(self.config.flags())
            .run(cancel);
        let summary = PosteriorSummary::from_trace(&trace)?;
        Ok(PostProcessResult {
            partition,
            trace,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::{separable, SeparableSpec};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn setup() -> (Arc<CountMatrixStore>, Partition) {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let spec = SeparableSpec { neurons_per_motif: 12, ..SeparableSpec::default() };
        let (store, truth) = separable(&mut rng, &spec).unwrap();
        (Arc::new(store), truth)
    }

    fn config(run_q_gamma: bool, run_omega: bool) -> PostProcessConfig {
        PostProcessConfig {
            sampler: SamplerConfig { number_iter: 120, burn_in: 40, thinning: 2, ..SamplerConfig::default() },
            run_omega,
            run_q_gamma,
        }
    }

    #[test]
    fn test_refit_holds_partition() {
        let (data, truth) = setup();
        // gaps in the labels are compacted away
        let gappy = truth.relabeled(&[4, 0, 9]);
        let fitter = PostProcessFitter::new(PriorConfig::default(), config(true, true)).unwrap();
        let result = fitter.fit(data, &gappy, &CancelToken::new()).unwrap();
        assert_eq!(result.partition.num_clusters(), 3);
        assert_eq!(result.trace.truncation(), Some(3));
        assert_eq!(result.trace.len(), 40);
        for snap in result.trace.iter() {
            assert_eq!(snap.allocation, result.partition.labels);
        }
        let s = &result.summary;
        assert!((s.omega_mean.sum() - 1.0).abs() < 1e-9);
        for k in 0..3 {
            assert!(s.omega_lower[k] <= s.omega_mean[k] && s.omega_mean[k] <= s.omega_upper[k]);
            assert!((s.q_mean.row(k).sum() - 1.0).abs() < 1e-9);
        }
        // motif of neuron 0 puts its mass on regions 0 and 1
        let j = result.partition.labels[0];
        assert!(s.q_mean[(j, 0)] + s.q_mean[(j, 1)] > 0.8);
    }

    #[test]
    fn test_flags_freeze_families() {
        let (data, truth) = setup();
        let fitter = PostProcessFitter::new(PriorConfig::default(), config(false, true)).unwrap();
        let result = fitter.fit(data.clone(), &truth, &CancelToken::new()).unwrap();
        let first = &result.trace.snapshots[0];
        assert!(result.trace.iter().all(|snap| snap.q == first.q && snap.gamma == first.gamma));

        let fitter = PostProcessFitter::new(PriorConfig::default(), config(true, false)).unwrap();
        let result = fitter.fit(data, &truth, &CancelToken::new()).unwrap();
        let first = &result.trace.snapshots[0];
        assert!(result.trace.iter().all(|snap| snap.omega == first.omega && snap.alpha == first.alpha));
    }

    #[test]
    fn test_config_validation() {
        assert!(PostProcessFitter::new(PriorConfig::default(), config(false, false)).is_err());
        assert!(PostProcessConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partition_length_checked() {
        let (data, _) = setup();
        let fitter = PostProcessFitter::new(PriorConfig::default(), config(true, true)).unwrap();
        let short = Partition::new(vec![0, 1, 2]);
        assert!(fitter.fit(data, &short, &CancelToken::new()).is_err());
    }

    #[test]
    fn test_cancel_before_burn_in_is_empty_trace() {
        let (data, truth) = setup();
        let fitter = PostProcessFitter::new(PriorConfig::default(), config(true, true)).unwrap();
        let token = CancelToken::new();
        token.cancel();
        assert!(matches!(fitter.fit(data, &truth, &token), Err(MotifError::EmptyTrace)));
    }
}
