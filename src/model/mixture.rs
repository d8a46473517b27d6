//! MixtureModel — the generative hierarchy and its density primitives
//!
//! ```text
//! β_k ~ Beta(1, α₀)                  ω_k = β_k Π_{l<k} (1 − β_l)   (ω_J takes the rest)
//! ω_m ~ Dirichlet(α · ω)              per animal m
//! q_j ~ Dirichlet(a · 1_R)            γ_j ~ Gamma(a_gamma, b_gamma) on [lb_gamma, ∞)
//! z_i ~ Categorical(ω_{m(i)})         y_i | z_i = j ~ DirMult(n_i, q_j / γ_j)
//! α ~ Gamma(a_alpha, b_alpha)         α₀ ~ Gamma(a_alpha0, b_alpha0)
//! ```
//!
//! The model owns no mutable state; the sampler threads a [`LatentState`]
//! through it.

use super::config::PriorConfig;
use super::dist::{self, log_dirichlet_pdf, log_gamma_pdf, normalize_floor};
use super::likelihood::dirmult_log_pmf;
use super::state::LatentState;
use crate::data::{CountMatrixStore, Partition};
use crate::error::{MotifError, Result};
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use std::sync::Arc;

/// Total-variation distance below which two neurons cannot both seed a motif
pub const INIT_SEPARATION: f64 = 0.5;

fn tv_distance(a: &[f64], b: &[f64]) -> f64 {
    0.5 * a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum::<f64>()
}

/// Which latent variables the allocation step may move
#[derive(Debug, Clone, PartialEq)]
pub enum FitMode {
    /// Z is resampled every sweep
    Free,
    /// Z is held at the supplied partition
    Fixed(Partition),
}

#[derive(Debug, Clone)]
pub struct MixtureModel {
    data: Arc<CountMatrixStore>,
    priors: PriorConfig,
    truncation: usize,
    mode: FitMode,
    animal_of: Vec<usize>,
}

impl MixtureModel {
    /// Free-allocation model with truncation level J
    pub fn new(data: Arc<CountMatrixStore>, priors: PriorConfig, truncation: usize) -> Result<Self> {
        priors.validate()?;
        if truncation == 0 {
            return Err(MotifError::Config("truncation level must be at least 1".into()));
        }
        let animal_of = data.neurons().iter().map(|n| n.animal).collect();
        Ok(Self { data, priors, truncation, mode: FitMode::Free, animal_of })
    }

    /// Fixed-partition model; one motif per label `0..=max label`
    pub fn fixed(data: Arc<CountMatrixStore>, priors: PriorConfig, partition: Partition) -> Result<Self> {
        let truncation = partition.labels.iter().copied().max().map_or(0, |m| m + 1);
        partition.validate(data.num_neurons(), truncation.max(1))?;
        let mut model = Self::new(data, priors, truncation)?;
        model.mode = FitMode::Fixed(partition);
        Ok(model)
    }

    /// Free mode when `fixed` is `None`, fixed-partition mode otherwise
    pub fn with_assignment(
        data: Arc<CountMatrixStore>,
        priors: PriorConfig,
        truncation: usize,
        fixed: Option<Partition>,
    ) -> Result<Self> {
        match fixed {
            Some(partition) => Self::fixed(data, priors, partition),
            None => Self::new(data, priors, truncation),
        }
    }

    pub fn data(&self) -> &CountMatrixStore {
        &self.data
    }

    pub fn shared_data(&self) -> Arc<CountMatrixStore> {
        Arc::clone(&self.data)
    }

    pub fn priors(&self) -> &PriorConfig {
        &self.priors
    }

    pub fn truncation(&self) -> usize {
        self.truncation
    }

    pub fn mode(&self) -> &FitMode {
        &self.mode
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self.mode, FitMode::Fixed(_))
    }

    pub fn animal_of(&self) -> &[usize] {
        &self.animal_of
    }

    pub fn num_animals(&self) -> usize {
        self.data.num_animals()
    }

    pub fn log_likelihood(&self, neuron: usize, motif: usize, state: &LatentState) -> f64 {
        let q: Vec<f64> = state.q.row(motif).iter().copied().collect();
        dirmult_log_pmf(self.data.neuron(neuron), &q, state.gamma[motif])
    }

    /// Joint log-likelihood of `members` under region probabilities `q` and scale `gamma`
    pub fn group_log_likelihood(&self, members: &[usize], q: &[f64], gamma: f64) -> f64 {
        super::likelihood::group_log_likelihood(
            members.iter().map(|&i| self.data.neuron(i)),
            q,
            gamma,
        )
    }

    pub fn log_prior_q(&self, q: &[f64]) -> f64 {
        let alpha = vec![self.priors.a; q.len()];
        log_dirichlet_pdf(q, &alpha)
    }

    pub fn log_prior_gamma(&self, gamma: f64) -> f64 {
        if gamma < self.priors.lb_gamma {
            return f64::NEG_INFINITY;
        }
        log_gamma_pdf(gamma, self.priors.a_gamma, self.priors.b_gamma)
    }

    pub fn log_prior_alpha(&self, alpha: f64) -> f64 {
        log_gamma_pdf(alpha, self.priors.a_alpha, self.priors.b_alpha)
    }

    pub fn log_prior_alpha0(&self, alpha0: f64) -> f64 {
        log_gamma_pdf(alpha0, self.priors.a_alpha0, self.priors.b_alpha0)
    }

    /// Stick proportions β_k recovered from ω (first J − 1 sticks)
    pub fn sticks(omega: &DVector<f64>) -> Vec<f64> {
        let j = omega.len();
        let mut remaining = 1.0;
        let mut sticks = Vec::with_capacity(j.saturating_sub(1));
        for k in 0..j.saturating_sub(1) {
            let b = if remaining > 0.0 { omega[k] / remaining } else { 1.0 };
            sticks.push(b.clamp(dist::PROB_FLOOR, 1.0 - f64::EPSILON));
            remaining -= omega[k];
        }
        sticks
    }

    /// log Π_k Beta(β_k | 1, α₀)
    pub fn log_stick_density(&self, omega: &DVector<f64>, alpha0: f64) -> f64 {
        if !(alpha0 > 0.0) {
            return f64::NEG_INFINITY;
        }
        Self::sticks(omega)
            .iter()
            .map(|b| alpha0.ln() + (alpha0 - 1.0) * (1.0 - b).ln())
            .sum()
    }

    /// log Π_m Dirichlet(ω_m | α ω)
    pub fn log_local_density(&self, omega_local: &DMatrix<f64>, omega: &DVector<f64>, alpha: f64) -> f64 {
        if !(alpha > 0.0) {
            return f64::NEG_INFINITY;
        }
        let conc: Vec<f64> = omega.iter().map(|w| alpha * w).collect();
        omega_local
            .row_iter()
            .map(|row| {
                let w: Vec<f64> = row.iter().copied().collect();
                log_dirichlet_pdf(&w, &conc)
            })
            .sum()
    }

    /// Smoothed mean projection profile of a group of neurons
    fn profile(&self, members: &[usize]) -> Option<Vec<f64>> {
        let r = self.data.num_regions();
        let mut acc = vec![0.0; r];
        let mut used = 0usize;
        for &i in members {
            if self.data.total(i) == 0 {
                continue;
            }
            for (a, p) in acc.iter_mut().zip(self.data.proportions(i)) {
                *a += p;
            }
            used += 1;
        }
        if used == 0 {
            return None;
        }
        let mut q: Vec<f64> = acc.iter().map(|a| 0.95 * a / used as f64 + 0.05 / r as f64).collect();
        normalize_floor(&mut q);
        Some(q)
    }

    /// Up to J mutually distant projecting neurons, by farthest-first traversal
    /// from a random start. Stops early once the farthest neuron is closer than
    /// [`INIT_SEPARATION`] to a chosen one; the remaining motifs start at prior draws.
    fn spread_centres<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<usize> {
        let candidates: Vec<usize> = (0..self.data.num_neurons())
            .filter(|&i| self.data.total(i) > 0)
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }
        let props: Vec<Vec<f64>> = candidates.iter().map(|&i| self.data.proportions(i)).collect();
        let first = rng.gen_range(0..candidates.len());
        let mut chosen = vec![first];
        let mut nearest: Vec<f64> = props.iter().map(|p| tv_distance(p, &props[first])).collect();
        while chosen.len() < self.truncation {
            let (far, d) = nearest
                .iter()
                .copied()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |best, (k, d)| if d > best.1 { (k, d) } else { best });
            if d < INIT_SEPARATION {
                break;
            }
            chosen.push(far);
            for (k, p) in props.iter().enumerate() {
                nearest[k] = nearest[k].min(tv_distance(p, &props[far]));
            }
        }
        chosen.into_iter().map(|k| candidates[k]).collect()
    }

    /// Starting state: from the fixed partition, a seed partition, or data-driven centres
    pub fn initial_state<R: Rng + ?Sized>(&self, rng: &mut R, seed: Option<&Partition>) -> Result<LatentState> {
        let n = self.data.num_neurons();
        let r = self.data.num_regions();
        let j_max = self.truncation;
        let gamma0 = self.priors.gamma_start();

        let mut q = DMatrix::zeros(j_max, r);
        let allocation = match (&self.mode, seed) {
            (FitMode::Fixed(partition), _) => partition.labels.clone(),
            (FitMode::Free, Some(partition)) => {
                partition.validate(n, j_max)?;
                partition.labels.clone()
            }
            (FitMode::Free, None) => Vec::new(),
        };

        // motifs `0..seeded` start from data; the rest stay empty at prior draws
        let seeded = if allocation.is_empty() {
            let centres = self.spread_centres(rng);
            for j in 0..j_max {
                let row = centres
                    .get(j)
                    .and_then(|&i| self.profile(&[i]))
                    .unwrap_or_else(|| dist::sample_dirichlet(rng, &vec![self.priors.a; r]));
                for (c, v) in row.into_iter().enumerate() {
                    q[(j, c)] = v;
                }
            }
            centres.len().max(1)
        } else {
            let mut groups = vec![Vec::new(); j_max];
            for (i, &l) in allocation.iter().enumerate() {
                groups[l].push(i);
            }
            for (j, members) in groups.iter().enumerate() {
                let row = self
                    .profile(members)
                    .unwrap_or_else(|| dist::sample_dirichlet(rng, &vec![self.priors.a; r]));
                for (c, v) in row.into_iter().enumerate() {
                    q[(j, c)] = v;
                }
            }
            j_max
        };

        let mut state = LatentState {
            allocation,
            q,
            gamma: DVector::from_element(j_max, gamma0),
            omega: DVector::from_element(j_max, 1.0 / j_max as f64),
            omega_local: DMatrix::from_element(self.num_animals(), j_max, 1.0 / j_max as f64),
            alpha: self.priors.a_alpha / self.priors.b_alpha,
            alpha0: self.priors.a_alpha0 / self.priors.b_alpha0,
        };

        if state.allocation.is_empty() {
            state.allocation = (0..n)
                .map(|i| {
                    (0..seeded)
                        .map(|j| (j, self.log_likelihood(i, j, &state)))
                        .fold((0, f64::NEG_INFINITY), |best, (j, lp)| if lp > best.1 { (j, lp) } else { best })
                        .0
                })
                .collect();
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn store() -> Arc<CountMatrixStore> {
        Arc::new(
            CountMatrixStore::from_rows(
                vec!["A".into(), "B".into(), "C".into()],
                vec![
                    vec![vec![30, 1, 0], vec![0, 25, 2], vec![0, 0, 0]],
                    vec![vec![28, 0, 1], vec![1, 0, 40]],
                ],
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_invalid_priors_fail_fast() {
        let priors = PriorConfig { a_alpha: -1.0, ..PriorConfig::default() };
        assert!(MixtureModel::new(store(), priors, 5).is_err());
        assert!(MixtureModel::new(store(), PriorConfig::default(), 0).is_err());
    }

    #[test]
    fn test_seed_with_too_many_clusters() {
        let model = MixtureModel::new(store(), PriorConfig::default(), 2).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let seed = Partition::new(vec![0, 1, 2, 0, 1]);
        assert!(matches!(model.initial_state(&mut rng, Some(&seed)), Err(MotifError::Config(_))));
    }

    #[test]
    fn test_initial_state_is_valid() {
        let model = MixtureModel::new(store(), PriorConfig::default(), 4).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let state = model.initial_state(&mut rng, None).unwrap();
        assert_eq!(state.allocation.len(), 5);
        assert!(state.allocation.iter().all(|&j| j < 4));
        assert!(state.simplex_error() < 1e-9);
        assert_eq!(state.omega_local.nrows(), 2);
    }

    #[test]
    fn test_fixed_mode_uses_partition() {
        let partition = Partition::new(vec![0, 1, 1, 0, 2]);
        let model = MixtureModel::fixed(store(), PriorConfig::default(), partition.clone()).unwrap();
        assert!(model.is_fixed());
        assert_eq!(model.truncation(), 3);
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let state = model.initial_state(&mut rng, None).unwrap();
        assert_eq!(state.allocation, partition.labels);
        // motif 0 holds the region-A neurons
        assert!(state.q[(0, 0)] > 0.8);
    }

    #[test]
    fn test_spread_centres_are_distinct() {
        let model = MixtureModel::new(store(), PriorConfig::default(), 4).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let centres = model.spread_centres(&mut rng);
        // neurons 0 and 3 share a profile, neuron 2 has no reads
        assert_eq!(centres.len(), 3);
        assert!(!centres.contains(&2));
        assert!(!(centres.contains(&0) && centres.contains(&3)));
        let state = model.initial_state(&mut rng, None).unwrap();
        assert_eq!(state.allocation[0], state.allocation[3]);
        assert_ne!(state.allocation[0], state.allocation[1]);
        assert_ne!(state.allocation[1], state.allocation[4]);
    }

    #[test]
    fn test_gamma_prior_bound() {
        let model = MixtureModel::new(store(), PriorConfig::default(), 3).unwrap();
        assert_eq!(model.log_prior_gamma(1e-4), f64::NEG_INFINITY);
        assert!(model.log_prior_gamma(0.1).is_finite());
    }

    #[test]
    fn test_sticks_roundtrip() {
        let omega = DVector::from_vec(vec![0.5, 0.25, 0.125, 0.125]);
        let sticks = MixtureModel::sticks(&omega);
        assert_eq!(sticks.len(), 3);
        for b in sticks {
            assert!((b - 0.5).abs() < 1e-12);
        }
    }
}
