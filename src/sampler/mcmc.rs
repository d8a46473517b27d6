//! Sampler — blocked Gibbs / adaptive Metropolis-Hastings over the mixture
//!
//! One sweep:
//! 1. allocations Z from Categorical(ω_m ⊙ likelihood), free mode only
//! 2. region probabilities q_j by Dirichlet-proposal MH
//! 3. over-dispersion γ_j by adaptive log-scale random walk
//! 4. global ω through auxiliary table counts and stick-breaking, then local ω_m
//! 5. concentrations α and α₀ by adaptive log-scale random walk
//!
//! A chain is strictly sequential. Everything it mutates lives in
//! [`ChainState`], which is also what a checkpoint stores.

use super::adaptive::{accept_probability, AcceptanceCounter, AdaptiveScale};
use super::cancel::CancelToken;
use super::checkpoint::{Checkpoint, CheckpointStore};
use super::trace::{Diagnostics, Snapshot, Trace};
use crate::data::Partition;
use crate::error::{MotifError, Result};
use crate::model::dist::{
    log_dirichlet_pdf, normalize_floor, sample_beta, sample_categorical_log, sample_dirichlet,
    sample_gamma,
};
use crate::model::{dirmult_log_pmf, FitMode, LatentState, MixtureModel, PriorConfig, SamplerConfig};
use chrono::Utc;
use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Checkpoints kept on disk while a chain runs
const KEEP_CHECKPOINTS: usize = 3;
/// Rejection attempts when drawing γ for an empty motif from its truncated prior
const GAMMA_PRIOR_TRIES: usize = 100;

/// Parameter families updated each sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateFlags {
    pub allocation: bool,
    pub q_gamma: bool,
    pub omega: bool,
}

impl Default for UpdateFlags {
    fn default() -> Self {
        Self { allocation: true, q_gamma: true, omega: true }
    }
}

impl UpdateFlags {
    /// Fixed-partition refit selecting which families move
    pub fn post_process(run_q_gamma: bool, run_omega: bool) -> Self {
        Self { allocation: false, q_gamma: run_q_gamma, omega: run_omega }
    }
}

/// Mutable chain state, serialised whole into checkpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainState {
    /// Sweeps completed so far
    pub iteration: usize,
    pub state: LatentState,
    pub rng: ChaCha8Rng,
    pub gamma_scales: Vec<AdaptiveScale>,
    pub alpha_scale: AdaptiveScale,
    pub alpha0_scale: AdaptiveScale,
    pub q_moves: Vec<AcceptanceCounter>,
    pub alpha_acceptance: Vec<f64>,
    pub alpha0_acceptance: Vec<f64>,
    pub occupied: Vec<usize>,
    pub snapshots: Vec<Snapshot>,
}

#[derive(Clone)]
pub struct Sampler {
    model: MixtureModel,
    config: SamplerConfig,
    flags: UpdateFlags,
    chain: ChainState,
    run_id: String,
}

fn rows(q: &DMatrix<f64>) -> Vec<Vec<f64>> {
    q.row_iter().map(|row| row.iter().copied().collect()).collect()
}

fn draw_gamma_prior<R: Rng + ?Sized>(rng: &mut R, priors: &PriorConfig) -> f64 {
    for _ in 0..GAMMA_PRIOR_TRIES {
        let g = sample_gamma(rng, priors.a_gamma, priors.b_gamma);
        if g >= priors.lb_gamma && g.is_finite() {
            return g;
        }
    }
    priors.gamma_start()
}

impl Sampler {
    /// Set up a chain; `seed` is an optional starting partition for free mode
    pub fn new(model: MixtureModel, config: SamplerConfig, seed: Option<&Partition>) -> Result<Self> {
        config.validate()?;
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let state = model.initial_state(&mut rng, seed)?;
        let j = model.truncation();
        let chain = ChainState {
            iteration: 0,
            state,
            rng,
            gamma_scales: vec![AdaptiveScale::new(0.3); j],
            alpha_scale: AdaptiveScale::new(0.5),
            alpha0_scale: AdaptiveScale::new(0.5),
            q_moves: vec![AcceptanceCounter::default(); j],
            alpha_acceptance: Vec::with_capacity(config.number_iter),
            alpha0_acceptance: Vec::with_capacity(config.number_iter),
            occupied: Vec::with_capacity(config.number_iter),
            snapshots: Vec::with_capacity(config.retained()),
        };
        Ok(Self {
            model,
            config,
            flags: UpdateFlags::default(),
            chain,
            run_id: Uuid::new_v4().to_string(),
        })
    }

    /// Continue a chain from a checkpoint
    pub fn resume(model: MixtureModel, checkpoint: Checkpoint) -> Result<Self> {
        checkpoint.config.validate()?;
        let state = &checkpoint.chain.state;
        let data = model.data();
        if state.allocation.len() != data.num_neurons()
            || state.truncation() != model.truncation()
            || state.omega_local.nrows() != data.num_animals()
            || state.q.ncols() != data.num_regions()
        {
            return Err(MotifError::Config(format!(
                "checkpoint of run {} does not match the model dimensions",
                checkpoint.run_id
            )));
        }
        match model.mode() {
            FitMode::Free if !checkpoint.flags.allocation => {
                return Err(MotifError::Config(format!(
                    "checkpoint of run {} holds allocations fixed and cannot resume a free model",
                    checkpoint.run_id
                )));
            }
            FitMode::Fixed(partition) if partition.labels != state.allocation => {
                return Err(MotifError::Config(format!(
                    "checkpoint of run {} does not match the fixed partition",
                    checkpoint.run_id
                )));
            }
            _ => {}
        }
        info!(
            "Resuming run {} at sweep {} with {} snapshots",
            checkpoint.run_id,
            checkpoint.chain.iteration,
            checkpoint.chain.snapshots.len()
        );
        Ok(Self {
            model,
            config: checkpoint.config,
            flags: checkpoint.flags,
            chain: checkpoint.chain,
            run_id: checkpoint.run_id,
        })
    }

    pub fn with_flags(mut self, flags: UpdateFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn state(&self) -> &LatentState {
        &self.chain.state
    }

    pub fn iteration(&self) -> usize {
        self.chain.iteration
    }

    pub fn model(&self) -> &MixtureModel {
        &self.model
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.chain.snapshots
    }

    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            run_id: self.run_id.clone(),
            created_at: Utc::now(),
            config: self.config.clone(),
            flags: self.flags,
            chain: self.chain.clone(),
        }
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let chain = &self.chain;
        Diagnostics {
            sweeps: chain.iteration,
            gamma_acceptance: chain.gamma_scales.iter().map(|s| s.acceptance_rate()).collect(),
            gamma_proposal_sd: chain.gamma_scales.iter().map(|s| s.sd()).collect(),
            q_acceptance: chain.q_moves.iter().map(|c| c.rate()).collect(),
            alpha_acceptance: chain.alpha_acceptance.clone(),
            alpha0_acceptance: chain.alpha0_acceptance.clone(),
            occupied: chain.occupied.clone(),
        }
    }

    /// Run the remaining sweeps, stopping early if `cancel` fires
    pub fn run(mut self, cancel: &CancelToken) -> Trace {
        let mut checkpoints = match (self.config.save_frequency, &self.config.checkpoint_dir) {
            (Some(_), Some(dir)) => Some(CheckpointStore::open(dir)),
            _ => None,
        };
        info!(
            "Run {}: {} neurons, {} animals, J={}, {} mode, sweeps {}..{} (burn-in {}, thinning {})",
            self.run_id,
            self.model.data().num_neurons(),
            self.model.num_animals(),
            self.model.truncation(),
            if self.model.is_fixed() { "fixed-partition" } else { "free" },
            self.chain.iteration,
            self.config.number_iter,
            self.config.burn_in,
            self.config.thinning,
        );

        let mut cancelled = false;
        while self.chain.iteration < self.config.number_iter {
            if cancel.is_cancelled() {
                warn!("Run {} cancelled after {} sweeps", self.run_id, self.chain.iteration);
                cancelled = true;
                break;
            }
            self.sweep();
            let t = self.chain.iteration;
            if self.config.log_interval > 0 && t % self.config.log_interval == 0 {
                debug!(
                    "sweep {}/{}: {} occupied, alpha={:.3}, alpha0={:.3}",
                    t,
                    self.config.number_iter,
                    self.chain.state.occupied(),
                    self.chain.state.alpha,
                    self.chain.state.alpha0
                );
            }
            if let (Some(freq), Some(store)) = (self.config.save_frequency, checkpoints.as_mut()) {
                if t % freq == 0 {
                    let saved = store
                        .save(&self.checkpoint())
                        .and_then(|_| store.retain_latest(KEEP_CHECKPOINTS));
                    if let Err(e) = saved {
                        warn!("Checkpoint at sweep {} failed: {}", t, e);
                    }
                }
            }
        }

        let diagnostics = self.diagnostics();
        info!(
            "Run {} finished: {} sweeps, {} snapshots, {} occupied, acceptance alpha={:.2} alpha0={:.2}",
            self.run_id,
            diagnostics.sweeps,
            self.chain.snapshots.len(),
            self.chain.state.occupied(),
            diagnostics.mean_alpha_acceptance(),
            diagnostics.mean_alpha0_acceptance(),
        );
        Trace {
            snapshots: self.chain.snapshots,
            diagnostics,
            cancelled,
        }
    }

    /// One full sweep, then record a snapshot if the schedule says so
    pub fn sweep(&mut self) {
        let t = self.chain.iteration;
        if self.flags.allocation && !self.model.is_fixed() {
            self.update_allocation();
        }
        if self.flags.q_gamma {
            let members = self.chain.state.members();
            self.update_q(&members);
            self.update_gamma(&members, t);
        }
        if self.flags.omega {
            self.update_weights();
            self.update_concentrations(t);
        }
        self.chain.occupied.push(self.chain.state.occupied());
        if self.config.records(t) {
            self.chain.snapshots.push(Snapshot::from_state(t, &self.chain.state));
        }
        self.chain.iteration += 1;
    }

    fn update_allocation(&mut self) {
        let model = &self.model;
        let chain = &mut self.chain;
        let state = &mut chain.state;
        let j_max = state.truncation();
        let q_rows = rows(&state.q);
        let log_local = state.omega_local.map(|w| w.ln());
        let mut log_w = vec![0.0; j_max];
        for (i, neuron) in model.data().neurons().iter().enumerate() {
            for (j, lw) in log_w.iter_mut().enumerate() {
                *lw = log_local[(neuron.animal, j)] + dirmult_log_pmf(neuron, &q_rows[j], state.gamma[j]);
            }
            if let Some(j) = sample_categorical_log(&mut chain.rng, &log_w) {
                state.allocation[i] = j;
            }
        }
    }

    fn update_q(&mut self, members: &[Vec<usize>]) {
        let model = &self.model;
        let chain = &mut self.chain;
        let state = &mut chain.state;
        let priors = model.priors();
        let r = state.q.ncols();
        let prior_alpha = vec![priors.a; r];

        for (j, group) in members.iter().enumerate() {
            if group.is_empty() {
                let draw = sample_dirichlet(&mut chain.rng, &prior_alpha);
                for (c, v) in draw.into_iter().enumerate() {
                    state.q[(j, c)] = v;
                }
                continue;
            }
            let current: Vec<f64> = state.q.row(j).iter().copied().collect();
            let gamma = state.gamma[j];
            let forward: Vec<f64> = current.iter().map(|x| priors.tau * x + priors.nu).collect();
            let proposal = sample_dirichlet(&mut chain.rng, &forward);
            let reverse: Vec<f64> = proposal.iter().map(|x| priors.tau * x + priors.nu).collect();

            let log_ratio = model.group_log_likelihood(group, &proposal, gamma)
                + model.log_prior_q(&proposal)
                - model.group_log_likelihood(group, &current, gamma)
                - model.log_prior_q(&current)
                + log_dirichlet_pdf(&current, &reverse)
                - log_dirichlet_pdf(&proposal, &forward);
            let accepted = chain.rng.gen::<f64>() < accept_probability(log_ratio);
            if accepted {
                for (c, v) in proposal.into_iter().enumerate() {
                    state.q[(j, c)] = v;
                }
            }
            chain.q_moves[j].record(accepted);
        }
    }

    fn update_gamma(&mut self, members: &[Vec<usize>], t: usize) {
        let model = &self.model;
        let rate = self.config.adaptive_prop;
        let chain = &mut self.chain;
        let state = &mut chain.state;
        let lb = model.priors().lb_gamma;

        for (j, group) in members.iter().enumerate() {
            if group.is_empty() {
                state.gamma[j] = draw_gamma_prior(&mut chain.rng, model.priors());
                continue;
            }
            let q: Vec<f64> = state.q.row(j).iter().copied().collect();
            let current = state.gamma[j];
            let proposal = chain.gamma_scales[j].propose(&mut chain.rng, current);
            let accept_prob = if !(proposal.is_finite() && proposal >= lb) {
                0.0
            } else {
                let log_ratio = model.group_log_likelihood(group, &q, proposal)
                    + model.log_prior_gamma(proposal)
                    + proposal.ln()
                    - model.group_log_likelihood(group, &q, current)
                    - model.log_prior_gamma(current)
                    - current.ln();
                accept_probability(log_ratio)
            };
            let accepted = chain.rng.gen::<f64>() < accept_prob;
            if accepted {
                state.gamma[j] = proposal;
            }
            chain.gamma_scales[j].record(accept_prob, accepted, t, rate);
        }
    }

    fn update_weights(&mut self) {
        let model = &self.model;
        let chain = &mut self.chain;
        let state = &mut chain.state;
        let rng = &mut chain.rng;
        let num_animals = model.num_animals();
        let j_max = state.truncation();
        let n = state.occupancy(model.animal_of(), num_animals);

        // table counts of the franchise representation
        let mut tables = vec![0usize; j_max];
        for m in 0..num_animals {
            for (j, t_j) in tables.iter_mut().enumerate() {
                let aw = state.alpha * state.omega[j];
                for l in 0..n[(m, j)] {
                    if rng.gen::<f64>() * (aw + l as f64) < aw {
                        *t_j += 1;
                    }
                }
            }
        }

        let mut tail: usize = tables.iter().sum();
        let mut omega = vec![0.0; j_max];
        let mut remaining = 1.0;
        for k in 0..j_max - 1 {
            tail -= tables[k];
            let b = sample_beta(rng, 1.0 + tables[k] as f64, state.alpha0 + tail as f64);
            omega[k] = remaining * b;
            remaining *= 1.0 - b;
        }
        omega[j_max - 1] = remaining;
        normalize_floor(&mut omega);
        state.omega = DVector::from_vec(omega);

        for m in 0..num_animals {
            let conc: Vec<f64> = (0..j_max)
                .map(|j| state.alpha * state.omega[j] + n[(m, j)] as f64)
                .collect();
            let w = sample_dirichlet(rng, &conc);
            for (j, v) in w.into_iter().enumerate() {
                state.omega_local[(m, j)] = v;
            }
        }
    }

    fn update_concentrations(&mut self, t: usize) {
        let model = &self.model;
        let rate = self.config.adaptive_prop;
        let chain = &mut self.chain;
        let state = &mut chain.state;

        let local_target = |a: f64| {
            model.log_prior_alpha(a) + model.log_local_density(&state.omega_local, &state.omega, a) + a.ln()
        };
        let current = state.alpha;
        let proposal = chain.alpha_scale.propose(&mut chain.rng, current);
        let accept_prob = if proposal.is_finite() && proposal > 0.0 {
            accept_probability(local_target(proposal) - local_target(current))
        } else {
            0.0
        };
        let accepted = chain.rng.gen::<f64>() < accept_prob;
        if accepted {
            state.alpha = proposal;
        }
        chain.alpha_scale.record(accept_prob, accepted, t, rate);
        chain.alpha_acceptance.push(accept_prob);

        let global_target = |a: f64| model.log_prior_alpha0(a) + model.log_stick_density(&state.omega, a) + a.ln();
        let current = state.alpha0;
        let proposal = chain.alpha0_scale.propose(&mut chain.rng, current);
        let accept_prob = if proposal.is_finite() && proposal > 0.0 {
            accept_probability(global_target(proposal) - global_target(current))
        } else {
            0.0
        };
        let accepted = chain.rng.gen::<f64>() < accept_prob;
        if accepted {
            state.alpha0 = proposal;
        }
        chain.alpha0_scale.record(accept_prob, accepted, t, rate);
        chain.alpha0_acceptance.push(accept_prob);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::{separable, SeparableSpec};
    use crate::data::CountMatrixStore;
    use std::sync::Arc;

    fn dataset(seed: u64) -> (Arc<CountMatrixStore>, Partition) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let spec = SeparableSpec { neurons_per_motif: 10, ..SeparableSpec::default() };
        let (store, truth) = separable(&mut rng, &spec).unwrap();
        (Arc::new(store), truth)
    }

    fn config(number_iter: usize, burn_in: usize) -> SamplerConfig {
        SamplerConfig { number_iter, burn_in, thinning: 1, ..SamplerConfig::default() }
    }

    #[test]
    fn test_invariants_hold_every_sweep() {
        let (data, _) = dataset(1);
        let model = MixtureModel::new(data.clone(), PriorConfig::default(), 5).unwrap();
        let lb = model.priors().lb_gamma;
        let mut sampler = Sampler::new(model, config(40, 20), None).unwrap();
        for _ in 0..40 {
            sampler.sweep();
            let s = sampler.state();
            assert!(s.simplex_error() < 1e-9);
            assert_eq!(s.allocation.len(), data.num_neurons());
            for (i, &j) in s.allocation.iter().enumerate() {
                assert!(j < 5);
                assert!(s.omega_local[(data.animal_of(i), j)] > 0.0);
            }
            assert!(s.gamma.iter().all(|&g| g >= lb));
            assert!((s.omega.sum() - 1.0).abs() < 1e-9);
            for row in s.omega_local.row_iter() {
                assert!((row.sum() - 1.0).abs() < 1e-9);
            }
            assert!(s.alpha > 0.0 && s.alpha0 > 0.0);
        }
        assert_eq!(sampler.snapshots().len(), 20);
    }

    #[test]
    fn test_fixed_partition_never_moves() {
        let (data, truth) = dataset(2);
        let model = MixtureModel::fixed(data, PriorConfig::default(), truth.clone()).unwrap();
        let trace = Sampler::new(model, config(60, 20), None).unwrap().run(&CancelToken::new());
        assert_eq!(trace.len(), 40);
        for snap in trace.iter() {
            assert_eq!(snap.allocation, truth.labels);
            assert!((snap.q.row(0).sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_same_seed_same_chain() {
        let (data, _) = dataset(3);
        let run = || {
            let model = MixtureModel::new(data.clone(), PriorConfig::default(), 4).unwrap();
            Sampler::new(model, config(30, 10), None).unwrap().run(&CancelToken::new())
        };
        let a = run();
        let b = run();
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.allocation, y.allocation);
            assert_eq!(x.alpha, y.alpha);
        }
    }

    #[test]
    fn test_cancel_returns_completed_snapshots() {
        let (data, _) = dataset(4);
        let model = MixtureModel::new(data, PriorConfig::default(), 4).unwrap();
        let mut sampler = Sampler::new(model, config(100, 10), None).unwrap();
        for _ in 0..15 {
            sampler.sweep();
        }
        let token = CancelToken::new();
        token.cancel();
        let trace = sampler.run(&token);
        assert!(trace.cancelled);
        assert_eq!(trace.len(), 5);
        assert_eq!(trace.diagnostics.sweeps, 15);
        assert!(trace.iter().all(|s| s.iteration < 15));
    }

    #[test]
    fn test_resume_continues_identically() {
        let (data, _) = dataset(5);
        let build = || {
            let model = MixtureModel::new(data.clone(), PriorConfig::default(), 4).unwrap();
            Sampler::new(model, config(30, 10), None).unwrap()
        };
        let full = build().run(&CancelToken::new());

        let mut partial = build();
        for _ in 0..12 {
            partial.sweep();
        }
        let checkpoint = partial.checkpoint();
        let model = MixtureModel::new(data.clone(), PriorConfig::default(), 4).unwrap();
        let resumed = Sampler::resume(model, checkpoint).unwrap().run(&CancelToken::new());

        assert_eq!(full.len(), resumed.len());
        for (x, y) in full.iter().zip(resumed.iter()) {
            assert_eq!(x.iteration, y.iteration);
            assert_eq!(x.allocation, y.allocation);
            assert_eq!(x.gamma, y.gamma);
            assert_eq!(x.alpha0, y.alpha0);
        }
    }

    #[test]
    fn test_resume_rejects_mismatched_model() {
        let (data, _) = dataset(6);
        let model = MixtureModel::new(data.clone(), PriorConfig::default(), 4).unwrap();
        let checkpoint = Sampler::new(model, config(30, 10), None).unwrap().checkpoint();
        let other = MixtureModel::new(data, PriorConfig::default(), 6).unwrap();
        assert!(Sampler::resume(other, checkpoint).is_err());
    }

    #[test]
    fn test_resume_rejects_mode_change() {
        let (data, truth) = dataset(9);
        let fixed = MixtureModel::fixed(data.clone(), PriorConfig::default(), truth.clone()).unwrap();
        let checkpoint = Sampler::new(fixed, config(30, 10), None)
            .unwrap()
            .with_flags(UpdateFlags::post_process(true, true))
            .checkpoint();

        let free = MixtureModel::new(data.clone(), PriorConfig::default(), 3).unwrap();
        assert!(matches!(Sampler::resume(free, checkpoint.clone()), Err(MotifError::Config(_))));

        let mut shifted = truth.labels.clone();
        shifted.rotate_left(1);
        let other = MixtureModel::fixed(data.clone(), PriorConfig::default(), Partition::new(shifted)).unwrap();
        assert!(Sampler::resume(other, checkpoint.clone()).is_err());

        let same = MixtureModel::fixed(data, PriorConfig::default(), truth).unwrap();
        let resumed = Sampler::resume(same, checkpoint).unwrap();
        assert!(!resumed.flags.allocation);
    }

    #[test]
    fn test_auto_save_writes_checkpoints() {
        let (data, _) = dataset(7);
        let dir = std::env::temp_dir().join(format!("motif-autosave-{}", Uuid::new_v4()));
        let cfg = SamplerConfig {
            save_frequency: Some(5),
            checkpoint_dir: Some(dir.clone()),
            ..config(20, 10)
        };
        let model = MixtureModel::new(data, PriorConfig::default(), 3).unwrap();
        Sampler::new(model, cfg, None).unwrap().run(&CancelToken::new());
        let store = CheckpointStore::open(&dir);
        assert_eq!(store.list().len(), KEEP_CHECKPOINTS);
        let latest = store.load_latest().unwrap().unwrap();
        assert_eq!(latest.chain.iteration, 20);
        assert_eq!(latest.chain.snapshots.len(), 10);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_gamma_acceptance_is_tuned() {
        let (data, _) = dataset(8);
        let model = MixtureModel::new(data, PriorConfig::default(), 3).unwrap();
        let trace = Sampler::new(model, config(300, 100), None).unwrap().run(&CancelToken::new());
        let last = trace.snapshots.last().unwrap();
        let mut used = vec![false; 3];
        for &j in &last.allocation {
            used[j] = true;
        }
        for (j, &u) in used.iter().enumerate() {
            if u {
                let rate = trace.diagnostics.gamma_acceptance[j];
                assert!(rate > 0.05 && rate < 0.95, "motif {} acceptance {}", j, rate);
            }
        }
        assert_eq!(trace.diagnostics.alpha_acceptance.len(), 300);
    }
}
