//! Posterior trace: recorded snapshots plus convergence diagnostics
//!
//! Snapshots are copies of the latent state taken after burn-in at the
//! thinning interval. Downstream stages only ever borrow a [`Trace`].

use crate::data::Partition;
use crate::model::LatentState;
use crate::summary::stats::mean;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// One recorded draw of {Z, q, γ, ω, ω_m, α, α₀}
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub iteration: usize,
    pub allocation: Vec<usize>,
    pub q: DMatrix<f64>,
    pub gamma: DVector<f64>,
    pub omega: DVector<f64>,
    pub omega_local: DMatrix<f64>,
    pub alpha: f64,
    pub alpha0: f64,
}

impl Snapshot {
    pub fn from_state(iteration: usize, state: &LatentState) -> Self {
        Self {
            iteration,
            allocation: state.allocation.clone(),
            q: state.q.clone(),
            gamma: state.gamma.clone(),
            omega: state.omega.clone(),
            omega_local: state.omega_local.clone(),
            alpha: state.alpha,
            alpha0: state.alpha0,
        }
    }

    pub fn partition(&self) -> Partition {
        Partition::new(self.allocation.clone())
    }

    pub fn num_clusters(&self) -> usize {
        let mut used = vec![false; self.gamma.len()];
        for &j in &self.allocation {
            used[j] = true;
        }
        used.iter().filter(|&&u| u).count()
    }

    /// Across-animal variance of each motif's local weight
    pub fn local_weight_variance(&self) -> Vec<f64> {
        let m = self.omega_local.nrows() as f64;
        self.omega_local
            .column_iter()
            .map(|col| {
                let mean = col.sum() / m;
                col.iter().map(|w| (w - mean).powi(2)).sum::<f64>() / m
            })
            .collect()
    }
}

/// Mixing diagnostics, surfaced as data rather than failures
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Sweeps actually completed
    pub sweeps: usize,
    /// Per-motif acceptance rate of the γ random walk
    pub gamma_acceptance: Vec<f64>,
    /// Final per-motif γ proposal sd
    pub gamma_proposal_sd: Vec<f64>,
    /// Per-motif acceptance rate of the q Dirichlet proposal
    pub q_acceptance: Vec<f64>,
    /// Acceptance probability of the α step, one entry per sweep
    pub alpha_acceptance: Vec<f64>,
    /// Acceptance probability of the α₀ step, one entry per sweep
    pub alpha0_acceptance: Vec<f64>,
    /// Occupied motifs after each sweep
    pub occupied: Vec<usize>,
}

impl Diagnostics {
    pub fn mean_alpha_acceptance(&self) -> f64 {
        mean(&self.alpha_acceptance)
    }

    pub fn mean_alpha0_acceptance(&self) -> f64 {
        mean(&self.alpha0_acceptance)
    }
}

/// The output of one chain
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trace {
    pub snapshots: Vec<Snapshot>,
    pub diagnostics: Diagnostics,
    /// True when the run stopped early on a cancel request
    pub cancelled: bool,
}

impl Trace {
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Snapshot> {
        self.snapshots.iter()
    }

    pub fn num_neurons(&self) -> Option<usize> {
        self.snapshots.first().map(|s| s.allocation.len())
    }

    pub fn truncation(&self) -> Option<usize> {
        self.snapshots.first().map(|s| s.gamma.len())
    }
}
