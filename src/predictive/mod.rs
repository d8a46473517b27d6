//! Posterior predictive simulation and checks
//!
//! Replicates are drawn from fixed-partition snapshots with optional
//! dissection noise, then compared with the observed data on log2 total
//! histograms and per-region zero incidence.

mod checks;
mod simulate;

pub use checks::{
    log2_bin, multi_replicate_check, single_replicate_check, MultiReplicateCheck, PredictiveConfig,
    ReplicateStats, SingleReplicateCheck,
};
pub use simulate::{simulate_replicate, DissectionNoise, SimulatedReplicate};
