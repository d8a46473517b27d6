//! Hierarchical stick-breaking mixture of Dirichlet-multinomial motifs
//!
//! Global motif weights are shared across animals, local weights perturb
//! them per animal, and each motif is a distribution over target regions
//! with its own over-dispersion.

mod config;
pub mod dist;
mod likelihood;
mod mixture;
mod state;

pub use config::{PriorConfig, SamplerConfig};
pub use likelihood::{dirmult_log_pmf, group_log_likelihood};
pub use mixture::{FitMode, MixtureModel};
pub use state::LatentState;
