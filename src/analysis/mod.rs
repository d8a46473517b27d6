//! Motif-level tests over a fixed-partition posterior
//!
//! - prominent: global weight above a threshold with high probability
//! - variable: across-animal spread of local weights beyond a permutation null

mod prominent;
mod variable;

pub use prominent::{prominent_motifs, MotifProminence, ProminenceConfig, ProminenceReport};
pub use variable::{
    permute_animals, variable_motifs, variance_statistic, MotifVariability, VariabilityConfig,
    VariabilityReport,
};
