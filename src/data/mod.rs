//! Observed data: per-animal count matrices and neuron partitions
//!
//! Neurons of all animals are concatenated in animal order into one global
//! index space `0..N`; partitions are indexed by that global order.

mod store;
mod partition;
pub mod synthetic;

pub use store::{CountMatrixStore, Neuron};
pub use partition::Partition;
