//! Posterior summaries of a free-mode trace
//!
//! - co-clustering similarity (combined and within-animal)
//! - point-estimate partition under squared co-clustering loss
//! - relabelling of clusters by projection pattern

mod point_estimate;
mod relabel;
mod similarity;
pub mod stats;

pub use point_estimate::{partition_loss, point_estimate, PointEstimate};
pub use relabel::{relabel_by_projection, MotifLabel, Relabeling, NO_REGION_LABEL};
pub use similarity::{similarity_matrix, SimilarityMatrix};
