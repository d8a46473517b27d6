//! motif-core — projection motifs from multi-animal barcode counts
//!
//! A hierarchical truncated stick-breaking mixture: shared global motif
//! weights, per-animal local weights nested under them, and a
//! Dirichlet-multinomial count model per motif. Fitted by blocked Gibbs with
//! adaptive Metropolis-Hastings steps, then summarised in two stages (free
//! sampling, then a fixed-partition refit) to sidestep label switching.

pub mod analysis;
pub mod data;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod postprocess;
pub mod predictive;
pub mod sampler;
pub mod summary;

pub use data::{CountMatrixStore, Partition};
pub use error::{MotifError, Result};
pub use model::{MixtureModel, PriorConfig, SamplerConfig};
pub use pipeline::{analyze_trace, run_pipeline, PipelineConfig, PipelineReport};
pub use sampler::{CancelToken, Sampler, Trace};
