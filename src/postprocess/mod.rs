//! Fixed-partition post-processing of a point-estimate partition

mod fitter;

pub use fitter::{PostProcessConfig, PostProcessFitter, PostProcessResult, PosteriorSummary};
