//! MCMC over the hierarchical mixture
//!
//! - [`Sampler`] runs one chain of blocked Gibbs / adaptive MH sweeps
//! - [`Trace`] holds the recorded snapshots and mixing diagnostics
//! - [`CheckpointStore`] persists resumable chain state with checksums
//! - [`CancelToken`] stops a long run between sweeps

mod adaptive;
mod cancel;
mod checkpoint;
mod mcmc;
mod trace;

pub use adaptive::{accept_probability, AcceptanceCounter, AdaptiveScale, TARGET_ACCEPTANCE};
pub use cancel::CancelToken;
pub use checkpoint::{Checkpoint, CheckpointManifest, CheckpointMeta, CheckpointStore};
pub use mcmc::{ChainState, Sampler, UpdateFlags};
pub use trace::{Diagnostics, Snapshot, Trace};
