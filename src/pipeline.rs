//! End-to-end run: free sampling → summaries → fixed-partition refit → tests
//!
//! ```text
//! data ─▶ Sampler (free, J) ─▶ Trace ─▶ similarity ─▶ point estimate ─▶ relabel
//!                                                                         │
//!        prominence / variability / predictive ◀─ PostProcessFitter ◀─────┘
//! ```

use crate::analysis::{
    prominent_motifs, variable_motifs, ProminenceConfig, ProminenceReport, VariabilityConfig,
    VariabilityReport,
};
use crate::data::{CountMatrixStore, Partition};
use crate::error::{MotifError, Result};
use crate::model::{MixtureModel, PriorConfig, SamplerConfig};
use crate::postprocess::{PostProcessConfig, PostProcessFitter, PostProcessResult};
use crate::predictive::{multi_replicate_check, MultiReplicateCheck, PredictiveConfig};
use crate::sampler::{CancelToken, Sampler, Trace};
use crate::summary::{
    point_estimate, relabel_by_projection, similarity_matrix, PointEstimate, Relabeling, SimilarityMatrix,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Every knob of a full run, loadable from one JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Truncation level J of the free run
    pub truncation: usize,
    pub priors: PriorConfig,
    pub sampler: SamplerConfig,
    /// Largest partition the point estimate may pick
    pub max_clusters: usize,
    /// Mean projection strength a region needs to appear in a motif label
    pub relabel_threshold: f64,
    pub postprocess: PostProcessConfig,
    pub prominence: ProminenceConfig,
    /// Permutation test; skipped when absent
    pub variability: Option<VariabilityConfig>,
    /// Predictive check; skipped when absent
    pub predictive: Option<PredictiveConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            truncation: 20,
            priors: PriorConfig::default(),
            sampler: SamplerConfig::default(),
            max_clusters: 20,
            relabel_threshold: 0.1,
            postprocess: PostProcessConfig::default(),
            prominence: ProminenceConfig::default(),
            variability: Some(VariabilityConfig::default()),
            predictive: Some(PredictiveConfig::default()),
        }
    }
}

impl PipelineConfig {
    /// Short chains and few replicates for demos and smoke runs
    pub fn quick() -> Self {
        Self {
            truncation: 10,
            sampler: SamplerConfig::quick(),
            max_clusters: 10,
            postprocess: PostProcessConfig::quick(),
            variability: Some(VariabilityConfig {
                replicates: 19,
                significance: 0.1,
                ..VariabilityConfig::default()
            }),
            predictive: Some(PredictiveConfig {
                replicates: 20,
                ..PredictiveConfig::default()
            }),
            ..Self::default()
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.truncation == 0 {
            return Err(MotifError::Config("truncation level must be at least 1".into()));
        }
        if self.max_clusters == 0 {
            return Err(MotifError::Config("max_clusters must be at least 1".into()));
        }
        self.priors.validate()?;
        self.sampler.validate()?;
        self.postprocess.validate()?;
        self.prominence.validate()?;
        if let Some(v) = &self.variability {
            v.validate()?;
        }
        Ok(())
    }
}

/// All artifacts of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub run_id: String,
    pub dataset: String,
    /// Free-mode trace, diagnostics included
    pub trace: Trace,
    pub similarity: SimilarityMatrix,
    pub point_estimate: PointEstimate,
    pub relabeling: Relabeling,
    /// Refit and later stages; absent when the run was cancelled first
    pub postprocess: Option<PostProcessResult>,
    pub prominence: Option<ProminenceReport>,
    pub variability: Option<VariabilityReport>,
    pub predictive: Option<MultiReplicateCheck>,
    /// True when a cancel request cut the run short
    pub cancelled: bool,
}

impl PipelineReport {
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn num_motifs(&self) -> usize {
        self.relabeling.labels.len()
    }
}

/// Run the whole analysis on `data`, optionally starting the free chain at `seed`
pub fn run_pipeline(
    data: Arc<CountMatrixStore>,
    seed: Option<&Partition>,
    config: &PipelineConfig,
    cancel: &CancelToken,
) -> Result<PipelineReport> {
    config.validate()?;
    info!("Pipeline on {}", data.summary());

    let model = MixtureModel::new(data.clone(), config.priors.clone(), config.truncation)?;
    let sampler = Sampler::new(model, config.sampler.clone(), seed)?;
    let run_id = sampler.run_id().to_string();
    let trace = sampler.run(cancel);
    analyze_trace(data, run_id, &trace, config, cancel)
}

/// Every stage after free sampling, for a trace from a fresh or resumed chain
pub fn analyze_trace(
    data: Arc<CountMatrixStore>,
    run_id: String,
    trace: &Trace,
    config: &PipelineConfig,
    cancel: &CancelToken,
) -> Result<PipelineReport> {
    config.validate()?;
    if trace.is_empty() {
        return Err(MotifError::EmptyTrace);
    }
    let similarity = similarity_matrix(trace, &data)?;
    let estimate = point_estimate(trace, &similarity, config.max_clusters)?;
    let relabeling = relabel_by_projection(&estimate.partition, &data, config.relabel_threshold)?;
    for label in &relabeling.labels {
        info!("Motif {}: {} ({} neurons)", label.motif, label.label, label.size);
    }

    let mut report = PipelineReport {
        run_id,
        dataset: data.summary(),
        trace: trace.clone(),
        similarity,
        point_estimate: estimate,
        relabeling,
        postprocess: None,
        prominence: None,
        variability: None,
        predictive: None,
        cancelled: trace.cancelled,
    };
    if report.cancelled || cancel.is_cancelled() {
        warn!(
            "Run {} cancelled; reporting free-chain summaries of {} snapshots only",
            report.run_id,
            trace.len()
        );
        report.cancelled = true;
        return Ok(report);
    }

    let fitter = PostProcessFitter::new(config.priors.clone(), config.postprocess.clone())?;
    let post = match fitter.fit(data.clone(), &report.relabeling.partition, cancel) {
        Ok(post) if !post.trace.cancelled => post,
        // a refit cancelled before burn-in has no snapshots to summarise
        Ok(_) | Err(MotifError::EmptyTrace) if cancel.is_cancelled() => {
            warn!("Run {} cancelled during the refit", report.run_id);
            report.cancelled = true;
            return Ok(report);
        }
        Ok(post) => post,
        Err(e) => return Err(e),
    };
    let prominence = prominent_motifs(&post.trace, data.num_neurons(), &config.prominence)?;

    if let Some(v) = &config.variability {
        let result = variable_motifs(&fitter, &data, &post.partition, &post.trace, v, cancel)?;
        report.cancelled |= result.cancelled;
        report.variability = Some(result);
    }
    if let (Some(p), false) = (&config.predictive, report.cancelled) {
        let result = multi_replicate_check(&data, &post.trace, &post.partition, p, cancel)?;
        report.cancelled |= result.cancelled;
        report.predictive = Some(result);
    }

    info!(
        "Pipeline {} done: {} motifs, prominent {:?}",
        report.run_id,
        report.relabeling.labels.len(),
        prominence.prominent
    );
    report.postprocess = Some(post);
    report.prominence = Some(prominence);
    Ok(report)
}
