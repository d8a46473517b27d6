//! Point estimate of the partition under squared co-clustering loss
//!
//! `L(z) = Σ_{i<k} (1[z_i = z_k] − s_ik)²`. Expanding the square gives
//! `L(z) = C + Σ_{i<k, z_i = z_k} (1 − 2 s_ik)` with `C = Σ_{i<k} s_ik²`,
//! so each candidate only costs its within-cluster pairs. The candidates are
//! the trace snapshots themselves.

use super::similarity::SimilarityMatrix;
use crate::data::Partition;
use crate::error::{MotifError, Result};
use crate::sampler::Trace;
use log::info;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointEstimate {
    /// Winning partition, labels compacted to `0..K`
    pub partition: Partition,
    pub loss: f64,
    /// Index of the winning snapshot in the trace
    pub snapshot: usize,
    pub num_clusters: usize,
    /// Snapshots that satisfied the cluster bound
    pub candidates: usize,
}

fn constant_term(similarity: &SimilarityMatrix) -> f64 {
    let n = similarity.len();
    let mut c = 0.0;
    for i in 0..n {
        for k in (i + 1)..n {
            c += similarity.get(i, k).powi(2);
        }
    }
    c
}

fn within_term(partition: &Partition, similarity: &SimilarityMatrix) -> f64 {
    partition
        .members()
        .iter()
        .map(|group| {
            let mut acc = 0.0;
            for (x, &i) in group.iter().enumerate() {
                for &k in &group[x + 1..] {
                    acc += 1.0 - 2.0 * similarity.get(i, k);
                }
            }
            acc
        })
        .sum()
}

/// Squared co-clustering loss of one partition
pub fn partition_loss(partition: &Partition, similarity: &SimilarityMatrix) -> f64 {
    constant_term(similarity) + within_term(partition, similarity)
}

/// Pick the snapshot with at most `max_clusters` clusters that minimises the loss
pub fn point_estimate(trace: &Trace, similarity: &SimilarityMatrix, max_clusters: usize) -> Result<PointEstimate> {
    if trace.is_empty() {
        return Err(MotifError::EmptyTrace);
    }
    if trace.num_neurons() != Some(similarity.len()) {
        return Err(MotifError::Data(format!(
            "similarity matrix covers {} neurons, trace allocates {:?}",
            similarity.len(),
            trace.num_neurons()
        )));
    }

    let constant = constant_term(similarity);
    let mut best: Option<(usize, f64, Partition)> = None;
    let mut candidates = 0;
    for (idx, snap) in trace.iter().enumerate() {
        if snap.num_clusters() > max_clusters {
            continue;
        }
        candidates += 1;
        let partition = snap.partition();
        let loss = constant + within_term(&partition, similarity);
        if best.as_ref().map_or(true, |(_, l, _)| loss < *l) {
            best = Some((idx, loss, partition));
        }
    }

    let (snapshot, loss, partition) = best.ok_or(MotifError::NoCandidate(max_clusters))?;
    let partition = partition.compacted();
    let num_clusters = partition.num_clusters();
    info!(
        "Point estimate: snapshot {} of {} ({} candidates), {} clusters, loss {:.3}",
        snapshot,
        trace.len(),
        candidates,
        num_clusters,
        loss
    );
    Ok(PointEstimate {
        partition,
        loss,
        snapshot,
        num_clusters,
        candidates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CountMatrixStore;
    use crate::sampler::Snapshot;
    use crate::summary::similarity_matrix;
    use nalgebra::{DMatrix, DVector};

    fn snapshot(allocation: Vec<usize>) -> Snapshot {
        Snapshot {
            iteration: 0,
            allocation,
            q: DMatrix::from_element(4, 2, 0.5),
            gamma: DVector::from_element(4, 0.1),
            omega: DVector::from_element(4, 0.25),
            omega_local: DMatrix::from_element(1, 4, 0.25),
            alpha: 1.0,
            alpha0: 1.0,
        }
    }

    fn data() -> CountMatrixStore {
        CountMatrixStore::from_rows(
            vec!["A".into(), "B".into()],
            vec![vec![vec![5, 0], vec![4, 1], vec![0, 6], vec![1, 7]]],
        )
        .unwrap()
    }

    #[test]
    fn test_majority_partition_wins() {
        let trace = Trace {
            snapshots: vec![
                snapshot(vec![3, 3, 1, 1]),
                snapshot(vec![0, 0, 0, 0]),
                snapshot(vec![0, 0, 2, 2]),
                snapshot(vec![1, 1, 0, 0]),
                snapshot(vec![0, 1, 2, 3]),
            ],
            ..Trace::default()
        };
        let sim = similarity_matrix(&trace, &data()).unwrap();
        let est = point_estimate(&trace, &sim, 4).unwrap();
        assert_eq!(est.partition.labels, vec![0, 0, 1, 1]);
        assert_eq!(est.snapshot, 0);
        assert_eq!(est.num_clusters, 2);
        assert_eq!(est.candidates, 5);
        assert!((est.loss - partition_loss(&est.partition, &sim)).abs() < 1e-12);
    }

    #[test]
    fn test_cluster_bound_filters_candidates() {
        let trace = Trace {
            snapshots: vec![snapshot(vec![0, 1, 2, 3]), snapshot(vec![0, 0, 0, 0])],
            ..Trace::default()
        };
        let sim = similarity_matrix(&trace, &data()).unwrap();
        let est = point_estimate(&trace, &sim, 1).unwrap();
        assert_eq!(est.num_clusters, 1);
        assert_eq!(est.snapshot, 1);

        let trace = Trace {
            snapshots: vec![snapshot(vec![0, 1, 2, 3])],
            ..Trace::default()
        };
        let sim = similarity_matrix(&trace, &data()).unwrap();
        assert!(matches!(point_estimate(&trace, &sim, 2), Err(MotifError::NoCandidate(2))));
    }

    #[test]
    fn test_loss_expansion_matches_direct_sum() {
        let trace = Trace {
            snapshots: vec![snapshot(vec![0, 0, 1, 1]), snapshot(vec![0, 1, 1, 1])],
            ..Trace::default()
        };
        let sim = similarity_matrix(&trace, &data()).unwrap();
        let z = Partition::new(vec![0, 1, 1, 0]);
        let mut direct = 0.0;
        for i in 0..4 {
            for k in (i + 1)..4 {
                let same = if z.labels[i] == z.labels[k] { 1.0 } else { 0.0 };
                direct += (same - sim.get(i, k)).powi(2);
            }
        }
        assert!((partition_loss(&z, &sim) - direct).abs() < 1e-12);
    }
}
