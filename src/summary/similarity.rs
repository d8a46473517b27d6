//! Posterior co-clustering similarity
//!
//! Entry (i, i') is the fraction of snapshots in which neurons i and i'
//! share a motif. Each snapshot only touches within-motif pairs, so the cost
//! is Σ_j n_j² per snapshot instead of N².

use crate::data::CountMatrixStore;
use crate::error::{MotifError, Result};
use crate::sampler::Trace;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Combined N×N similarity plus one block per animal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityMatrix {
    pub combined: DMatrix<f64>,
    /// `within[m]` is the block of animal m's neurons, in local order
    pub within: Vec<DMatrix<f64>>,
    pub snapshots: usize,
}

impl SimilarityMatrix {
    pub fn len(&self) -> usize {
        self.combined.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.combined.is_empty()
    }

    pub fn get(&self, i: usize, k: usize) -> f64 {
        self.combined[(i, k)]
    }

    /// Largest |s(i,k) − s(k,i)|
    pub fn asymmetry(&self) -> f64 {
        let n = self.len();
        let mut worst: f64 = 0.0;
        for i in 0..n {
            for k in (i + 1)..n {
                worst = worst.max((self.combined[(i, k)] - self.combined[(k, i)]).abs());
            }
        }
        worst
    }
}

/// Build the similarity matrix of `trace` over the neurons of `data`
pub fn similarity_matrix(trace: &Trace, data: &CountMatrixStore) -> Result<SimilarityMatrix> {
    if trace.is_empty() {
        return Err(MotifError::EmptyTrace);
    }
    let n = data.num_neurons();
    if let Some(len) = trace.num_neurons().filter(|&len| len != n) {
        return Err(MotifError::Data(format!(
            "trace allocates {} neurons, dataset has {}",
            len, n
        )));
    }

    let mut counts: DMatrix<u32> = DMatrix::zeros(n, n);
    for snap in trace.iter() {
        for group in snap.partition().members() {
            for &a in &group {
                for &b in &group {
                    counts[(a, b)] += 1;
                }
            }
        }
    }

    let total = trace.len() as f64;
    let combined = counts.map(|c| c as f64 / total);
    let within = (0..data.num_animals())
        .map(|m| {
            let range = data.animal_range(m);
            combined
                .view((range.start, range.start), (range.len(), range.len()))
                .into_owned()
        })
        .collect();

    Ok(SimilarityMatrix {
        combined,
        within,
        snapshots: trace.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::Snapshot;
    use nalgebra::DVector;

    fn snapshot(allocation: Vec<usize>) -> Snapshot {
        Snapshot {
            iteration: 0,
            allocation,
            q: DMatrix::from_element(3, 2, 0.5),
            gamma: DVector::from_element(3, 0.1),
            omega: DVector::from_element(3, 1.0 / 3.0),
            omega_local: DMatrix::from_element(2, 3, 1.0 / 3.0),
            alpha: 1.0,
            alpha0: 1.0,
        }
    }

    fn data() -> CountMatrixStore {
        CountMatrixStore::from_rows(
            vec!["A".into(), "B".into()],
            vec![
                vec![vec![5, 0], vec![4, 1]],
                vec![vec![0, 6], vec![1, 7]],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_similarity_counts_shared_motifs() {
        let trace = Trace {
            snapshots: vec![
                snapshot(vec![0, 0, 1, 1]),
                snapshot(vec![0, 1, 1, 1]),
                snapshot(vec![2, 2, 2, 0]),
                snapshot(vec![0, 0, 1, 1]),
            ],
            ..Trace::default()
        };
        let sim = similarity_matrix(&trace, &data()).unwrap();
        assert_eq!(sim.len(), 4);
        assert_eq!(sim.snapshots, 4);
        for i in 0..4 {
            assert_eq!(sim.get(i, i), 1.0);
        }
        assert!((sim.get(0, 1) - 0.75).abs() < 1e-12);
        assert!((sim.get(2, 3) - 0.75).abs() < 1e-12);
        assert!((sim.get(1, 2) - 0.5).abs() < 1e-12);
        assert_eq!(sim.asymmetry(), 0.0);

        assert_eq!(sim.within.len(), 2);
        assert!((sim.within[1][(0, 1)] - 0.75).abs() < 1e-12);
        assert!((sim.within[0][(1, 0)] - sim.get(1, 0)).abs() < 1e-12);
    }

    #[test]
    fn test_empty_trace_is_error() {
        assert!(matches!(
            similarity_matrix(&Trace::default(), &data()),
            Err(MotifError::EmptyTrace)
        ));
    }

    #[test]
    fn test_size_mismatch_is_error() {
        let trace = Trace {
            snapshots: vec![snapshot(vec![0, 0, 1])],
            ..Trace::default()
        };
        assert!(matches!(similarity_matrix(&trace, &data()), Err(MotifError::Data(_))));
    }
}
