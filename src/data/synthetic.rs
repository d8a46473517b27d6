//! Synthetic datasets with clearly separated projection motifs
//!
//! Motif k projects mostly to regions `2k` and `2k+1`, with a small share of
//! reads scattered over the rest. Used by the demo command, the benchmark
//! and the end-to-end tests.

use super::{CountMatrixStore, Partition};
use crate::error::Result;
use crate::model::dist::sample_multinomial;
use nalgebra::DMatrix;
use rand::Rng;

/// Shape of a separable dataset
#[derive(Debug, Clone)]
pub struct SeparableSpec {
    pub motifs: usize,
    pub animals: usize,
    /// Neurons per motif per animal
    pub neurons_per_motif: usize,
    pub min_total: u32,
    pub max_total: u32,
    /// Share of reads outside the motif's two target regions
    pub background: f64,
}

impl Default for SeparableSpec {
    fn default() -> Self {
        Self {
            motifs: 3,
            animals: 2,
            neurons_per_motif: 30,
            min_total: 20,
            max_total: 80,
            background: 0.04,
        }
    }
}

/// Generate a dataset and its true partition (global neuron order)
pub fn separable<R: Rng + ?Sized>(rng: &mut R, spec: &SeparableSpec) -> Result<(CountMatrixStore, Partition)> {
    let r = 2 * spec.motifs;
    let regions: Vec<String> = (0..r).map(|i| format!("region_{}", i)).collect();
    let mut mats = Vec::with_capacity(spec.animals);
    let mut labels = Vec::new();

    for _ in 0..spec.animals {
        let n = spec.motifs * spec.neurons_per_motif;
        let mut flat = Vec::with_capacity(n * r);
        for k in 0..spec.motifs {
            let mut p = vec![spec.background / (r - 2).max(1) as f64; r];
            p[2 * k] = (1.0 - spec.background) / 2.0;
            p[2 * k + 1] = (1.0 - spec.background) / 2.0;
            for _ in 0..spec.neurons_per_motif {
                let total = rng.gen_range(spec.min_total..=spec.max_total);
                flat.extend(sample_multinomial(rng, total, &p));
                labels.push(k);
            }
        }
        mats.push(DMatrix::from_row_slice(n, r, &flat));
    }
    let store = CountMatrixStore::new(regions, mats)?;
    Ok((store, Partition::new(labels)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_separable_shape() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let (store, truth) = separable(&mut rng, &SeparableSpec::default()).unwrap();
        assert_eq!(store.num_animals(), 2);
        assert_eq!(store.num_neurons(), 180);
        assert_eq!(store.num_regions(), 6);
        assert_eq!(truth.num_clusters(), 3);
        // a motif-1 neuron reads mostly from regions 2 and 3
        let i = store.animal_range(1).start + 30;
        assert_eq!(truth.labels[i], 1);
        let c = store.counts(i);
        assert!(c[2] + c[3] > c[0] + c[1] + c[4] + c[5]);
    }
}
