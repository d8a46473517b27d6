//! CountMatrixStore — per-animal neuron × region barcode count matrices
//!
//! Each animal contributes a `DMatrix<u32>` (rows = neurons, columns = target
//! regions). The store also keeps a flattened view of every neuron with the
//! quantities the likelihood needs on every sweep (total count and the log
//! multinomial coefficient), so they are computed once at load time.

use crate::error::{MotifError, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;
use std::ops::Range;
use std::path::Path;

/// A single neuron in the global (concatenated) order
#[derive(Debug, Clone, PartialEq)]
pub struct Neuron {
    pub animal: usize,
    pub counts: Vec<u32>,
    pub total: u32,
    /// log(n! / Π y_r!)
    pub log_coeff: f64,
}

impl Neuron {
    fn new(animal: usize, counts: Vec<u32>) -> Self {
        let total: u32 = counts.iter().sum();
        let log_coeff = ln_gamma(total as f64 + 1.0)
            - counts.iter().map(|&y| ln_gamma(y as f64 + 1.0)).sum::<f64>();
        Self { animal, counts, total, log_coeff }
    }
}

/// On-disk layout: `{ "regions": [...], "animals": [[[count; R]; C_m]; M] }`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredDataset {
    regions: Vec<String>,
    animals: Vec<Vec<Vec<u32>>>,
}

/// Immutable store of all animals' count matrices
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "StoredDataset", into = "StoredDataset")]
pub struct CountMatrixStore {
    regions: Vec<String>,
    animals: Vec<DMatrix<u32>>,
    /// Cumulative neuron offsets, length M + 1
    offsets: Vec<usize>,
    neurons: Vec<Neuron>,
}

impl CountMatrixStore {
    /// Build a store, validating that every matrix has one column per region
    pub fn new(regions: Vec<String>, animals: Vec<DMatrix<u32>>) -> Result<Self> {
        if regions.is_empty() {
            return Err(MotifError::Data("at least one target region is required".into()));
        }
        if animals.is_empty() {
            return Err(MotifError::Data("at least one animal is required".into()));
        }
        let r = regions.len();
        let mut offsets = Vec::with_capacity(animals.len() + 1);
        let mut neurons = Vec::new();
        offsets.push(0);
        for (m, mat) in animals.iter().enumerate() {
            if mat.ncols() != r {
                return Err(MotifError::Data(format!(
                    "animal {} has {} columns, expected {} regions",
                    m,
                    mat.ncols(),
                    r
                )));
            }
            for row in 0..mat.nrows() {
                let counts: Vec<u32> = mat.row(row).iter().copied().collect();
                neurons.push(Neuron::new(m, counts));
            }
            offsets.push(neurons.len());
        }
        if neurons.is_empty() {
            return Err(MotifError::Data("dataset contains no neurons".into()));
        }
        Ok(Self { regions, animals, offsets, neurons })
    }

    /// Build from nested row vectors (one `Vec<Vec<u32>>` per animal)
    pub fn from_rows(regions: Vec<String>, animals: Vec<Vec<Vec<u32>>>) -> Result<Self> {
        let r = regions.len();
        let mut mats = Vec::with_capacity(animals.len());
        for (m, rows) in animals.into_iter().enumerate() {
            if let Some(bad) = rows.iter().position(|row| row.len() != r) {
                return Err(MotifError::Data(format!(
                    "animal {} neuron {} has {} counts, expected {}",
                    m,
                    bad,
                    rows[bad].len(),
                    r
                )));
            }
            let n = rows.len();
            let flat: Vec<u32> = rows.into_iter().flatten().collect();
            mats.push(DMatrix::from_row_slice(n, r, &flat));
        }
        Self::new(regions, mats)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a dataset from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Save the dataset as JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn regions(&self) -> &[String] {
        &self.regions
    }

    pub fn num_regions(&self) -> usize {
        self.regions.len()
    }

    pub fn num_animals(&self) -> usize {
        self.animals.len()
    }

    pub fn num_neurons(&self) -> usize {
        self.neurons.len()
    }

    pub fn neurons_in(&self, animal: usize) -> usize {
        self.offsets[animal + 1] - self.offsets[animal]
    }

    /// Global neuron indices belonging to an animal
    pub fn animal_range(&self, animal: usize) -> Range<usize> {
        self.offsets[animal]..self.offsets[animal + 1]
    }

    pub fn animal_matrix(&self, animal: usize) -> &DMatrix<u32> {
        &self.animals[animal]
    }

    pub fn animal_of(&self, neuron: usize) -> usize {
        self.neurons[neuron].animal
    }

    pub fn neuron(&self, neuron: usize) -> &Neuron {
        &self.neurons[neuron]
    }

    pub fn neurons(&self) -> &[Neuron] {
        &self.neurons
    }

    pub fn counts(&self, neuron: usize) -> &[u32] {
        &self.neurons[neuron].counts
    }

    pub fn total(&self, neuron: usize) -> u32 {
        self.neurons[neuron].total
    }

    /// Per-animal neuron counts, in animal order
    pub fn animal_sizes(&self) -> Vec<usize> {
        (0..self.num_animals()).map(|m| self.neurons_in(m)).collect()
    }

    /// Row-normalised projection strengths; all zeros for a zero-total neuron
    pub fn proportions(&self, neuron: usize) -> Vec<f64> {
        let n = &self.neurons[neuron];
        if n.total == 0 {
            return vec![0.0; n.counts.len()];
        }
        let total = n.total as f64;
        n.counts.iter().map(|&y| y as f64 / total).collect()
    }

    /// Rebuild the store with neuron `k` taken from old neuron `perm[k]`,
    /// keeping each animal's neuron count. Used to shuffle animal labels.
    pub fn permuted(&self, perm: &[usize]) -> Result<Self> {
        if perm.len() != self.num_neurons() {
            return Err(MotifError::Data(format!(
                "permutation has length {}, expected {}",
                perm.len(),
                self.num_neurons()
            )));
        }
        let r = self.num_regions();
        let mut mats = Vec::with_capacity(self.num_animals());
        for m in 0..self.num_animals() {
            let range = self.animal_range(m);
            let mut flat = Vec::with_capacity(range.len() * r);
            for k in range.clone() {
                flat.extend_from_slice(self.counts(perm[k]));
            }
            mats.push(DMatrix::from_row_slice(range.len(), r, &flat));
        }
        Self::new(self.regions.clone(), mats)
    }

    pub fn summary(&self) -> String {
        format!(
            "CountMatrixStore | {} animals | {} neurons | {} regions | sizes={:?}",
            self.num_animals(),
            self.num_neurons(),
            self.num_regions(),
            self.animal_sizes()
        )
    }
}

impl TryFrom<StoredDataset> for CountMatrixStore {
    type Error = MotifError;

    fn try_from(raw: StoredDataset) -> Result<Self> {
        Self::from_rows(raw.regions, raw.animals)
    }
}

impl From<CountMatrixStore> for StoredDataset {
    fn from(store: CountMatrixStore) -> Self {
        let animals = store
            .animals
            .iter()
            .map(|mat| {
                (0..mat.nrows())
                    .map(|row| mat.row(row).iter().copied().collect())
                    .collect()
            })
            .collect();
        Self { regions: store.regions, animals }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regions(r: usize) -> Vec<String> {
        (0..r).map(|i| format!("R{}", i)).collect()
    }

    fn small_store() -> CountMatrixStore {
        CountMatrixStore::from_rows(
            regions(3),
            vec![
                vec![vec![5, 0, 1], vec![0, 0, 0]],
                vec![vec![2, 2, 2], vec![0, 9, 1], vec![1, 0, 0]],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_dimensions_and_offsets() {
        let store = small_store();
        assert_eq!(store.num_animals(), 2);
        assert_eq!(store.num_neurons(), 5);
        assert_eq!(store.num_regions(), 3);
        assert_eq!(store.animal_range(1), 2..5);
        assert_eq!(store.animal_of(3), 1);
        assert_eq!(store.total(0), 6);
        assert_eq!(store.counts(3), &[0, 9, 1]);
    }

    #[test]
    fn test_zero_total_neuron() {
        let store = small_store();
        assert_eq!(store.total(1), 0);
        assert_eq!(store.proportions(1), vec![0.0, 0.0, 0.0]);
        assert!(store.neuron(1).log_coeff.abs() < 1e-12);
    }

    #[test]
    fn test_log_coeff() {
        let store = small_store();
        // 6! / (5! 0! 1!) = 6
        assert!((store.neuron(0).log_coeff - 6f64.ln()).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_ragged_rows() {
        let res = CountMatrixStore::from_rows(regions(3), vec![vec![vec![1, 2]]]);
        assert!(matches!(res, Err(MotifError::Data(_))));
    }

    #[test]
    fn test_rejects_empty() {
        assert!(CountMatrixStore::from_rows(regions(3), vec![]).is_err());
        assert!(CountMatrixStore::from_rows(vec![], vec![vec![vec![]]]).is_err());
    }

    #[test]
    fn test_permuted_keeps_sizes() {
        let store = small_store();
        let perm = vec![4, 3, 2, 1, 0];
        let shuffled = store.permuted(&perm).unwrap();
        assert_eq!(shuffled.animal_sizes(), store.animal_sizes());
        assert_eq!(shuffled.counts(0), store.counts(4));
        assert_eq!(shuffled.animal_of(0), 0);
        assert_eq!(shuffled.counts(4), store.counts(0));
    }

    #[test]
    fn test_json_roundtrip() {
        let store = small_store();
        let json = serde_json::to_string(&store).unwrap();
        let back = CountMatrixStore::from_json_str(&json).unwrap();
        assert_eq!(back.num_neurons(), store.num_neurons());
        assert_eq!(back.neurons(), store.neurons());
    }
}
