//! Partition — one motif label per neuron in global order

use crate::error::{MotifError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Assignment of every neuron to a cluster index (0-based)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub labels: Vec<usize>,
}

impl Partition {
    pub fn new(labels: Vec<usize>) -> Self {
        Self { labels }
    }

    /// Accept an externally produced 1-based seed (e.g. from k-means)
    pub fn from_one_based(labels: &[usize]) -> Result<Self> {
        if let Some(pos) = labels.iter().position(|&l| l == 0) {
            return Err(MotifError::Partition(format!(
                "1-based label expected, found 0 at neuron {}",
                pos
            )));
        }
        Ok(Self::new(labels.iter().map(|&l| l - 1).collect()))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Check the partition covers `n` neurons with labels below `truncation`
    pub fn validate(&self, n: usize, truncation: usize) -> Result<()> {
        if self.labels.len() != n {
            return Err(MotifError::Partition(format!(
                "partition covers {} neurons, dataset has {}",
                self.labels.len(),
                n
            )));
        }
        let k = self.num_clusters();
        if k > truncation {
            return Err(MotifError::Config(format!(
                "truncation level {} is smaller than the {} distinct seed clusters",
                truncation, k
            )));
        }
        if let Some(pos) = self.labels.iter().position(|&l| l >= truncation) {
            return Err(MotifError::Partition(format!(
                "neuron {} has label {} outside 0..{}",
                pos, self.labels[pos], truncation
            )));
        }
        Ok(())
    }

    /// Number of distinct labels in use
    pub fn num_clusters(&self) -> usize {
        let mut seen: Vec<usize> = self.labels.clone();
        seen.sort_unstable();
        seen.dedup();
        seen.len()
    }

    /// Sizes indexed by label, up to the largest label present
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let max = self.labels.iter().copied().max().map_or(0, |m| m + 1);
        let mut sizes = vec![0; max];
        for &l in &self.labels {
            sizes[l] += 1;
        }
        sizes
    }

    /// Neuron indices grouped by label, up to the largest label present
    pub fn members(&self) -> Vec<Vec<usize>> {
        let max = self.labels.iter().copied().max().map_or(0, |m| m + 1);
        let mut groups = vec![Vec::new(); max];
        for (i, &l) in self.labels.iter().enumerate() {
            groups[l].push(i);
        }
        groups
    }

    /// Renumber labels to `0..K` in order of first appearance
    pub fn compacted(&self) -> Self {
        let mut map: HashMap<usize, usize> = HashMap::new();
        let labels = self
            .labels
            .iter()
            .map(|&l| {
                let next = map.len();
                *map.entry(l).or_insert(next)
            })
            .collect();
        Self { labels }
    }

    /// Renumber labels to `0..K` keeping their relative order
    pub fn squeezed(&self) -> Self {
        let mut distinct = self.labels.clone();
        distinct.sort_unstable();
        distinct.dedup();
        Self {
            labels: self
                .labels
                .iter()
                .map(|l| distinct.binary_search(l).unwrap_or(0))
                .collect(),
        }
    }

    /// Apply a label renaming `old -> mapping[old]`
    pub fn relabeled(&self, mapping: &[usize]) -> Self {
        Self {
            labels: self.labels.iter().map(|&l| mapping[l]).collect(),
        }
    }

    /// Reorder neurons so new neuron `k` carries old neuron `perm[k]`'s label
    pub fn permuted(&self, perm: &[usize]) -> Self {
        Self {
            labels: perm.iter().map(|&p| self.labels[p]).collect(),
        }
    }
}
