//! Relabel clusters by their empirical projection pattern
//!
//! Every cluster gets the mean row-normalised projection strength of its
//! projecting neurons. Clusters are ordered by dominant region, then by how
//! many regions pass the threshold, then by dominant strength (strongest
//! first), then by smallest member, and renamed `0..K` in that order. The
//! order only depends on the member sets, so relabelling is idempotent.

use crate::data::{CountMatrixStore, Partition};
use crate::error::{MotifError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Label text for a cluster with no region above the threshold
pub const NO_REGION_LABEL: &str = "none";

/// Description of one relabelled cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotifLabel {
    /// New cluster index
    pub motif: usize,
    /// Region names above the threshold joined by `+`, or `none`
    pub label: String,
    /// Region indices above the threshold, ascending
    pub regions: Vec<usize>,
    pub dominant_region: Option<usize>,
    pub dominant_strength: f64,
    pub mean_strength: Vec<f64>,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relabeling {
    pub partition: Partition,
    /// One entry per new cluster index
    pub labels: Vec<MotifLabel>,
    /// `mapping[old]` is the new index of input cluster `old` (absent labels map to `usize::MAX`)
    pub mapping: Vec<usize>,
}

impl Relabeling {
    pub fn label_set(&self) -> Vec<String> {
        self.labels.iter().map(|l| l.label.clone()).collect()
    }
}

struct ClusterProfile {
    old: usize,
    members: Vec<usize>,
    mean_strength: Vec<f64>,
    regions: Vec<usize>,
    dominant: Option<(usize, f64)>,
}

impl ClusterProfile {
    fn order(&self, other: &Self) -> Ordering {
        let dominant_idx = |c: &Self| c.dominant.map_or(usize::MAX, |(r, _)| r);
        let dominant_val = |c: &Self| c.dominant.map_or(0.0, |(_, v)| v);
        dominant_idx(self)
            .cmp(&dominant_idx(other))
            .then(self.regions.len().cmp(&other.regions.len()))
            .then(dominant_val(other).total_cmp(&dominant_val(self)))
            .then(self.members.first().cmp(&other.members.first()))
    }
}

fn profile(old: usize, members: Vec<usize>, data: &CountMatrixStore, threshold: f64) -> ClusterProfile {
    let r = data.num_regions();
    let mut acc = vec![0.0; r];
    let mut used = 0usize;
    for &i in &members {
        if data.total(i) == 0 {
            continue;
        }
        for (a, p) in acc.iter_mut().zip(data.proportions(i)) {
            *a += p;
        }
        used += 1;
    }
    if used > 0 {
        for a in acc.iter_mut() {
            *a /= used as f64;
        }
    }
    let dominant = acc
        .iter()
        .copied()
        .enumerate()
        .filter(|&(_, v)| v > 0.0)
        .fold(None, |best: Option<(usize, f64)>, (k, v)| match best {
            Some((_, bv)) if bv >= v => best,
            _ => Some((k, v)),
        });
    let regions = (0..r).filter(|&k| acc[k] > threshold).collect();
    ClusterProfile {
        old,
        members,
        mean_strength: acc,
        regions,
        dominant,
    }
}

/// Rename the clusters of `partition` by projection pattern
pub fn relabel_by_projection(partition: &Partition, data: &CountMatrixStore, threshold: f64) -> Result<Relabeling> {
    if !(threshold.is_finite() && threshold >= 0.0) {
        return Err(MotifError::Config(format!(
            "relabel threshold must be a nonnegative number, got {}",
            threshold
        )));
    }
    let n = data.num_neurons();
    if partition.len() != n {
        return Err(MotifError::Partition(format!(
            "partition covers {} neurons, dataset has {}",
            partition.len(),
            n
        )));
    }

    let mut clusters: Vec<ClusterProfile> = partition
        .members()
        .into_iter()
        .enumerate()
        .filter(|(_, members)| !members.is_empty())
        .map(|(old, members)| profile(old, members, data, threshold))
        .collect();
    clusters.sort_by(|a, b| a.order(b));

    let width = partition.labels.iter().copied().max().map_or(0, |m| m + 1);
    let mut mapping = vec![usize::MAX; width];
    for (new, c) in clusters.iter().enumerate() {
        mapping[c.old] = new;
    }

    let names = data.regions();
    let labels = clusters
        .into_iter()
        .enumerate()
        .map(|(new, c)| {
            let label = if c.regions.is_empty() {
                NO_REGION_LABEL.to_string()
            } else {
                c.regions.iter().map(|&k| names[k].as_str()).collect::<Vec<_>>().join("+")
            };
            MotifLabel {
                motif: new,
                label,
                dominant_region: c.dominant.map(|(k, _)| k),
                dominant_strength: c.dominant.map_or(0.0, |(_, v)| v),
                regions: c.regions,
                mean_strength: c.mean_strength,
                size: c.members.len(),
            }
        })
        .collect();

    Ok(Relabeling {
        partition: partition.relabeled(&mapping),
        labels,
        mapping,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> CountMatrixStore {
        CountMatrixStore::from_rows(
            vec!["VIS".into(), "AUD".into(), "STR".into()],
            vec![
                vec![
                    vec![0, 0, 10],  // 0: STR
                    vec![9, 1, 0],   // 1: VIS
                    vec![0, 1, 12],  // 2: STR
                    vec![5, 5, 0],   // 3: VIS+AUD
                    vec![0, 0, 0],   // 4: silent
                ],
                vec![vec![10, 0, 0], vec![4, 6, 0]],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_order_and_labels() {
        // clusters: 7 -> {0, 2}, 3 -> {1, 5}, 0 -> {3, 6}, 5 -> {4}
        let partition = Partition::new(vec![7, 3, 7, 0, 5, 3, 0]);
        let out = relabel_by_projection(&partition, &data(), 0.3).unwrap();
        assert_eq!(out.label_set(), vec!["VIS", "VIS+AUD", "STR", "none"]);
        assert_eq!(out.partition.labels, vec![2, 0, 2, 1, 3, 0, 1]);
        assert_eq!(out.mapping[3], 0);
        assert_eq!(out.mapping[1], usize::MAX);
        assert_eq!(out.labels[0].dominant_region, Some(0));
        assert_eq!(out.labels[3].dominant_region, None);
        assert_eq!(out.labels[2].size, 2);
    }

    #[test]
    fn test_relabel_is_idempotent() {
        let partition = Partition::new(vec![7, 3, 7, 0, 5, 3, 0]);
        let once = relabel_by_projection(&partition, &data(), 0.3).unwrap();
        let twice = relabel_by_projection(&once.partition, &data(), 0.3).unwrap();
        assert_eq!(once.partition, twice.partition);
        assert_eq!(once.label_set(), twice.label_set());
        assert_eq!(twice.mapping, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_strength_breaks_dominant_ties() {
        // both clusters are dominated by VIS with one labelled region
        let store = CountMatrixStore::from_rows(
            vec!["VIS".into(), "AUD".into()],
            vec![vec![vec![6, 4], vec![10, 0]]],
        )
        .unwrap();
        let out = relabel_by_projection(&Partition::new(vec![0, 1]), &store, 0.5).unwrap();
        assert_eq!(out.partition.labels, vec![1, 0]);
    }

    #[test]
    fn test_rejects_bad_input() {
        let partition = Partition::new(vec![0, 0]);
        assert!(relabel_by_projection(&partition, &data(), 0.3).is_err());
        let partition = Partition::new(vec![0; 7]);
        assert!(relabel_by_projection(&partition, &data(), f64::NAN).is_err());
    }
}
