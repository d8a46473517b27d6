//! Replicate datasets drawn from one posterior snapshot
//!
//! Per neuron slot of animal m: a motif z ~ ω_m, a total resampled from the
//! observed totals of motif z (the animal's own totals when the motif is
//! empty), proportions ~ Dirichlet(q_z / γ_z), then counts through
//! sequential binomials. Dissection noise ε_r scales region r's proportion
//! by exp(N(0, ε_r)) and adds Poisson(ε_r) spill-over reads.

use crate::data::{CountMatrixStore, Partition};
use crate::error::{MotifError, Result};
use crate::model::dist::{
    normalize_floor, sample_categorical_log, sample_dirichlet, sample_multinomial, sample_poisson,
    sample_standard_normal,
};
use crate::sampler::Snapshot;
use nalgebra::DMatrix;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Per-region dissection noise levels
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DissectionNoise {
    /// One level for every region, or a single level broadcast to all
    pub levels: Vec<f64>,
}

impl DissectionNoise {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn uniform(level: f64) -> Self {
        Self { levels: vec![level] }
    }

    pub fn per_region(levels: Vec<f64>) -> Self {
        Self { levels }
    }

    pub fn level(&self, region: usize) -> f64 {
        match self.levels.len() {
            0 => 0.0,
            1 => self.levels[0],
            _ => self.levels.get(region).copied().unwrap_or(0.0),
        }
    }

    pub fn is_noise_free(&self) -> bool {
        self.levels.iter().all(|&l| l == 0.0)
    }

    pub fn validate(&self, num_regions: usize) -> Result<()> {
        if self.levels.len() > 1 && self.levels.len() != num_regions {
            return Err(MotifError::Config(format!(
                "{} noise levels given for {} regions",
                self.levels.len(),
                num_regions
            )));
        }
        if let Some(bad) = self.levels.iter().find(|l| !(l.is_finite() && **l >= 0.0)) {
            return Err(MotifError::Config(format!("noise level must be nonnegative, got {}", bad)));
        }
        Ok(())
    }
}

/// A simulated dataset and the motif drawn for each of its neurons
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedReplicate {
    pub data: CountMatrixStore,
    pub allocation: Vec<usize>,
}

/// Simulate one replicate shaped like `observed` from `snapshot`
pub fn simulate_replicate<R: Rng + ?Sized>(
    snapshot: &Snapshot,
    observed: &CountMatrixStore,
    partition: &Partition,
    noise: &DissectionNoise,
    rng: &mut R,
) -> Result<SimulatedReplicate> {
    let r = observed.num_regions();
    let j_max = snapshot.gamma.len();
    noise.validate(r)?;
    partition.validate(observed.num_neurons(), j_max)?;
    if snapshot.q.ncols() != r || snapshot.omega_local.nrows() != observed.num_animals() {
        return Err(MotifError::Data(format!(
            "snapshot covers {} regions and {} animals, dataset has {} and {}",
            snapshot.q.ncols(),
            snapshot.omega_local.nrows(),
            r,
            observed.num_animals()
        )));
    }

    let mut motif_totals: Vec<Vec<u32>> = vec![Vec::new(); j_max];
    for (i, &j) in partition.labels.iter().enumerate() {
        motif_totals[j].push(observed.total(i));
    }

    let mut mats = Vec::with_capacity(observed.num_animals());
    let mut allocation = Vec::with_capacity(observed.num_neurons());
    for m in 0..observed.num_animals() {
        let range = observed.animal_range(m);
        let animal_totals: Vec<u32> = range.clone().map(|i| observed.total(i)).collect();
        let log_w: Vec<f64> = snapshot.omega_local.row(m).iter().map(|w| w.ln()).collect();
        let mut flat = Vec::with_capacity(range.len() * r);

        for _ in range.clone() {
            let z = sample_categorical_log(rng, &log_w).unwrap_or(0);
            let pool = if motif_totals[z].is_empty() { &animal_totals } else { &motif_totals[z] };
            let total = if pool.is_empty() { 0 } else { pool[rng.gen_range(0..pool.len())] };

            let gamma = snapshot.gamma[z];
            let conc: Vec<f64> = snapshot.q.row(z).iter().map(|q| q / gamma).collect();
            let mut p = sample_dirichlet(rng, &conc);
            if !noise.is_noise_free() {
                for (k, pk) in p.iter_mut().enumerate() {
                    let eps = noise.level(k);
                    if eps > 0.0 {
                        *pk *= (eps * sample_standard_normal(rng)).exp();
                    }
                }
                normalize_floor(&mut p);
            }

            let mut counts = sample_multinomial(rng, total, &p);
            for (k, c) in counts.iter_mut().enumerate() {
                *c += sample_poisson(rng, noise.level(k));
            }
            flat.extend(counts);
            allocation.push(z);
        }
        mats.push(DMatrix::from_row_slice(range.len(), r, &flat));
    }

    Ok(SimulatedReplicate {
        data: CountMatrixStore::new(observed.regions().to_vec(), mats)?,
        allocation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn observed() -> (CountMatrixStore, Partition) {
        let data = CountMatrixStore::from_rows(
            vec!["A".into(), "B".into(), "C".into()],
            vec![
                vec![vec![30, 0, 0], vec![28, 2, 0], vec![0, 0, 5]],
                vec![vec![0, 1, 4], vec![25, 5, 0]],
            ],
        )
        .unwrap();
        (data, Partition::new(vec![0, 0, 1, 1, 0]))
    }

    fn snapshot() -> Snapshot {
        Snapshot {
            iteration: 0,
            allocation: vec![0, 0, 1, 1, 0],
            q: DMatrix::from_row_slice(2, 3, &[0.9, 0.1, 0.0, 0.0, 0.1, 0.9]),
            gamma: DVector::from_element(2, 0.01),
            omega: DVector::from_element(2, 0.5),
            omega_local: DMatrix::from_row_slice(2, 2, &[0.7, 0.3, 0.4, 0.6]),
            alpha: 1.0,
            alpha0: 1.0,
        }
    }

    #[test]
    fn test_replicate_shape_and_totals() {
        let (data, partition) = observed();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let rep = simulate_replicate(&snapshot(), &data, &partition, &DissectionNoise::none(), &mut rng).unwrap();
        assert_eq!(rep.data.animal_sizes(), data.animal_sizes());
        assert_eq!(rep.data.regions(), data.regions());
        assert_eq!(rep.allocation.len(), 5);
        let motif0_totals = [30, 30, 30];
        let motif1_totals = [5, 5];
        for (i, &z) in rep.allocation.iter().enumerate() {
            let total = rep.data.total(i);
            if z == 0 {
                assert!(motif0_totals.contains(&total));
                // a zero q entry never receives reads without noise
                assert_eq!(rep.data.counts(i)[2], 0);
            } else {
                assert!(motif1_totals.contains(&total));
                assert_eq!(rep.data.counts(i)[0], 0);
            }
        }
    }

    #[test]
    fn test_noise_adds_spill_over() {
        let (data, partition) = observed();
        let noise = DissectionNoise::uniform(3.0);
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let mut spilled = 0;
        for _ in 0..20 {
            let rep = simulate_replicate(&snapshot(), &data, &partition, &noise, &mut rng).unwrap();
            for (i, &z) in rep.allocation.iter().enumerate() {
                let off_target = if z == 0 { 2 } else { 0 };
                spilled += rep.data.counts(i)[off_target];
            }
        }
        assert!(spilled > 0);
    }

    #[test]
    fn test_noise_validation() {
        assert!(DissectionNoise::per_region(vec![0.1, 0.2]).validate(3).is_err());
        assert!(DissectionNoise::uniform(-1.0).validate(3).is_err());
        assert!(DissectionNoise::per_region(vec![0.0, 0.1, 0.2]).validate(3).is_ok());
        assert_eq!(DissectionNoise::uniform(0.5).level(2), 0.5);
        assert_eq!(DissectionNoise::none().level(1), 0.0);
    }

    #[test]
    fn test_mismatched_partition_rejected() {
        let (data, _) = observed();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let wrong = Partition::new(vec![0, 1, 2, 0, 0]);
        assert!(simulate_replicate(&snapshot(), &data, &wrong, &DissectionNoise::none(), &mut rng).is_err());
    }
}
