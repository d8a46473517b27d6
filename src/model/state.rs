//! LatentState — everything a sweep reads and writes

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// The mutable latent state of one chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatentState {
    /// Motif of every neuron (Z), global neuron order
    pub allocation: Vec<usize>,
    /// Region probabilities, J × R, rows on the simplex
    pub q: DMatrix<f64>,
    /// Over-dispersion per motif, length J
    pub gamma: DVector<f64>,
    /// Global weights ω, length J
    pub omega: DVector<f64>,
    /// Local weights ω_m, M × J
    pub omega_local: DMatrix<f64>,
    /// Local concentration α
    pub alpha: f64,
    /// Global concentration α₀
    pub alpha0: f64,
}

impl LatentState {
    pub fn truncation(&self) -> usize {
        self.gamma.len()
    }

    /// Occupancy counts n_{m,j} (M × J) for the given animal of each neuron
    pub fn occupancy(&self, animal_of: &[usize], num_animals: usize) -> DMatrix<usize> {
        let mut n = DMatrix::zeros(num_animals, self.truncation());
        for (i, &j) in self.allocation.iter().enumerate() {
            n[(animal_of[i], j)] += 1;
        }
        n
    }

    /// Neurons grouped by motif, one (possibly empty) group per motif
    pub fn members(&self) -> Vec<Vec<usize>> {
        let mut groups = vec![Vec::new(); self.truncation()];
        for (i, &j) in self.allocation.iter().enumerate() {
            groups[j].push(i);
        }
        groups
    }

    /// Number of motifs with at least one neuron
    pub fn occupied(&self) -> usize {
        let mut used = vec![false; self.truncation()];
        for &j in &self.allocation {
            used[j] = true;
        }
        used.iter().filter(|&&u| u).count()
    }

    /// Largest deviation of any q row sum from 1
    pub fn simplex_error(&self) -> f64 {
        self.q
            .row_iter()
            .map(|row| (row.sum() - 1.0).abs())
            .fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> LatentState {
        LatentState {
            allocation: vec![0, 2, 2, 0, 2],
            q: DMatrix::from_element(3, 2, 0.5),
            gamma: DVector::from_element(3, 0.1),
            omega: DVector::from_element(3, 1.0 / 3.0),
            omega_local: DMatrix::from_element(2, 3, 1.0 / 3.0),
            alpha: 1.0,
            alpha0: 1.0,
        }
    }

    #[test]
    fn test_occupancy() {
        let s = state();
        let n = s.occupancy(&[0, 0, 1, 1, 1], 2);
        assert_eq!(n[(0, 0)], 1);
        assert_eq!(n[(0, 2)], 1);
        assert_eq!(n[(1, 2)], 2);
        assert_eq!(n[(1, 1)], 0);
        assert_eq!(s.occupied(), 2);
        assert_eq!(s.members()[1], Vec::<usize>::new());
        assert!(s.simplex_error() < 1e-12);
    }
}
