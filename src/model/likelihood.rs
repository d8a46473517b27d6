//! Dirichlet-multinomial observation model
//!
//! Conditional on its total n, a neuron's count vector under motif j is
//! `DirMult(n, q_j / γ_j)`: region proportions centred on q_j with
//! over-dispersion γ_j (γ → 0 recovers Multinomial(n, q_j)). The total
//! concentration is always 1/γ_j because q_j lies on the simplex.

use crate::data::Neuron;
use statrs::function::gamma::ln_gamma;

/// log p(y | n, q, γ); a zero-count neuron has log-likelihood 0
pub fn dirmult_log_pmf(neuron: &Neuron, q: &[f64], gamma: f64) -> f64 {
    if neuron.total == 0 {
        return 0.0;
    }
    if !(gamma > 0.0) {
        return f64::NEG_INFINITY;
    }
    let inv = 1.0 / gamma;
    let n = neuron.total as f64;
    let mut lp = neuron.log_coeff + ln_gamma(inv) - ln_gamma(n + inv);
    for (&y, &qr) in neuron.counts.iter().zip(q) {
        if y == 0 {
            continue;
        }
        let beta = qr * inv;
        if !(beta > 0.0) {
            return f64::NEG_INFINITY;
        }
        lp += ln_gamma(y as f64 + beta) - ln_gamma(beta);
    }
    lp
}

/// Joint log-likelihood of a group of neurons sharing one motif
pub fn group_log_likelihood<'a, I>(neurons: I, q: &[f64], gamma: f64) -> f64
where
    I: IntoIterator<Item = &'a Neuron>,
{
    let mut total = 0.0;
    for neuron in neurons {
        total += dirmult_log_pmf(neuron, q, gamma);
        if total == f64::NEG_INFINITY {
            break;
        }
    }
    total
}
