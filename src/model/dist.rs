//! Log-space sampling and density helpers
//!
//! Dirichlet and Beta draws go through log-Gamma variates so tiny shape
//! parameters underflow gracefully instead of producing NaN. Probabilities
//! handed back to the sampler are floored at [`PROB_FLOOR`] and renormalised,
//! which keeps every log term finite.

use rand::Rng;
use rand_distr::{Binomial, Distribution, Gamma, Poisson, StandardNormal};
use statrs::function::gamma::ln_gamma;

/// Smallest probability stored for a simplex coordinate
pub const PROB_FLOOR: f64 = 1e-300;

pub fn log_sum_exp(xs: &[f64]) -> f64 {
    let max = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + xs.iter().map(|x| (x - max).exp()).sum::<f64>().ln()
}

/// Draw an index with probability ∝ exp(log_w). `None` when every weight is zero.
pub fn sample_categorical_log<R: Rng + ?Sized>(rng: &mut R, log_w: &[f64]) -> Option<usize> {
    let max = log_w.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return None;
    }
    let weights: Vec<f64> = log_w
        .iter()
        .map(|&l| if l.is_nan() { 0.0 } else { (l - max).exp() })
        .collect();
    let total: f64 = weights.iter().sum();
    let mut u = rng.gen::<f64>() * total;
    for (k, &w) in weights.iter().enumerate() {
        if w > 0.0 {
            if u < w {
                return Some(k);
            }
            u -= w;
        }
    }
    weights.iter().rposition(|&w| w > 0.0)
}

/// log of a Gamma(shape, 1) variate, stable for shape < 1
pub fn sample_log_gamma<R: Rng + ?Sized>(rng: &mut R, shape: f64) -> f64 {
    if !(shape > 0.0 && shape.is_finite()) {
        return f64::NEG_INFINITY;
    }
    if shape < 1.0 {
        // G(a) = G(a + 1) · U^(1/a)
        let u: f64 = 1.0 - rng.gen::<f64>();
        return sample_log_gamma(rng, shape + 1.0) + u.ln() / shape;
    }
    match Gamma::new(shape, 1.0) {
        Ok(g) => g.sample(rng).ln(),
        Err(_) => f64::NEG_INFINITY,
    }
}

/// Gamma variate with the given shape and rate
pub fn sample_gamma<R: Rng + ?Sized>(rng: &mut R, shape: f64, rate: f64) -> f64 {
    sample_log_gamma(rng, shape).exp() / rate
}

pub fn sample_beta<R: Rng + ?Sized>(rng: &mut R, a: f64, b: f64) -> f64 {
    let la = sample_log_gamma(rng, a);
    let lb = sample_log_gamma(rng, b);
    let x = 1.0 / (1.0 + (lb - la).exp());
    if x.is_nan() {
        return 0.5;
    }
    x.clamp(PROB_FLOOR, 1.0 - f64::EPSILON)
}

pub fn sample_dirichlet<R: Rng + ?Sized>(rng: &mut R, alpha: &[f64]) -> Vec<f64> {
    let logs: Vec<f64> = alpha.iter().map(|&a| sample_log_gamma(rng, a)).collect();
    let lse = log_sum_exp(&logs);
    if !lse.is_finite() {
        return vec![1.0 / alpha.len() as f64; alpha.len()];
    }
    let mut x: Vec<f64> = logs.iter().map(|l| (l - lse).exp()).collect();
    normalize_floor(&mut x);
    x
}

/// Floor every coordinate at [`PROB_FLOOR`] and rescale to sum 1
pub fn normalize_floor(x: &mut [f64]) {
    for v in x.iter_mut() {
        if !(*v > PROB_FLOOR) {
            *v = PROB_FLOOR;
        }
    }
    let total: f64 = x.iter().sum();
    for v in x.iter_mut() {
        *v /= total;
    }
}

pub fn sample_standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    rng.sample(StandardNormal)
}

/// Multinomial(n, p) via sequential conditional binomials
pub fn sample_multinomial<R: Rng + ?Sized>(rng: &mut R, n: u32, p: &[f64]) -> Vec<u32> {
    let mut counts = vec![0u32; p.len()];
    let mut remaining = n as u64;
    let mut mass: f64 = p.iter().sum();
    for r in 0..p.len() {
        if remaining == 0 {
            break;
        }
        if r + 1 == p.len() {
            counts[r] = remaining as u32;
            break;
        }
        let prob = if mass > 0.0 { (p[r] / mass).clamp(0.0, 1.0) } else { 0.0 };
        let draw = Binomial::new(remaining, prob).map(|b| b.sample(rng)).unwrap_or(0);
        counts[r] = draw as u32;
        remaining -= draw;
        mass -= p[r];
    }
    counts
}

pub fn sample_poisson<R: Rng + ?Sized>(rng: &mut R, lambda: f64) -> u32 {
    if !(lambda > 0.0) {
        return 0;
    }
    match Poisson::new(lambda) {
        Ok(d) => {
            let draw: f64 = d.sample(rng);
            draw as u32
        }
        Err(_) => 0,
    }
}

pub fn log_gamma_pdf(x: f64, shape: f64, rate: f64) -> f64 {
    if !(x > 0.0) {
        return f64::NEG_INFINITY;
    }
    shape * rate.ln() - ln_gamma(shape) + (shape - 1.0) * x.ln() - rate * x
}

pub fn log_dirichlet_pdf(x: &[f64], alpha: &[f64]) -> f64 {
    let total: f64 = alpha.iter().sum();
    let mut lp = ln_gamma(total);
    for (&xi, &ai) in x.iter().zip(alpha) {
        lp += (ai - 1.0) * xi.ln() - ln_gamma(ai);
    }
    lp
}
