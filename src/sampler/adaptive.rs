//! Adaptive random-walk proposal scales
//!
//! Each Metropolis-Hastings target keeps its own log proposal sd, nudged
//! after every step towards the 0.44 acceptance rate that is optimal for
//! one-dimensional random walks. The nudge shrinks as 1/sqrt(t).

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::model::dist::sample_standard_normal;

pub const TARGET_ACCEPTANCE: f64 = 0.44;

const LOG_SD_MIN: f64 = -10.0;
const LOG_SD_MAX: f64 = 3.0;

/// Accept/propose counts for one MH target
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AcceptanceCounter {
    pub proposed: u64,
    pub accepted: u64,
}

impl AcceptanceCounter {
    pub fn record(&mut self, accepted: bool) {
        self.proposed += 1;
        if accepted {
            self.accepted += 1;
        }
    }

    pub fn rate(&self) -> f64 {
        if self.proposed == 0 {
            0.0
        } else {
            self.accepted as f64 / self.proposed as f64
        }
    }
}

/// Proposal sd on the log scale of a positive parameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveScale {
    log_sd: f64,
    pub counter: AcceptanceCounter,
}

impl AdaptiveScale {
    pub fn new(sd: f64) -> Self {
        Self {
            log_sd: sd.ln().clamp(LOG_SD_MIN, LOG_SD_MAX),
            counter: AcceptanceCounter::default(),
        }
    }

    pub fn sd(&self) -> f64 {
        self.log_sd.exp()
    }

    /// Multiplicative random-walk proposal for a positive value
    pub fn propose<R: Rng + ?Sized>(&self, rng: &mut R, current: f64) -> f64 {
        (current.ln() + self.sd() * sample_standard_normal(rng)).exp()
    }

    /// Record the outcome and adapt the scale at sweep `iteration`
    pub fn record(&mut self, accept_prob: f64, accepted: bool, iteration: usize, rate: f64) {
        self.counter.record(accepted);
        if rate > 0.0 && accept_prob.is_finite() {
            let step = rate * (accept_prob - TARGET_ACCEPTANCE) / ((iteration + 1) as f64).sqrt();
            self.log_sd = (self.log_sd + step).clamp(LOG_SD_MIN, LOG_SD_MAX);
        }
    }

    pub fn acceptance_rate(&self) -> f64 {
        self.counter.rate()
    }
}

/// min(1, exp(log_ratio)); NaN ratios count as certain rejection
pub fn accept_probability(log_ratio: f64) -> f64 {
    if log_ratio.is_nan() {
        0.0
    } else if log_ratio >= 0.0 {
        1.0
    } else {
        log_ratio.exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_grows_when_accepting() {
        let mut scale = AdaptiveScale::new(0.1);
        for t in 0..100 {
            scale.record(1.0, true, t, 1.0);
        }
        assert!(scale.sd() > 0.1);
        assert_eq!(scale.acceptance_rate(), 1.0);
    }

    #[test]
    fn test_scale_shrinks_when_rejecting() {
        let mut scale = AdaptiveScale::new(1.0);
        for t in 0..100 {
            scale.record(0.0, false, t, 1.0);
        }
        assert!(scale.sd() < 1.0);
        assert_eq!(scale.acceptance_rate(), 0.0);
    }

    #[test]
    fn test_no_adaptation_at_zero_rate() {
        let mut scale = AdaptiveScale::new(0.5);
        scale.record(1.0, true, 0, 0.0);
        assert!((scale.sd() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_accept_probability() {
        assert_eq!(accept_probability(f64::NAN), 0.0);
        assert_eq!(accept_probability(3.0), 1.0);
        assert_eq!(accept_probability(f64::NEG_INFINITY), 0.0);
        assert!((accept_probability(-1.0) - (-1f64).exp()).abs() < 1e-12);
    }
}
