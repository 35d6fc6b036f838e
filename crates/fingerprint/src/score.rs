//! Confidence aggregation
//!
//! Each matched step weight and each heuristic contribution is treated as an
//! independent probability that the target is the honeypot. They combine by
//! noisy-OR, `raw = 1 - Π(1 - w)`, and by default the raw score is sharpened
//! with a logistic curve, `1 / (1 + e^-(k·raw - k·m))`, so one strong match
//! alone does not saturate the result.

use honeysift_common::{ScoringMode, ScoringOptions};

#[derive(Debug, Clone)]
pub struct ScoreAggregator {
    mode: ScoringMode,
    steepness: f64,
    midpoint: f64,
}

impl ScoreAggregator {
    pub fn new(options: &ScoringOptions) -> Self {
        Self {
            mode: options.mode,
            steepness: options.steepness,
            midpoint: options.midpoint,
        }
    }

    /// Noisy-OR of the evidence. Weights are clamped to [0, 1].
    pub fn raw_score(evidence: &[f64]) -> f64 {
        let miss: f64 = evidence
            .iter()
            .map(|w| 1.0 - w.clamp(0.0, 1.0))
            .product();
        1.0 - miss
    }

    /// Confidence in [0, 1]. No evidence means zero confidence.
    pub fn confidence(&self, evidence: &[f64]) -> f64 {
        if evidence.is_empty() {
            return 0.0;
        }
        let raw = Self::raw_score(evidence);
        let confidence = match self.mode {
            ScoringMode::NoisyOr => raw,
            ScoringMode::Logistic => {
                1.0 / (1.0 + (-(self.steepness * raw - self.steepness * self.midpoint)).exp())
            }
        };
        confidence.clamp(0.0, 1.0)
    }
}

impl Default for ScoreAggregator {
    fn default() -> Self {
        Self::new(&ScoringOptions::default())
    }
}
