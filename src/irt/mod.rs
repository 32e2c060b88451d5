//! Difficulty / Ability Layer (2PL IRT)
//!
//! Reinterprets a cell's posterior `(value, uncertainty)` on a four-level
//! ordinal difficulty scale.
//!
//! Mathematical formulas:
//! - Ability: θ = 4·value − 2 (maps [0, 1] onto [−2, 2])
//! - Spread: σ = 4·uncertainty
//! - P(correct | θ, d) = sigmoid(a·(θ − b[d−1]))
//!   - a: discrimination (1.5)
//!   - b: level boundaries [−1.5, −0.5, 0.5, 1.5]
//!
//! Everything here is a pure function of already-validated estimator output.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::kernel::{normal_cdf, sigmoid};
use crate::types::{MAX_DIFFICULTY, MIN_DIFFICULTY};

// ==================== Constants ====================

/// Default discrimination parameter a
pub const DEFAULT_DISCRIMINATION: f64 = 1.5;

/// Default level boundaries b on the ability scale
pub const DEFAULT_BOUNDARIES: [f64; 4] = [-1.5, -0.5, 0.5, 1.5];

/// Width of the ability axis: θ ∈ [−2, 2]
const ABILITY_SCALE: f64 = 4.0;

/// Lower bound on σ when integrating against the boundaries
const MIN_SIGMA: f64 = 1e-6;

// ==================== Data Structures ====================

/// Fixed 2PL parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IrtParams {
    pub discrimination: f64,
    pub boundaries: [f64; 4],
}

impl Default for IrtParams {
    fn default() -> Self {
        Self {
            discrimination: DEFAULT_DISCRIMINATION,
            boundaries: DEFAULT_BOUNDARIES,
        }
    }
}

/// Gaussian ability estimate for one location
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AbilityEstimate {
    pub theta: f64,
    pub sigma: f64,
}

// ==================== Mapping ====================

/// Rescale posterior output onto the ability axis
pub fn ability(value: f64, uncertainty: f64) -> AbilityEstimate {
    AbilityEstimate {
        theta: ABILITY_SCALE * value - ABILITY_SCALE / 2.0,
        sigma: ABILITY_SCALE * uncertainty,
    }
}

impl IrtParams {
    /// Discrimination must be positive; boundaries finite and strictly increasing
    pub fn validate(&self) -> Result<()> {
        if !(self.discrimination.is_finite() && self.discrimination > 0.0) {
            return Err(EngineError::invalid_config(
                "IRT discrimination must be positive",
            ));
        }
        if self.boundaries.iter().any(|b| !b.is_finite())
            || self.boundaries.windows(2).any(|w| w[0] >= w[1])
        {
            return Err(EngineError::invalid_config(
                "IRT boundaries must be finite and strictly increasing",
            ));
        }
        Ok(())
    }

    /// Value-space thresholds: b mapped back through θ = 4·value − 2
    ///
    /// For the default boundaries these are exactly [0.125, 0.375, 0.625, 0.875].
    pub fn value_thresholds(&self) -> [f64; 4] {
        self.boundaries
            .map(|b| (b + ABILITY_SCALE / 2.0) / ABILITY_SCALE)
    }

    /// Number of thresholds the value reaches (0..=4)
    pub fn difficulty_level(&self, value: f64) -> u8 {
        self.value_thresholds()
            .iter()
            .filter(|&&t| value >= t)
            .count() as u8
    }

    /// Boundary for a 1-based difficulty level, clamped into the table
    pub fn boundary(&self, difficulty: u8) -> f64 {
        let level = difficulty.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY);
        self.boundaries[(level - MIN_DIFFICULTY) as usize]
    }

    /// P(correct) at ability θ for a question of the given difficulty
    pub fn probability_correct(&self, theta: f64, difficulty: u8) -> f64 {
        sigmoid(self.discrimination * (theta - self.boundary(difficulty)))
    }

    /// BALD 期望信息增益: a²·P(1−P)·σ²
    pub fn expected_information_gain(&self, probability: f64, sigma: f64) -> f64 {
        self.discrimination * self.discrimination * probability * (1.0 - probability) * sigma * sigma
    }

    /// Soft posterior over the five ability bands
    ///
    /// P(band k) = Φ((b_k − θ)/σ) − Φ((b_{k−1} − θ)/σ), with b_{−1} = −∞ and
    /// b_4 = +∞. The entries sum to 1.
    pub fn level_probabilities(&self, estimate: &AbilityEstimate) -> [f64; 5] {
        let sigma = estimate.sigma.max(MIN_SIGMA);
        let mut cdf = [0.0; 6];
        cdf[5] = 1.0;
        for (i, b) in self.boundaries.iter().enumerate() {
            cdf[i + 1] = normal_cdf((b - estimate.theta) / sigma);
        }

        let mut probs = [0.0; 5];
        for k in 0..5 {
            probs[k] = (cdf[k + 1] - cdf[k]).max(0.0);
        }
        probs
    }
}

/// Ability band with the default parameters
pub fn difficulty_level(value: f64) -> u8 {
    IrtParams::default().difficulty_level(value)
}

/// P(correct) with the default parameters
pub fn probability_correct(theta: f64, difficulty: u8) -> f64 {
    IrtParams::default().probability_correct(theta, difficulty)
}
