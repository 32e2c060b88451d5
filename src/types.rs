//! Common Types and Constants
//!
//! Shared data structures used across all algorithm modules.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

// ==================== Constants ====================

/// Prior mastery value of a cell without evidence
pub const PRIOR_VALUE: f64 = 0.5;

/// Prior uncertainty of a cell without evidence
pub const PRIOR_UNCERTAINTY: f64 = 1.0;

/// Default grid resolution (N x N cells)
pub const DEFAULT_RESOLUTION: usize = 50;

/// Default Matérn length scale in unit-square coordinates
pub const DEFAULT_LENGTH_SCALE: f64 = 0.15;

/// Prior pseudo-weight, also the regularization term of every cell
pub const DEFAULT_PRIOR_WEIGHT: f64 = 1.0;

/// Kernel value above which an observation counts as evidence for a cell
pub const EVIDENCE_KERNEL_THRESHOLD: f64 = 0.1;

/// Lowest question difficulty level
pub const MIN_DIFFICULTY: u8 = 1;

/// Highest question difficulty level
pub const MAX_DIFFICULTY: u8 = 4;

/// Evidentiary weight per difficulty level (index = level - 1)
pub const DIFFICULTY_WEIGHTS: [f64; 4] = [0.70, 0.85, 1.00, 1.15];

/// Name of the canonical global grid
pub const GLOBAL_GRID: &str = "global";

/// Numerical stability epsilon
pub const EPSILON: f64 = 1e-10;

/// Evidence weight of an observation at the given difficulty level
pub fn difficulty_weight(difficulty: u8) -> Option<f64> {
    if (MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&difficulty) {
        Some(DIFFICULTY_WEIGHTS[(difficulty - MIN_DIFFICULTY) as usize])
    } else {
        None
    }
}

// ==================== Geometry ====================

/// Axis-aligned rectangle inside the unit square
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl Region {
    /// The full unit square
    pub const UNIT: Region = Region {
        x_min: 0.0,
        y_min: 0.0,
        x_max: 1.0,
        y_max: 1.0,
    };

    /// Create a validated region
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Result<Self> {
        let region = Self {
            x_min,
            y_min,
            x_max,
            y_max,
        };
        region.validate()?;
        Ok(region)
    }

    pub fn validate(&self) -> Result<()> {
        let bounds = [self.x_min, self.y_min, self.x_max, self.y_max];
        if bounds.iter().any(|v| !v.is_finite()) {
            return Err(EngineError::invalid_region("bounds must be finite"));
        }
        if bounds.iter().any(|&v| !(0.0..=1.0).contains(&v)) {
            return Err(EngineError::invalid_region("bounds must lie in [0, 1]"));
        }
        if self.x_max <= self.x_min || self.y_max <= self.y_min {
            return Err(EngineError::invalid_region(format!(
                "empty region [{}, {}] x [{}, {}]",
                self.x_min, self.x_max, self.y_min, self.y_max
            )));
        }
        Ok(())
    }

    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    /// Inclusive containment test
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x_min && x <= self.x_max && y >= self.y_min && y <= self.y_max
    }

    /// Clamp a point into the region; NaN coordinates land on the lower bound
    pub fn clamp(&self, x: f64, y: f64) -> (f64, f64) {
        (
            clamp_or_min(x, self.x_min, self.x_max),
            clamp_or_min(y, self.y_min, self.y_max),
        )
    }
}

impl Default for Region {
    fn default() -> Self {
        Self::UNIT
    }
}

fn clamp_or_min(v: f64, min: f64, max: f64) -> f64 {
    if v.is_nan() {
        min
    } else {
        v.clamp(min, max)
    }
}

// ==================== Estimator Types ====================

/// One answered (or skipped) question
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub x: f64,
    pub y: f64,
    /// 1.0 correct, 0.0 wrong, fractional for partial credit
    pub correctness: f64,
    /// Difficulty level 1..=4
    pub difficulty: u8,
}

impl Observation {
    pub fn new(x: f64, y: f64, correctness: f64, difficulty: u8) -> Self {
        Self {
            x,
            y,
            correctness,
            difficulty,
        }
    }
}

/// Posterior estimate for a single grid cell
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellEstimate {
    pub row: usize,
    pub col: usize,
    /// Cell center (or query point for exact evaluation)
    pub x: f64,
    pub y: f64,
    /// Probability of answering correctly here [0, 1]
    pub value: f64,
    /// Posterior uncertainty [0, 1]
    pub uncertainty: f64,
    /// Ability band 0..=4
    pub difficulty_level: u8,
    /// Observations that meaningfully influenced this cell
    pub evidence_count: u32,
}

/// Health check result for a grid
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticResult {
    pub is_healthy: bool,
    pub has_nan: bool,
    pub has_inf: bool,
    pub min_uncertainty: f64,
    pub max_uncertainty: f64,
    pub observation_count: usize,
    pub message: String,
}

// ==================== Sampler Types ====================

/// Question supplied by the data-loading layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateQuestion {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub difficulty: u8,
}

impl CandidateQuestion {
    pub fn new(id: impl Into<String>, x: f64, y: f64, difficulty: u8) -> Self {
        Self {
            id: id.into(),
            x,
            y,
            difficulty,
        }
    }
}

/// Curriculum phase, always derived from (answered count, coverage)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Calibrate,
    Map,
    Learn,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Calibrate => "calibrate",
            Self::Map => "map",
            Self::Learn => "learn",
        }
    }
}

/// Deterministic selection overrides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionMode {
    Easy,
    HardestCanAnswer,
    DontKnow,
}

impl FromStr for SelectionMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "easy" => Ok(Self::Easy),
            "hardest-can-answer" => Ok(Self::HardestCanAnswer),
            "dont-know" => Ok(Self::DontKnow),
            other => Err(EngineError::invalid_config(format!(
                "unknown selection mode '{other}'"
            ))),
        }
    }
}

impl SelectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::HardestCanAnswer => "hardest-can-answer",
            Self::DontKnow => "dont-know",
        }
    }
}

/// Selected question with the numbers that picked it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    /// Index into the caller's candidate slice
    pub index: usize,
    pub candidate: CandidateQuestion,
    pub score: f64,
    pub phase: Phase,
    /// Set when a mode override (not the phase rule) made the choice
    pub mode: Option<SelectionMode>,
    pub probability_correct: f64,
    pub uncertainty: f64,
}

/// Per-candidate score, for diagnostics and ranking displays
///
/// `probability_correct` is always the candidate's own P at its cell. When
/// every eligible candidate shares one difficulty, BALD scores use P at the
/// pool's mean ability instead, so `score` need not follow from the reported
/// P in that case.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredCandidate {
    pub index: usize,
    pub score: f64,
    pub probability_correct: f64,
    pub uncertainty: f64,
}

/// Phase and coverage metrics for UI display
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurriculumStatus {
    pub phase: Phase,
    pub answered_count: usize,
    pub coverage: f64,
    pub occupied_cells: usize,
    pub confident_cells: usize,
}

// ==================== Knowledge Map Types ====================

/// Outcome of one quiz interaction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "credit")]
pub enum AnswerOutcome {
    Correct,
    Incorrect,
    Partial(f64),
    Skipped,
}

impl AnswerOutcome {
    /// Correctness for an answered outcome; `None` for a skip
    pub fn correctness(&self) -> Option<f64> {
        match self {
            Self::Correct => Some(1.0),
            Self::Incorrect => Some(0.0),
            Self::Partial(credit) => Some(*credit),
            Self::Skipped => None,
        }
    }
}
