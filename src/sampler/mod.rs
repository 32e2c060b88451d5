//! Acquisition & Curriculum
//!
//! Scores a candidate pool against the current posterior and picks the next
//! question.
//!
//! Phases (derived on every call, never stored):
//! - calibrate: answered < 10
//! - map: 10 ≤ answered < 30, or coverage < 0.15 at any count
//! - learn: answered ≥ 30 and coverage ≥ 0.15
//!
//! Scores per phase for q = (x, y, d), u = uncertainty(x, y):
//! - calibrate: u · (1 − |d − 2.5| / 2)
//! - map (BALD): a² · P(1−P) · (4u)²
//! - learn: 1 − |P − 0.6|, BALD when u > 0.7

use std::collections::HashSet;

use crate::config::CurriculumConfig;
use crate::error::{EngineError, Result};
use crate::estimator::GridEstimator;
use crate::irt::{ability, IrtParams};
use crate::sanitize::clamp_unit;
use crate::types::{
    CandidateQuestion, CurriculumStatus, Phase, Region, ScoredCandidate, Selection,
    SelectionMode, MAX_DIFFICULTY, MIN_DIFFICULTY,
};

/// Center of the difficulty scale used by the calibrate score
const MID_DIFFICULTY: f64 = 2.5;

/// Candidate resolved against the posterior
#[derive(Debug, Clone, Copy)]
struct Evaluated {
    index: usize,
    difficulty: u8,
    cell: usize,
    uncertainty: f64,
    theta: f64,
    sigma: f64,
    probability: f64,
}

#[derive(Debug, Clone, Default)]
pub struct Sampler {
    curriculum: CurriculumConfig,
    irt: IrtParams,
}

impl Sampler {
    pub fn new(curriculum: CurriculumConfig, irt: IrtParams) -> Self {
        Self { curriculum, irt }
    }

    pub fn curriculum(&self) -> &CurriculumConfig {
        &self.curriculum
    }

    // ==================== Phase ====================

    /// Phase for the given answer count and coverage
    pub fn phase(&self, answered_count: usize, coverage: f64) -> Phase {
        let c = &self.curriculum;
        if answered_count < c.calibrate_until {
            Phase::Calibrate
        } else if answered_count < c.learn_from || coverage < c.min_coverage {
            Phase::Map
        } else {
            Phase::Learn
        }
    }

    /// Phase, coverage and cell counts for the eligible part of the pool
    pub fn status(
        &self,
        grid: &GridEstimator,
        answered_count: usize,
        candidates: &[CandidateQuestion],
        viewport: Option<&Region>,
    ) -> CurriculumStatus {
        let evaluated = self.evaluate(grid, candidates, viewport);
        self.status_of(&evaluated, answered_count)
    }

    /// Whether mode overrides should be offered yet
    pub fn modes_enabled(&self, answered_count: usize) -> bool {
        answered_count >= self.curriculum.min_answers_for_modes
    }

    fn status_of(&self, evaluated: &[Evaluated], answered_count: usize) -> CurriculumStatus {
        let mut occupied = HashSet::new();
        let mut confident = HashSet::new();
        for e in evaluated {
            occupied.insert(e.cell);
            if e.uncertainty < self.curriculum.confident_uncertainty {
                confident.insert(e.cell);
            }
        }

        let coverage = if occupied.is_empty() {
            0.0
        } else {
            confident.len() as f64 / occupied.len() as f64
        };

        CurriculumStatus {
            phase: self.phase(answered_count, coverage),
            answered_count,
            coverage,
            occupied_cells: occupied.len(),
            confident_cells: confident.len(),
        }
    }

    // ==================== Evaluation ====================

    fn evaluate(
        &self,
        grid: &GridEstimator,
        candidates: &[CandidateQuestion],
        viewport: Option<&Region>,
    ) -> Vec<Evaluated> {
        candidates
            .iter()
            .enumerate()
            .filter_map(|(index, q)| {
                if !(MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&q.difficulty) {
                    tracing::warn!(
                        id = %q.id,
                        difficulty = q.difficulty,
                        "Ignoring candidate with invalid difficulty"
                    );
                    return None;
                }

                let (x, y) = (clamp_unit(q.x), clamp_unit(q.y));
                if !grid.region().contains(x, y) {
                    tracing::warn!(id = %q.id, x, y, "Ignoring candidate outside the grid region");
                    return None;
                }
                if let Some(view) = viewport {
                    if !view.contains(x, y) {
                        return None;
                    }
                }

                let cell = grid.predict_cell(x, y);
                let est = ability(cell.value, cell.uncertainty);
                Some(Evaluated {
                    index,
                    difficulty: q.difficulty,
                    cell: grid.cell_index(x, y),
                    uncertainty: cell.uncertainty,
                    theta: est.theta,
                    sigma: est.sigma,
                    probability: self.irt.probability_correct(est.theta, q.difficulty),
                })
            })
            .collect()
    }

    /// Ability at which BALD evaluates P
    ///
    /// With a single shared difficulty the pool-mean ability is used, so
    /// P(1−P) becomes a common factor and BALD ranks by uncertainty alone.
    fn bald_theta(evaluated: &[Evaluated]) -> Option<f64> {
        let first = evaluated.first()?;
        if evaluated.iter().all(|e| e.difficulty == first.difficulty) {
            let sum: f64 = evaluated.iter().map(|e| e.theta).sum();
            Some(sum / evaluated.len() as f64)
        } else {
            None
        }
    }

    fn bald_score(&self, e: &Evaluated, shared_theta: Option<f64>) -> f64 {
        let p = match shared_theta {
            Some(theta) => self.irt.probability_correct(theta, e.difficulty),
            None => e.probability,
        };
        self.irt.expected_information_gain(p, e.sigma)
    }

    fn score(&self, phase: Phase, e: &Evaluated, shared_theta: Option<f64>) -> f64 {
        match phase {
            Phase::Calibrate => {
                let centered = (e.difficulty as f64 - MID_DIFFICULTY).abs();
                e.uncertainty * (1.0 - centered / 2.0)
            }
            Phase::Map => self.bald_score(e, shared_theta),
            Phase::Learn => {
                if e.uncertainty > self.curriculum.learn_fallback_uncertainty {
                    tracing::trace!(index = e.index, "Low confidence, falling back to BALD");
                    self.bald_score(e, shared_theta)
                } else {
                    1.0 - (e.probability - self.curriculum.learn_target).abs()
                }
            }
        }
    }

    fn score_all(&self, evaluated: &[Evaluated], phase: Phase) -> Vec<ScoredCandidate> {
        let shared_theta = Self::bald_theta(evaluated);
        evaluated
            .iter()
            .map(|e| {
                let score = self.score(phase, e, shared_theta);
                tracing::trace!(index = e.index, score, phase = phase.as_str(), "Scored candidate");
                ScoredCandidate {
                    index: e.index,
                    score,
                    probability_correct: e.probability,
                    uncertainty: e.uncertainty,
                }
            })
            .collect()
    }

    // ==================== Selection ====================

    /// Phase and per-candidate scores in input order (eligible candidates only)
    pub fn score_candidates(
        &self,
        grid: &GridEstimator,
        answered_count: usize,
        candidates: &[CandidateQuestion],
        viewport: Option<&Region>,
    ) -> Result<(Phase, Vec<ScoredCandidate>)> {
        let evaluated = self.evaluate(grid, candidates, viewport);
        if evaluated.is_empty() {
            return Err(EngineError::EmptyCandidatePool);
        }
        let status = self.status_of(&evaluated, answered_count);
        Ok((status.phase, self.score_all(&evaluated, status.phase)))
    }

    /// Highest-scoring candidate; ties go to the earliest in input order
    pub fn select_next(
        &self,
        grid: &GridEstimator,
        answered_count: usize,
        candidates: &[CandidateQuestion],
        viewport: Option<&Region>,
    ) -> Result<Selection> {
        let evaluated = self.evaluate(grid, candidates, viewport);
        self.select_phase_based(&evaluated, answered_count, candidates)
    }

    fn select_phase_based(
        &self,
        evaluated: &[Evaluated],
        answered_count: usize,
        candidates: &[CandidateQuestion],
    ) -> Result<Selection> {
        if evaluated.is_empty() {
            return Err(EngineError::EmptyCandidatePool);
        }

        let status = self.status_of(evaluated, answered_count);
        tracing::debug!(
            phase = status.phase.as_str(),
            coverage = status.coverage,
            answered_count,
            pool = evaluated.len(),
            "Selecting next question"
        );

        let scored = self.score_all(evaluated, status.phase);
        let mut best = 0;
        for (i, s) in scored.iter().enumerate().skip(1) {
            if s.score > scored[best].score {
                best = i;
            }
        }

        let chosen = &scored[best];
        Ok(Selection {
            index: chosen.index,
            candidate: candidates[chosen.index].clone(),
            score: chosen.score,
            phase: status.phase,
            mode: None,
            probability_correct: chosen.probability_correct,
            uncertainty: chosen.uncertainty,
        })
    }

    /// Deterministic mode override; falls back to phase scoring when no
    /// candidate meets the mode's threshold
    ///
    /// For mode picks `score` carries the candidate's P(correct).
    pub fn select_by_mode(
        &self,
        grid: &GridEstimator,
        answered_count: usize,
        candidates: &[CandidateQuestion],
        mode: SelectionMode,
    ) -> Result<Selection> {
        let evaluated = self.evaluate(grid, candidates, None);
        if evaluated.is_empty() {
            return Err(EngineError::EmptyCandidatePool);
        }

        let c = &self.curriculum;
        let picked = match mode {
            SelectionMode::Easy => {
                first_best(
                    evaluated.iter().filter(|e| e.probability > c.easy_probability),
                    |a, b| a.probability > b.probability,
                )
                .or_else(|| first_best(evaluated.iter(), |a, b| a.probability > b.probability))
            }
            SelectionMode::HardestCanAnswer => first_best(
                evaluated
                    .iter()
                    .filter(|e| e.probability > c.answerable_probability),
                |a, b| {
                    a.difficulty > b.difficulty
                        || (a.difficulty == b.difficulty && a.probability > b.probability)
                },
            ),
            SelectionMode::DontKnow => first_best(
                evaluated
                    .iter()
                    .filter(|e| e.probability < c.dont_know_probability),
                |a, b| a.probability < b.probability,
            ),
        };

        match picked {
            Some(e) => {
                let status = self.status_of(&evaluated, answered_count);
                tracing::debug!(mode = mode.as_str(), index = e.index, "Mode override selected");
                Ok(Selection {
                    index: e.index,
                    candidate: candidates[e.index].clone(),
                    score: e.probability,
                    phase: status.phase,
                    mode: Some(mode),
                    probability_correct: e.probability,
                    uncertainty: e.uncertainty,
                })
            }
            None => {
                tracing::debug!(
                    mode = mode.as_str(),
                    "No candidate meets mode threshold, using phase scoring"
                );
                self.select_phase_based(&evaluated, answered_count, candidates)
            }
        }
    }
}

/// First element that no later element beats under `better`
fn first_best<'a, I, F>(iter: I, better: F) -> Option<&'a Evaluated>
where
    I: Iterator<Item = &'a Evaluated>,
    F: Fn(&Evaluated, &Evaluated) -> bool,
{
    iter.fold(None, |best, e| match best {
        Some(b) if !better(e, b) => Some(b),
        _ => Some(e),
    })
}
