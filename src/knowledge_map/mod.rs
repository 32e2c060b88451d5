//! Multi-grid knowledge map
//!
//! One append-only observation log feeds a canonical `"global"` grid plus
//! any number of region-scoped grids. Every grid is an independent replay of
//! the in-region part of the log; grids never share cells.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};

use crate::config::{EngineConfig, EstimatorConfig, SkipPolicy};
use crate::error::{EngineError, Result};
use crate::estimator::GridEstimator;
use crate::sampler::Sampler;
use crate::sanitize::validate_observation;
use crate::types::{
    AnswerOutcome, CandidateQuestion, CellEstimate, CurriculumStatus, Observation, Phase, Region,
    ScoredCandidate, Selection, SelectionMode, GLOBAL_GRID,
};

/// Current observation log format
pub const LOG_VERSION: &str = "1";

// ==================== Persistence ====================

/// Serialized observation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationLog {
    pub version: String,
    pub observations: Vec<Observation>,
}

impl ObservationLog {
    pub fn new(observations: Vec<Observation>) -> Self {
        Self {
            version: LOG_VERSION.to_string(),
            observations,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let log: Self = serde_json::from_str(json)?;
        if log.version != LOG_VERSION {
            return Err(EngineError::UnsupportedLogVersion(log.version));
        }
        Ok(log)
    }
}

/// Owned copy of the global grid for read-only consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridSnapshot {
    pub resolution: usize,
    pub region: Region,
    pub observation_count: usize,
    pub cells: Vec<CellEstimate>,
}

// ==================== Knowledge Map ====================

#[derive(Debug, Clone)]
pub struct KnowledgeMap {
    config: EngineConfig,
    sampler: Sampler,
    global: GridEstimator,
    regions: HashMap<String, GridEstimator>,
    log: Vec<Observation>,
}

impl KnowledgeMap {
    /// Create a map with an empty global grid over the unit square
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let global = GridEstimator::with_config(Region::UNIT, &config.estimator, config.irt)?;

        tracing::debug!(
            resolution = config.estimator.resolution,
            skip_policy = ?config.skip_policy,
            "Knowledge map created"
        );

        Ok(Self {
            sampler: Sampler::new(config.curriculum.clone(), config.irt),
            config,
            global,
            regions: HashMap::new(),
            log: Vec::new(),
        })
    }

    /// Rebuild a map by replaying a persisted log
    ///
    /// Region grids are not part of the log; re-create them with
    /// [`ensure_region_grid`](Self::ensure_region_grid).
    pub fn from_log(config: EngineConfig, log: &ObservationLog) -> Result<Self> {
        let mut map = Self::new(config)?;
        let report = map.global.restore(&log.observations);
        if report.rejected > 0 {
            tracing::warn!(
                rejected = report.rejected,
                applied = report.applied,
                "Observation log contained invalid entries"
            );
        }
        map.log = map.global.observations().to_vec();
        Ok(map)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn skip_policy(&self) -> SkipPolicy {
        self.config.skip_policy
    }

    // ==================== Updates ====================

    /// Validate once, append to the log and feed every grid containing the point
    pub fn observe(&mut self, observation: Observation) -> Result<()> {
        if let Err(err) = validate_observation(&observation) {
            tracing::warn!(error = %err, "Rejected observation");
            return Err(err);
        }

        let (x, y) = Region::UNIT.clamp(observation.x, observation.y);
        let observation = Observation {
            x,
            y,
            ..observation
        };

        self.global.observe(observation)?;
        for grid in self.regions.values_mut() {
            if grid.region().contains(x, y) {
                grid.observe(observation)?;
            }
        }
        self.log.push(observation);
        Ok(())
    }

    /// Record a quiz interaction; skips follow the configured [`SkipPolicy`]
    ///
    /// Returns whether an observation was recorded.
    pub fn record_answer(
        &mut self,
        x: f64,
        y: f64,
        outcome: AnswerOutcome,
        difficulty: u8,
    ) -> Result<bool> {
        let correctness = match (outcome.correctness(), self.config.skip_policy) {
            (Some(c), _) => c,
            (None, SkipPolicy::Neutral(c)) => c,
            (None, SkipPolicy::Omit) => {
                tracing::debug!(x, y, difficulty, "Skip omitted from evidence");
                return Ok(false);
            }
        };
        self.observe(Observation::new(x, y, correctness, difficulty))?;
        Ok(true)
    }

    /// Get or create a region-scoped grid
    ///
    /// A new grid replays the in-region part of the full log. Re-requesting a
    /// name with a different region or resolution is an error.
    pub fn ensure_region_grid(
        &mut self,
        name: &str,
        region: Region,
        resolution: usize,
    ) -> Result<&GridEstimator> {
        if name == GLOBAL_GRID {
            return Err(EngineError::invalid_region("the global grid name is reserved"));
        }

        if let Some(grid) = self.regions.get(name) {
            if grid.region() != region || grid.resolution() != resolution {
                return Err(EngineError::invalid_region(format!(
                    "grid '{name}' already exists with a different shape"
                )));
            }
        } else {
            let config = EstimatorConfig {
                resolution,
                ..self.config.estimator.clone()
            };
            let mut grid = GridEstimator::with_config(region, &config, self.config.irt)?;
            let in_region: Vec<Observation> = self
                .log
                .iter()
                .filter(|o| region.contains(o.x, o.y))
                .copied()
                .collect();
            let report = grid.restore(&in_region);

            tracing::debug!(
                name,
                resolution,
                replayed = report.applied,
                "Region grid created"
            );
            self.regions.insert(name.to_string(), grid);
        }

        self.grid(name)
    }

    /// Clear the log and every grid; region grids keep their shape
    pub fn reset(&mut self) {
        self.log.clear();
        self.global.reset();
        for grid in self.regions.values_mut() {
            grid.reset();
        }
        tracing::debug!("Knowledge map reset");
    }

    // ==================== Queries ====================

    pub fn global(&self) -> &GridEstimator {
        &self.global
    }

    pub fn grid(&self, name: &str) -> Result<&GridEstimator> {
        if name == GLOBAL_GRID {
            return Ok(&self.global);
        }
        self.regions
            .get(name)
            .ok_or_else(|| EngineError::UnknownGrid(name.to_string()))
    }

    /// Grid names, global first, regions sorted
    pub fn grid_names(&self) -> Vec<String> {
        let mut regions: Vec<String> = self.regions.keys().cloned().collect();
        regions.sort();
        std::iter::once(GLOBAL_GRID.to_string())
            .chain(regions)
            .collect()
    }

    /// Total accepted observations, across all regions
    pub fn answered_count(&self) -> usize {
        self.log.len()
    }

    pub fn log(&self) -> &[Observation] {
        &self.log
    }

    pub fn export_log(&self) -> ObservationLog {
        ObservationLog::new(self.log.clone())
    }

    /// Owned copy of the global grid's full prediction
    pub fn snapshot(&self) -> GridSnapshot {
        GridSnapshot {
            resolution: self.global.resolution(),
            region: self.global.region(),
            observation_count: self.global.observation_count(),
            cells: self.global.predict(None),
        }
    }

    // ==================== Selection ====================

    pub fn select_next(
        &self,
        name: &str,
        candidates: &[CandidateQuestion],
        viewport: Option<&Region>,
    ) -> Result<Selection> {
        let grid = self.grid(name)?;
        self.sampler
            .select_next(grid, self.answered_count(), candidates, viewport)
    }

    pub fn select_by_mode(
        &self,
        name: &str,
        candidates: &[CandidateQuestion],
        mode: SelectionMode,
    ) -> Result<Selection> {
        let grid = self.grid(name)?;
        self.sampler
            .select_by_mode(grid, self.answered_count(), candidates, mode)
    }

    pub fn score_candidates(
        &self,
        name: &str,
        candidates: &[CandidateQuestion],
        viewport: Option<&Region>,
    ) -> Result<(Phase, Vec<ScoredCandidate>)> {
        let grid = self.grid(name)?;
        self.sampler
            .score_candidates(grid, self.answered_count(), candidates, viewport)
    }

    pub fn status(
        &self,
        name: &str,
        candidates: &[CandidateQuestion],
        viewport: Option<&Region>,
    ) -> Result<CurriculumStatus> {
        let grid = self.grid(name)?;
        Ok(self
            .sampler
            .status(grid, self.answered_count(), candidates, viewport))
    }

    pub fn modes_enabled(&self) -> bool {
        self.sampler.modes_enabled(self.answered_count())
    }
}

// ==================== Shared Handle ====================

/// Thread-safe handle: writers hold the lock for a whole update
#[derive(Debug, Clone)]
pub struct SharedKnowledgeMap {
    inner: Arc<RwLock<KnowledgeMap>>,
}

impl SharedKnowledgeMap {
    pub fn new(map: KnowledgeMap) -> Self {
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    pub fn observe(&self, observation: Observation) -> Result<()> {
        self.inner.write().observe(observation)
    }

    pub fn record_answer(
        &self,
        x: f64,
        y: f64,
        outcome: AnswerOutcome,
        difficulty: u8,
    ) -> Result<bool> {
        self.inner.write().record_answer(x, y, outcome, difficulty)
    }

    pub fn snapshot(&self) -> GridSnapshot {
        self.inner.read().snapshot()
    }

    pub fn select_next(
        &self,
        name: &str,
        candidates: &[CandidateQuestion],
        viewport: Option<&Region>,
    ) -> Result<Selection> {
        self.inner.read().select_next(name, candidates, viewport)
    }

    pub fn answered_count(&self) -> usize {
        self.inner.read().answered_count()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, KnowledgeMap> {
        self.inner.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, KnowledgeMap> {
        self.inner.write()
    }
}
