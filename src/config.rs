use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::irt::IrtParams;
use crate::types::{
    DEFAULT_LENGTH_SCALE, DEFAULT_PRIOR_WEIGHT, DEFAULT_RESOLUTION, EVIDENCE_KERNEL_THRESHOLD,
    PRIOR_VALUE,
};

/// 无证据单元格的先验均值来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PriorMode {
    /// 固定先验 (prior_mean)
    #[default]
    Fixed,
    /// 全局加权正确率；无观测时退回 prior_mean
    GlobalAverage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimatorConfig {
    pub resolution: usize,
    pub length_scale: f64,
    pub prior_weight: f64,
    pub prior_mean: f64,
    pub prior_mode: PriorMode,
    pub evidence_threshold: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            resolution: DEFAULT_RESOLUTION,
            length_scale: DEFAULT_LENGTH_SCALE,
            prior_weight: DEFAULT_PRIOR_WEIGHT,
            prior_mean: PRIOR_VALUE,
            prior_mode: PriorMode::Fixed,
            evidence_threshold: EVIDENCE_KERNEL_THRESHOLD,
        }
    }
}

impl EstimatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.resolution == 0 {
            return Err(EngineError::invalid_config("resolution must be positive"));
        }
        if !(self.length_scale.is_finite() && self.length_scale > 0.0) {
            return Err(EngineError::invalid_config("length scale must be positive"));
        }
        if !(self.prior_weight.is_finite() && self.prior_weight > 0.0) {
            return Err(EngineError::invalid_config("prior weight must be positive"));
        }
        if !(0.0..=1.0).contains(&self.prior_mean) {
            return Err(EngineError::invalid_config("prior mean must lie in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.evidence_threshold) {
            return Err(EngineError::invalid_config(
                "evidence threshold must lie in [0, 1]",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurriculumConfig {
    /// answered < calibrate_until → calibrate
    pub calibrate_until: usize,
    /// answered ≥ learn_from (and coverage ok) → learn
    pub learn_from: usize,
    /// coverage below this always maps
    pub min_coverage: f64,
    /// a cell counts as covered when its uncertainty is below this
    pub confident_uncertainty: f64,
    /// zone-of-proximal-development target P
    pub learn_target: f64,
    /// learn-phase cells above this uncertainty fall back to BALD
    pub learn_fallback_uncertainty: f64,
    pub easy_probability: f64,
    pub answerable_probability: f64,
    pub dont_know_probability: f64,
    /// answers needed before mode overrides are offered
    pub min_answers_for_modes: usize,
}

impl Default for CurriculumConfig {
    fn default() -> Self {
        Self {
            calibrate_until: 10,
            learn_from: 30,
            min_coverage: 0.15,
            confident_uncertainty: 0.5,
            learn_target: 0.6,
            learn_fallback_uncertainty: 0.7,
            easy_probability: 0.8,
            answerable_probability: 0.5,
            dont_know_probability: 0.3,
            min_answers_for_modes: 5,
        }
    }
}

/// 跳过题目的处理方式（显式配置，由 `KnowledgeMap::skip_policy` 报告）
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "correctness")]
pub enum SkipPolicy {
    /// 跳过不产生观测
    #[default]
    Omit,
    /// 跳过记为给定的中性正确率
    Neutral(f64),
}

impl PriorMode {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "fixed" => Some(Self::Fixed),
            "global-average" => Some(Self::GlobalAverage),
            _ => None,
        }
    }
}

impl SkipPolicy {
    fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        if s == "omit" {
            return Some(Self::Omit);
        }
        if s == "neutral" {
            return Some(Self::Neutral(PRIOR_VALUE));
        }
        s.strip_prefix("neutral:")
            .and_then(|v| v.parse::<f64>().ok())
            .map(Self::Neutral)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    pub estimator: EstimatorConfig,
    pub curriculum: CurriculumConfig,
    pub irt: IrtParams,
    pub skip_policy: SkipPolicy,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_parsed("KMAP_GRID_RESOLUTION", |v| v.parse::<usize>().ok()) {
            config.estimator.resolution = v;
        }
        if let Some(v) = env_parsed("KMAP_LENGTH_SCALE", |v| v.parse::<f64>().ok()) {
            config.estimator.length_scale = v;
        }
        if let Some(v) = env_parsed("KMAP_PRIOR_WEIGHT", |v| v.parse::<f64>().ok()) {
            config.estimator.prior_weight = v;
        }
        if let Some(v) = env_parsed("KMAP_PRIOR_MODE", PriorMode::parse) {
            config.estimator.prior_mode = v;
        }
        if let Some(v) = env_parsed("KMAP_SKIP_POLICY", SkipPolicy::parse) {
            config.skip_policy = v;
        }

        config
    }

    pub fn validate(&self) -> Result<()> {
        self.estimator.validate()?;
        self.irt.validate()?;
        if let SkipPolicy::Neutral(c) = self.skip_policy {
            if !(0.0..=1.0).contains(&c) {
                return Err(EngineError::invalid_config(
                    "neutral skip correctness must lie in [0, 1]",
                ));
            }
        }
        if self.curriculum.calibrate_until > self.curriculum.learn_from {
            return Err(EngineError::invalid_config(
                "calibrate phase must end before learn phase starts",
            ));
        }
        Ok(())
    }
}

/// 读取并解析环境变量；无法识别的值记录 warn 并保留默认值
fn env_parsed<T>(name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    let parsed = parse(raw.trim());
    if parsed.is_none() {
        tracing::warn!(variable = name, value = %raw, "Ignoring unrecognised environment value");
    }
    parsed
}
