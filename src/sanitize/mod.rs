//! Data Sanitization
//!
//! Input validation and numerical health checks.
//!
//! Functions:
//! - Observation validation (rejects, never clamps)
//! - Coordinate clamping for upstream projection noise
//! - Grid health diagnostics

use crate::error::{EngineError, Result};
use crate::types::{
    difficulty_weight, DiagnosticResult, Observation, MAX_DIFFICULTY, MIN_DIFFICULTY,
};

/// 检查数组是否包含无效值 (NaN 或 Inf)
pub fn has_invalid_values(arr: &[f64]) -> bool {
    arr.iter().any(|&x| x.is_nan() || x.is_infinite())
}

/// 校验观测；返回该观测的难度权重
///
/// 越界的 correctness / difficulty 直接拒绝，不做截断。
/// 坐标只要求是有限数，越界坐标由网格负责截断。
pub fn validate_observation(obs: &Observation) -> Result<f64> {
    if has_invalid_values(&[obs.x, obs.y]) {
        return Err(EngineError::invalid_observation(format!(
            "coordinates must be finite, got ({}, {})",
            obs.x, obs.y
        )));
    }
    if !obs.correctness.is_finite() || !(0.0..=1.0).contains(&obs.correctness) {
        return Err(EngineError::invalid_observation(format!(
            "correctness {} outside [0, 1]",
            obs.correctness
        )));
    }
    difficulty_weight(obs.difficulty).ok_or_else(|| {
        EngineError::invalid_observation(format!(
            "difficulty {} outside {}..={}",
            obs.difficulty, MIN_DIFFICULTY, MAX_DIFFICULTY
        ))
    })
}

/// 将坐标截断到 [0, 1]；NaN 视为 0
pub fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// 诊断网格健康状态
pub fn diagnose_grid(
    values: &[f64],
    uncertainties: &[f64],
    observation_count: usize,
) -> DiagnosticResult {
    let has_nan = values.iter().chain(uncertainties).any(|v| v.is_nan());
    let has_inf = values.iter().chain(uncertainties).any(|v| v.is_infinite());

    let mut min_uncertainty = f64::MAX;
    let mut max_uncertainty = f64::MIN;
    for &u in uncertainties.iter().filter(|u| u.is_finite()) {
        min_uncertainty = min_uncertainty.min(u);
        max_uncertainty = max_uncertainty.max(u);
    }

    let out_of_range = values
        .iter()
        .chain(uncertainties)
        .any(|&v| v.is_finite() && !(0.0..=1.0).contains(&v));
    let collapsed = uncertainties.iter().any(|&u| u <= 0.0);

    let is_healthy = !has_nan && !has_inf && !out_of_range && !collapsed;

    let message = if is_healthy {
        "Grid is healthy".to_string()
    } else if has_nan {
        "Grid contains NaN values".to_string()
    } else if has_inf {
        "Grid contains infinite values".to_string()
    } else if collapsed {
        "Grid has collapsed (zero) uncertainty".to_string()
    } else {
        "Grid has values outside [0, 1]".to_string()
    };

    DiagnosticResult {
        is_healthy,
        has_nan,
        has_inf,
        min_uncertainty: if min_uncertainty == f64::MAX {
            0.0
        } else {
            min_uncertainty
        },
        max_uncertainty: if max_uncertainty == f64::MIN {
            0.0
        } else {
            max_uncertainty
        },
        observation_count,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== has_invalid_values 测试 ====================

    #[test]
    fn test_has_invalid_values_with_valid_array() {
        assert!(!has_invalid_values(&[0.0, 0.5, 1.0]));
        assert!(!has_invalid_values(&[])); // 空数组
    }

    #[test]
    fn test_has_invalid_values_with_nan_or_inf() {
        assert!(has_invalid_values(&[0.5, f64::NAN]));
        assert!(has_invalid_values(&[f64::NEG_INFINITY]));
    }

    // ==================== validate_observation 测试 ====================

    #[test]
    fn test_validate_observation_accepts_partial_credit() {
        let weight = validate_observation(&Observation::new(0.5, 0.5, 0.4, 3)).unwrap();
        assert!((weight - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_validate_observation_rejects_correctness() {
        for c in [-0.01, 1.01, f64::NAN, f64::INFINITY] {
            let err = validate_observation(&Observation::new(0.5, 0.5, c, 2));
            assert!(matches!(err, Err(EngineError::InvalidObservation { .. })));
        }
    }

    #[test]
    fn test_validate_observation_rejects_difficulty() {
        for d in [0, 5, 255] {
            let err = validate_observation(&Observation::new(0.5, 0.5, 1.0, d));
            assert!(matches!(err, Err(EngineError::InvalidObservation { .. })));
        }
    }

    #[test]
    fn test_validate_observation_allows_out_of_range_coordinates() {
        // 投影误差导致的越界坐标由网格截断
        assert!(validate_observation(&Observation::new(1.0001, -0.0001, 1.0, 1)).is_ok());
        assert!(validate_observation(&Observation::new(f64::NAN, 0.5, 1.0, 1)).is_err());
    }

    #[test]
    fn test_clamp_unit() {
        assert_eq!(clamp_unit(-0.2), 0.0);
        assert_eq!(clamp_unit(1.2), 1.0);
        assert_eq!(clamp_unit(0.3), 0.3);
        assert_eq!(clamp_unit(f64::NAN), 0.0);
    }

    // ==================== diagnose_grid 测试 ====================

    #[test]
    fn test_diagnose_grid_healthy() {
        let result = diagnose_grid(&[0.5, 0.7], &[1.0, 0.4], 3);
        assert!(result.is_healthy);
        assert_eq!(result.min_uncertainty, 0.4);
        assert_eq!(result.max_uncertainty, 1.0);
        assert_eq!(result.observation_count, 3);
    }

    #[test]
    fn test_diagnose_grid_nan() {
        let result = diagnose_grid(&[f64::NAN], &[1.0], 0);
        assert!(!result.is_healthy);
        assert!(result.has_nan);
        assert!(result.message.contains("NaN"));
    }

    #[test]
    fn test_diagnose_grid_collapsed_uncertainty() {
        let result = diagnose_grid(&[0.5], &[0.0], 1);
        assert!(!result.is_healthy);
        assert!(result.message.contains("collapsed"));
    }

    #[test]
    fn test_diagnose_grid_empty() {
        let result = diagnose_grid(&[], &[], 0);
        assert!(result.is_healthy);
        assert_eq!(result.min_uncertainty, 0.0);
        assert_eq!(result.max_uncertainty, 0.0);
    }
}
