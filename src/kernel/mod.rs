//! 核函数与数学工具
//!
//! - Matérn-3/2 协方差核
//! - 欧氏距离、sigmoid、标准正态 CDF
//! - 增量更新原语 `WeightedEvidence`（加权充分统计量）

use crate::types::EPSILON;

const SQRT_3: f64 = 1.732_050_807_568_877_2;

/// Matérn-3/2 核: (1 + √3·r)·exp(−√3·r), r = |distance| / length_scale
///
/// `matern32(0, ℓ) = 1`，随距离严格递减。
pub fn matern32(distance: f64, length_scale: f64) -> f64 {
    let r = distance.abs() / length_scale.max(EPSILON);
    let s = SQRT_3 * r;
    (1.0 + s) * (-s).exp()
}

/// 二维欧氏距离
pub fn euclidean_distance(x1: f64, y1: f64, x2: f64, y2: f64) -> f64 {
    (x1 - x2).hypot(y1 - y2)
}

/// 数值稳定的 sigmoid
pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// 标准正态 CDF（Abramowitz-Stegun 26.2.17，误差 < 7.5e-8）
pub fn normal_cdf(z: f64) -> f64 {
    if z.is_nan() {
        return 0.5;
    }
    if z.is_infinite() {
        return if z > 0.0 { 1.0 } else { 0.0 };
    }

    let b1 = 0.319381530;
    let b2 = -0.356563782;
    let b3 = 1.781477937;
    let b4 = -1.821255978;
    let b5 = 1.330274429;
    let p = 0.2316419;

    let x = z.abs();
    let t = 1.0 / (1.0 + p * x);
    let density = 0.398_942_280_401_432_7 * (-x * x / 2.0).exp();
    let tail = density * t * (b1 + t * (b2 + t * (b3 + t * (b4 + t * b5))));

    if z >= 0.0 {
        1.0 - tail
    } else {
        tail
    }
}

/// 加权证据的充分统计量
///
/// 单元格后验只依赖 (Σw, Σw·y)，因此每次观测都是 O(1) 的累加，
/// 不需要维护 Gram 矩阵或做立方级重算。
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WeightedEvidence {
    /// Σ w_i
    pub total_weight: f64,
    /// Σ w_i · y_i
    pub weighted_sum: f64,
}

impl WeightedEvidence {
    /// 累加一条加权证据
    #[inline]
    pub fn accumulate(&mut self, weight: f64, value: f64) {
        self.total_weight += weight;
        self.weighted_sum += weight * value;
    }

    /// 后验均值: (w₀·m₀ + Σw·y) / (w₀ + Σw)
    #[inline]
    pub fn mean(&self, prior_mean: f64, prior_weight: f64) -> f64 {
        (prior_weight * prior_mean + self.weighted_sum) / (prior_weight + self.total_weight)
    }

    /// 后验不确定度: w₀ / (w₀ + Σw)，w₀ > 0 时落在 (0, 1]
    #[inline]
    pub fn uncertainty(&self, prior_weight: f64) -> f64 {
        prior_weight / (prior_weight + self.total_weight)
    }

    /// 加权平均（无先验）；没有证据时返回 None
    pub fn weighted_mean(&self) -> Option<f64> {
        if self.total_weight > EPSILON {
            Some(self.weighted_sum / self.total_weight)
        } else {
            None
        }
    }
}
