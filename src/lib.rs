//! # kmap-algo - 知识地图测验核心算法库
//!
//! 本 crate 提供纯 Rust 实现的知识地图算法:
//!
//! - **Spatial Posterior** - 基于 Matérn-3/2 核的网格掌握度后验
//! - **2PL IRT** - 四级难度的能力/难度映射
//! - **BALD Acquisition** - 按期望信息增益选题
//! - **Curriculum** - calibrate / map / learn 三阶段课程
//!
//! ## 设计理念
//!
//! - **增量更新** - 每个单元格维护充分统计量，单次观测 O(cells)
//! - **多网格** - 全局网格与区域网格均从同一观测日志独立重放
//! - **可持久化** - 观测日志序列化为 JSON，重放后后验完全一致
//! - **高性能** - 整网格预测与重放使用 rayon 并行
//!
//! ## 模块结构
//!
//! - [`kernel`] - 核函数与数学工具 (Matérn、sigmoid、正态 CDF)
//! - [`estimator`] - 网格后验估计器
//! - [`irt`] - 难度 / 能力层
//! - [`sampler`] - 选题与课程阶段
//! - [`knowledge_map`] - 多网格知识地图与持久化
//! - [`sanitize`] - 数据清洗 (观测校验、网格诊断)
//! - [`config`] - 配置 (含环境变量覆盖)
//! - [`types`] - 公共类型和常量
//!
//! ## 使用示例
//!
//! ```rust
//! use kmap_algo::{AnswerOutcome, CandidateQuestion, EngineConfig, KnowledgeMap};
//!
//! let mut map = KnowledgeMap::new(EngineConfig::default()).unwrap();
//! map.record_answer(0.3, 0.7, AnswerOutcome::Correct, 2).unwrap();
//!
//! let pool = vec![
//!     CandidateQuestion::new("q1", 0.2, 0.2, 2),
//!     CandidateQuestion::new("q2", 0.8, 0.8, 3),
//! ];
//! let selection = map.select_next("global", &pool, None).unwrap();
//! assert_eq!(selection.phase.as_str(), "calibrate");
//!
//! let snapshot = map.snapshot();
//! assert_eq!(snapshot.cells.len(), 50 * 50);
//! ```

// ============================================================================
// 模块声明
// ============================================================================

pub mod config;
pub mod error;
pub mod estimator;
pub mod irt;
pub mod kernel;
pub mod knowledge_map;
pub mod sampler;
pub mod sanitize;
pub mod types;

// ============================================================================
// 重新导出
// ============================================================================

/// 重新导出所有公共类型
pub use types::*;

/// 重新导出错误类型
pub use error::{EngineError, Result};

/// 重新导出配置
pub use config::{CurriculumConfig, EngineConfig, EstimatorConfig, PriorMode, SkipPolicy};

/// 重新导出网格估计器
pub use estimator::{GridEstimator, RestoreReport};

/// 重新导出 IRT 层
pub use irt::{AbilityEstimate, IrtParams};

/// 重新导出选题器
pub use sampler::Sampler;

/// 重新导出知识地图
pub use knowledge_map::{GridSnapshot, KnowledgeMap, ObservationLog, SharedKnowledgeMap};
