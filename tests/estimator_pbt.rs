//! Property-Based Tests for the grid estimator
//!
//! Tests the following invariants:
//! - Order independence: the posterior does not depend on observation order
//! - Bounded outputs: value in [0, 1], uncertainty in (0, 1]
//! - Monotone uncertainty: adding evidence never raises a cell's uncertainty
//! - Log replay: JSON round-trip of the observation log reproduces the posterior

use proptest::prelude::*;

use kmap_algo::irt::difficulty_level;
use kmap_algo::{EngineConfig, GridEstimator, KnowledgeMap, Observation, ObservationLog, Region};

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_f64_0_1() -> impl Strategy<Value = f64> {
    (0u64..=1000u64).prop_map(|v| v as f64 / 1000.0)
}

fn arb_correctness() -> impl Strategy<Value = f64> {
    prop_oneof![Just(0.0), Just(1.0), arb_f64_0_1()]
}

fn arb_observation() -> impl Strategy<Value = Observation> {
    (arb_f64_0_1(), arb_f64_0_1(), arb_correctness(), 1u8..=4u8)
        .prop_map(|(x, y, correctness, difficulty)| Observation::new(x, y, correctness, difficulty))
}

fn arb_observations(max: usize) -> impl Strategy<Value = Vec<Observation>> {
    proptest::collection::vec(arb_observation(), 0..=max)
}

fn grid_from(observations: &[Observation]) -> GridEstimator {
    let mut grid = GridEstimator::new(12, Region::UNIT).unwrap();
    for obs in observations {
        grid.observe(*obs).unwrap();
    }
    grid
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    /// PBT-1: 观测顺序不影响后验
    #[test]
    fn posterior_is_order_independent(observations in arb_observations(15)) {
        let forward = grid_from(&observations);
        let reversed: Vec<Observation> = observations.iter().rev().copied().collect();
        let backward = grid_from(&reversed);

        for (a, b) in forward.predict(None).iter().zip(backward.predict(None).iter()) {
            prop_assert!((a.value - b.value).abs() < 1e-9);
            prop_assert!((a.uncertainty - b.uncertainty).abs() < 1e-9);
            prop_assert_eq!(a.evidence_count, b.evidence_count);
        }
    }

    /// PBT-2: 输出有界，难度等级与阈值一致
    #[test]
    fn outputs_are_bounded(observations in arb_observations(20)) {
        let grid = grid_from(&observations);
        for cell in grid.predict(None) {
            prop_assert!((0.0..=1.0).contains(&cell.value));
            prop_assert!(cell.uncertainty > 0.0 && cell.uncertainty <= 1.0);
            prop_assert_eq!(cell.difficulty_level, difficulty_level(cell.value));
            prop_assert!(cell.evidence_count as usize <= observations.len());
        }
        prop_assert!(grid.diagnose().is_healthy);
    }

    /// PBT-3: 新增观测不会提高任何单元格的不确定度
    #[test]
    fn uncertainty_is_monotone(
        observations in arb_observations(10),
        extra in arb_observation(),
    ) {
        let mut grid = grid_from(&observations);
        let before = grid.predict(None);
        grid.observe(extra).unwrap();
        let after = grid.predict(None);

        for (b, a) in before.iter().zip(after.iter()) {
            prop_assert!(a.uncertainty <= b.uncertainty);
        }
    }

    /// PBT-4: 观测日志 JSON 往返后重放得到相同后验
    #[test]
    fn log_json_replay_reproduces_posterior(observations in arb_observations(12)) {
        let mut map = KnowledgeMap::new(EngineConfig::default()).unwrap();
        for obs in &observations {
            map.observe(*obs).unwrap();
        }

        let json = map.export_log().to_json().unwrap();
        let log = ObservationLog::from_json(&json).unwrap();
        let restored = KnowledgeMap::from_log(EngineConfig::default(), &log).unwrap();

        prop_assert_eq!(restored.log(), map.log());
        prop_assert_eq!(restored.snapshot(), map.snapshot());
    }

    /// PBT-5: restore 与逐条 observe 完全一致
    #[test]
    fn restore_matches_incremental(observations in arb_observations(15)) {
        let incremental = grid_from(&observations);
        let mut replayed = GridEstimator::new(12, Region::UNIT).unwrap();
        let report = replayed.restore(&observations);

        prop_assert_eq!(report.applied, observations.len());
        prop_assert_eq!(report.rejected, 0);
        prop_assert_eq!(replayed.predict(None), incremental.predict(None));
    }
}
