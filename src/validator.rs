//! Validation of conservation and completeness invariants.
//!
//! Two thresholds govern conservation checks. A relative mismatch at or
//! below `tolerance` passes. Above `tolerance` but at or below
//! `hard_threshold` it is a warning: recorded, rows still load. Above
//! `hard_threshold` it is a failure: the group's rows are excluded from the
//! load and the run continues. Completeness and cross-period constancy only
//! ever warn.

use bigdecimal::{BigDecimal, ToPrimitive};
use serde::Serialize;
use std::collections::HashMap;

use crate::assembler::AssembledGroup;

/// Validation result for one (scenario, period, geography) group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupVerdict {
    Pass,
    Warn,
    Fail,
}

/// Verdict plus the messages that produced it.
///
/// `missing_pairs` is the completeness record: sparse matrices are normal,
/// so absences never affect the verdict.
#[derive(Debug, Clone)]
pub struct GroupOutcome {
    pub verdict: GroupVerdict,
    pub missing_pairs: usize,
    pub messages: Vec<String>,
}

/// Stateful validator for one conversion run.
///
/// Holds the first-seen total area per (scenario, geography) so later
/// periods can be checked for area creation or destruction.
pub struct Validator {
    tolerance: f64,
    hard_threshold: f64,
    baseline_totals: HashMap<(String, String), BigDecimal>,
}

impl Validator {
    pub fn new(tolerance: f64, hard_threshold: f64) -> Self {
        Self {
            tolerance,
            hard_threshold,
            baseline_totals: HashMap::new(),
        }
    }

    /// Check conservation, completeness, and cross-period constancy for one
    /// assembled group.
    pub fn check_group(&mut self, group: &AssembledGroup) -> GroupOutcome {
        let mut verdict = GroupVerdict::Pass;
        let mut messages = Vec::new();

        // Conservation: each "from" row's cell sum against its declared total
        for check in &group.row_checks {
            let Some(declared) = &check.declared_total else {
                continue;
            };
            let mismatch = relative_mismatch(&check.cell_sum, declared);
            if mismatch <= self.tolerance {
                continue;
            }
            let message = format!(
                "{}/{}/{}: {} row sums to {} against declared total {} ({:.2}% off)",
                group.scenario,
                group.period,
                group.geography,
                check.from_code,
                check.cell_sum,
                declared,
                mismatch * 100.0
            );
            if mismatch <= self.hard_threshold {
                if verdict == GroupVerdict::Pass {
                    verdict = GroupVerdict::Warn;
                }
                tracing::warn!("conservation warning: {}", message);
            } else {
                verdict = GroupVerdict::Fail;
                tracing::error!("conservation failure: {}", message);
            }
            messages.push(message);
        }

        // Completeness: every pair over the categories observed in the
        // group should be present; absences are recorded, never failed
        let expected = group.observed.len() * group.observed.len();
        let missing_pairs = expected.saturating_sub(group.pairs.len());
        if missing_pairs > 0 {
            let message = format!(
                "{}/{}/{}: {} of {} category pairs missing",
                group.scenario, group.period, group.geography, missing_pairs, expected
            );
            tracing::debug!("completeness warning: {}", message);
            messages.push(message);
        }

        // Constancy: total area must not drift across periods
        let key = (group.scenario.clone(), group.geography.clone());
        let total = group.total_area();
        match self.baseline_totals.get(&key) {
            None => {
                self.baseline_totals.insert(key, total);
            }
            Some(baseline) => {
                let drift = relative_mismatch(&total, baseline);
                if drift > self.tolerance {
                    let message = format!(
                        "{}/{}/{}: total area {} drifts from first-period total {} ({:.2}% off)",
                        group.scenario,
                        group.period,
                        group.geography,
                        total,
                        baseline,
                        drift * 100.0
                    );
                    tracing::warn!("constancy warning: {}", message);
                    if verdict == GroupVerdict::Pass {
                        verdict = GroupVerdict::Warn;
                    }
                    messages.push(message);
                }
            }
        }

        GroupOutcome {
            verdict,
            missing_pairs,
            messages,
        }
    }
}

fn relative_mismatch(actual: &BigDecimal, expected: &BigDecimal) -> f64 {
    if expected == &BigDecimal::from(0) {
        if actual == &BigDecimal::from(0) {
            return 0.0;
        }
        return f64::INFINITY;
    }
    let diff = (actual - expected).abs();
    let ratio = diff / expected.abs();
    ratio.to_f64().unwrap_or(f64::INFINITY)
}

/// Aggregate statistics for one conversion run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub geographies_processed: u64,
    pub records_skipped: u64,
    pub groups_passed: u64,
    pub groups_warned: u64,
    pub groups_failed: u64,
    pub cells_skipped: u64,
    pub pairs_missing: u64,
    pub facts_emitted: u64,
    pub facts_loaded: u64,
    pub facts_excluded: u64,
    pub batches_committed: u64,
    pub batches_failed: u64,
    pub elapsed_secs: f64,
}

impl RunStats {
    pub fn groups_total(&self) -> u64 {
        self.groups_passed + self.groups_warned + self.groups_failed
    }

    /// Share of groups that passed or warned (their rows loaded).
    pub fn success_rate(&self) -> f64 {
        let total = self.groups_total();
        if total == 0 {
            return 1.0;
        }
        (self.groups_passed + self.groups_warned) as f64 / total as f64
    }

    pub fn has_warnings(&self) -> bool {
        self.groups_warned > 0 || self.records_skipped > 0 || self.cells_skipped > 0
    }

    pub fn has_errors(&self) -> bool {
        self.groups_failed > 0 || self.batches_failed > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::FactAssembler;
    use crate::model::GeographyRecord;
    use crate::registry::DimensionRegistry;

    fn groups_for(json: &str) -> Vec<AssembledGroup> {
        let record: GeographyRecord = serde_json::from_str(json).unwrap();
        let mut registry = DimensionRegistry::new();
        FactAssembler::new().assemble(&mut registry, &record)
    }

    #[test]
    fn test_exact_conservation_passes() {
        let groups = groups_for(
            r#"{"geography": "06037", "scenarios": {"LM": {"periods": {"2020-2030": {
                "transitions": {
                    "forest": {"urban": 500, "forest": 9500, "total": 10000},
                    "pasture": {"pasture": 2000, "total": 2000}
                }}}}}}"#,
        );
        let mut validator = Validator::new(0.01, 0.05);
        let outcome = validator.check_group(&groups[0]);
        assert_eq!(outcome.verdict, GroupVerdict::Pass);
    }

    #[test]
    fn test_mismatch_between_thresholds_warns() {
        // 10300 vs 10000 declared: 3% off
        let groups = groups_for(
            r#"{"geography": "1", "scenarios": {"A": {"periods": {"2020-2030": {
                "transitions": {"forest": {"forest": 10300, "total": 10000}}
            }}}}}"#,
        );
        let mut validator = Validator::new(0.01, 0.05);
        let outcome = validator.check_group(&groups[0]);
        assert_eq!(outcome.verdict, GroupVerdict::Warn);
        assert!(outcome.messages[0].contains("declared total"));
    }

    #[test]
    fn test_mismatch_beyond_hard_threshold_fails() {
        // 5000 vs 10000 declared: 50% off
        let groups = groups_for(
            r#"{"geography": "1", "scenarios": {"A": {"periods": {"2020-2030": {
                "transitions": {"forest": {"forest": 5000, "total": 10000}}
            }}}}}"#,
        );
        let mut validator = Validator::new(0.01, 0.05);
        let outcome = validator.check_group(&groups[0]);
        assert_eq!(outcome.verdict, GroupVerdict::Fail);
    }

    #[test]
    fn test_row_without_declared_total_is_unchecked() {
        let groups = groups_for(
            r#"{"geography": "1", "scenarios": {"A": {"periods": {"2020-2030": {
                "transitions": {"forest": {"forest": 123}}
            }}}}}"#,
        );
        let mut validator = Validator::new(0.01, 0.05);
        // Single pair over a single observed category: complete
        let outcome = validator.check_group(&groups[0]);
        assert_eq!(outcome.verdict, GroupVerdict::Pass);
    }

    #[test]
    fn test_missing_pairs_recorded_without_failing() {
        let groups = groups_for(
            r#"{"geography": "1", "scenarios": {"A": {"periods": {"2020-2030": {
                "transitions": {"forest": {"urban": 10, "forest": 90, "total": 100}}
            }}}}}"#,
        );
        let mut validator = Validator::new(0.01, 0.05);
        let outcome = validator.check_group(&groups[0]);
        // urban->urban and urban->forest are absent
        assert_eq!(outcome.missing_pairs, 2);
        assert!(outcome.messages.iter().any(|m| m.contains("pairs missing")));
        assert_eq!(outcome.verdict, GroupVerdict::Pass);
    }

    #[test]
    fn test_cross_period_drift_warns() {
        let record_json = r#"{"geography": "1", "scenarios": {"A": {"periods": {
            "2020-2030": {"transitions": {"forest": {"forest": 1000, "total": 1000}}},
            "2030-2040": {"transitions": {"forest": {"forest": 1500, "total": 1500}}}
        }}}}"#;
        let groups = groups_for(record_json);
        let mut validator = Validator::new(0.01, 0.05);

        let first = validator.check_group(&groups[0]);
        assert_eq!(first.verdict, GroupVerdict::Pass);

        let second = validator.check_group(&groups[1]);
        assert_eq!(second.verdict, GroupVerdict::Warn);
        assert!(second.messages.iter().any(|m| m.contains("drifts")));
    }

    #[test]
    fn test_stats_outcome_helpers() {
        let stats = RunStats {
            groups_passed: 8,
            groups_warned: 1,
            groups_failed: 1,
            ..Default::default()
        };
        assert_eq!(stats.groups_total(), 10);
        assert!((stats.success_rate() - 0.9).abs() < 1e-9);
        assert!(stats.has_warnings());
        assert!(stats.has_errors());
    }
}
