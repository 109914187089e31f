//! Fact assembler: nested geography records to flat transition facts.
//!
//! One `AssembledGroup` is emitted per (scenario, period) of a geography
//! record: its fact rows with all dimension IDs resolved through the
//! registry, plus the per-"from"-row declared totals and cell sums the
//! validator needs. Row and column `total` sentinels are derived aggregates
//! and are never emitted as facts.

use bigdecimal::{BigDecimal, RoundingMode};
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;

use crate::model::{FactRow, GeographyRecord, TransitionType, TOTAL_SENTINEL};
use crate::registry::DimensionRegistry;

/// Decimal scale every area value is normalized to, once, at assembly time.
pub const AREA_SCALE: i64 = 4;

/// Conservation inputs for one "from" row of a transition matrix.
#[derive(Debug, Clone)]
pub struct RowCheck {
    pub from_code: String,
    pub declared_total: Option<BigDecimal>,
    pub cell_sum: BigDecimal,
}

/// All facts and validation inputs for one (scenario, period, geography).
#[derive(Debug, Clone)]
pub struct AssembledGroup {
    pub scenario: String,
    pub period: String,
    pub geography: String,
    pub scenario_id: i32,
    pub time_id: i32,
    pub geography_id: i32,
    pub facts: Vec<FactRow>,
    pub row_checks: Vec<RowCheck>,
    /// Land-use codes observed anywhere in this group's matrix
    pub observed: BTreeSet<String>,
    /// (from, to) pairs present in this group's matrix
    pub pairs: BTreeSet<(String, String)>,
    pub cell_skips: u64,
}

impl AssembledGroup {
    /// Total area of the group: declared row totals where present, cell
    /// sums otherwise. Used for the cross-period constancy check.
    pub fn total_area(&self) -> BigDecimal {
        let mut total = BigDecimal::from(0);
        for check in &self.row_checks {
            match &check.declared_total {
                Some(declared) => total += declared.clone(),
                None => total += check.cell_sum.clone(),
            }
        }
        total
    }
}

/// Expands geography records into assembled fact groups.
pub struct FactAssembler;

impl FactAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Assemble every (scenario, period) group of one geography record.
    ///
    /// Dimension values are interned on first sight, so every fact row
    /// references a dimension row that exists before the fact does.
    pub fn assemble(
        &self,
        registry: &mut DimensionRegistry,
        record: &GeographyRecord,
    ) -> Vec<AssembledGroup> {
        let geography_id = registry.intern_geography(record);
        let mut groups = Vec::new();

        for (scenario_name, scenario) in &record.scenarios {
            let scenario_id = registry.intern_scenario(scenario_name, scenario);

            for (period_label, period) in &scenario.periods {
                let time_id = registry.intern_period(period_label);
                let mut group = AssembledGroup {
                    scenario: scenario_name.clone(),
                    period: period_label.clone(),
                    geography: record.geography.clone(),
                    scenario_id,
                    time_id,
                    geography_id,
                    facts: Vec::new(),
                    row_checks: Vec::new(),
                    observed: BTreeSet::new(),
                    pairs: BTreeSet::new(),
                    cell_skips: 0,
                };

                for (from_code, row) in &period.transitions {
                    // A whole row keyed "total" is a derived aggregate
                    if from_code == TOTAL_SENTINEL {
                        continue;
                    }
                    group.observed.insert(from_code.clone());
                    let mut check = RowCheck {
                        from_code: from_code.clone(),
                        declared_total: None,
                        cell_sum: BigDecimal::from(0),
                    };

                    for (to_code, value) in row {
                        if to_code == TOTAL_SENTINEL {
                            match normalize_area(value) {
                                Some(total) => check.declared_total = Some(total),
                                None => {
                                    if !value.is_null() {
                                        group.cell_skips += 1;
                                        tracing::warn!(
                                            geography = %record.geography,
                                            scenario = %scenario_name,
                                            period = %period_label,
                                            from = %from_code,
                                            "unreadable declared total ignored"
                                        );
                                    }
                                }
                            }
                            continue;
                        }
                        // A missing cell is simply absent; a null one is
                        // treated the same way, not as zero
                        if value.is_null() {
                            continue;
                        }
                        let area = match normalize_area(value) {
                            Some(area) if area >= BigDecimal::from(0) => area,
                            _ => {
                                group.cell_skips += 1;
                                tracing::warn!(
                                    geography = %record.geography,
                                    scenario = %scenario_name,
                                    period = %period_label,
                                    from = %from_code,
                                    to = %to_code,
                                    "cell skipped: not a non-negative number"
                                );
                                continue;
                            }
                        };

                        group.observed.insert(to_code.clone());
                        group.pairs.insert((from_code.clone(), to_code.clone()));
                        check.cell_sum += area.clone();

                        let from_landuse_id = registry.intern_landuse(from_code);
                        let to_landuse_id = registry.intern_landuse(to_code);
                        group.facts.push(FactRow {
                            scenario_id,
                            time_id,
                            geography_id,
                            from_landuse_id,
                            to_landuse_id,
                            area,
                            transition_type: TransitionType::for_pair(from_code, to_code)
                                .as_str()
                                .to_string(),
                        });
                    }
                    group.row_checks.push(check);
                }
                groups.push(group);
            }
        }
        groups
    }
}

impl Default for FactAssembler {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalize a source area value to the run-wide fixed-precision
/// representation. Accepts JSON integers, floats, and numeric strings.
fn normalize_area(value: &JsonValue) -> Option<BigDecimal> {
    let raw = match value {
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(BigDecimal::from(i))
            } else {
                n.as_f64().and_then(|f| BigDecimal::try_from(f).ok())
            }
        }
        JsonValue::String(s) => s.trim().parse::<BigDecimal>().ok(),
        _ => None,
    };
    raw.map(|d| d.with_scale_round(AREA_SCALE, RoundingMode::HalfUp))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn record(json: &str) -> GeographyRecord {
        serde_json::from_str(json).unwrap()
    }

    fn la_county() -> GeographyRecord {
        record(
            r#"{"geography": "06037", "scenarios": {"LM": {"periods": {"2020-2030": {
                "transitions": {
                    "forest": {"urban": 500, "forest": 9500, "total": 10000},
                    "pasture": {"pasture": 2000, "total": 2000}
                }}}}}}"#,
        )
    }

    #[test]
    fn test_assembles_facts_with_derived_transition_type() {
        let mut registry = DimensionRegistry::new();
        let groups = FactAssembler::new().assemble(&mut registry, &la_county());

        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        assert_eq!(group.facts.len(), 3);

        let change: Vec<_> = group
            .facts
            .iter()
            .filter(|f| f.transition_type == "change")
            .collect();
        assert_eq!(change.len(), 1);
        assert_eq!(change[0].area, BigDecimal::from_str("500.0000").unwrap());
    }

    #[test]
    fn test_total_sentinel_excluded_but_captured() {
        let mut registry = DimensionRegistry::new();
        let groups = FactAssembler::new().assemble(&mut registry, &la_county());
        let group = &groups[0];

        // No fact row points at a "total" pseudo-category
        assert!(!group.observed.contains(TOTAL_SENTINEL));
        let forest = group
            .row_checks
            .iter()
            .find(|c| c.from_code == "forest")
            .unwrap();
        assert_eq!(
            forest.declared_total,
            Some(BigDecimal::from_str("10000.0000").unwrap())
        );
        assert_eq!(forest.cell_sum, BigDecimal::from_str("10000.0000").unwrap());
    }

    #[test]
    fn test_numeric_representations_normalize_identically() {
        let mut registry = DimensionRegistry::new();
        let rec = record(
            r#"{"geography": "1", "scenarios": {"A": {"periods": {"2020-2030": {
                "transitions": {"forest": {"urban": "12.5", "crop": 12.5, "forest": 12}}
            }}}}}"#,
        );
        let groups = FactAssembler::new().assemble(&mut registry, &rec);
        let areas: Vec<String> = groups[0].facts.iter().map(|f| f.area.to_string()).collect();
        assert_eq!(areas, vec!["12.5000", "12.5000", "12.0000"]);
    }

    #[test]
    fn test_missing_cell_skipped_explicit_zero_kept() {
        let mut registry = DimensionRegistry::new();
        let rec = record(
            r#"{"geography": "1", "scenarios": {"A": {"periods": {"2020-2030": {
                "transitions": {"forest": {"urban": 0, "crop": null}}
            }}}}}"#,
        );
        let groups = FactAssembler::new().assemble(&mut registry, &rec);
        let group = &groups[0];

        assert_eq!(group.facts.len(), 1);
        assert_eq!(group.facts[0].area, BigDecimal::from(0).with_scale(AREA_SCALE));
        assert_eq!(group.cell_skips, 0);
    }

    #[test]
    fn test_malformed_and_negative_cells_counted() {
        let mut registry = DimensionRegistry::new();
        let rec = record(
            r#"{"geography": "1", "scenarios": {"A": {"periods": {"2020-2030": {
                "transitions": {"forest": {"urban": "not a number", "crop": -4, "forest": 10}}
            }}}}}"#,
        );
        let groups = FactAssembler::new().assemble(&mut registry, &rec);
        let group = &groups[0];

        assert_eq!(group.facts.len(), 1);
        assert_eq!(group.cell_skips, 2);
    }

    #[test]
    fn test_one_group_per_scenario_period() {
        let mut registry = DimensionRegistry::new();
        let rec = record(
            r#"{"geography": "1", "scenarios": {
                "A": {"periods": {"2020-2030": {"transitions": {"forest": {"forest": 1}}},
                                   "2030-2040": {"transitions": {"forest": {"forest": 1}}}}},
                "B": {"periods": {"2020-2030": {"transitions": {"forest": {"forest": 1}}}}}
            }}"#,
        );
        let groups = FactAssembler::new().assemble(&mut registry, &rec);
        assert_eq!(groups.len(), 3);

        // Same natural keys resolve to the same surrogate IDs across groups
        assert_eq!(groups[0].time_id, groups[2].time_id);
        assert_ne!(groups[0].scenario_id, groups[2].scenario_id);
    }
}
