//! Typed records for the nested input document and rows of the star schema.
//!
//! The input side (`GeographyRecord` and its nested blocks) mirrors the fixed
//! upstream nesting geography -> scenario -> period -> transition matrix.
//! The output side is one row struct per relation of the star schema, with
//! diesel derives so the same values flow through the row-by-row insert path
//! and the CSV exchange files unchanged.

use bigdecimal::BigDecimal;
use diesel::prelude::*;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

use crate::schema::{fact_transitions, geography_dim, landuse_dim, scenario_dim, time_dim};

/// One geography record as decoded from a single input line.
///
/// Map-valued fields use `IndexMap` so scenarios, periods, and matrix rows
/// are visited in document order, which is what makes surrogate-ID
/// assignment first-seen-ordered.
#[derive(Debug, Clone, Deserialize)]
pub struct GeographyRecord {
    /// County-equivalent code, the natural key of the geography dimension
    pub geography: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "state")]
    pub state_fips: Option<String>,
    #[serde(default)]
    pub state_name: Option<String>,
    #[serde(default)]
    pub scenarios: IndexMap<String, ScenarioBlock>,
}

/// One scenario's projections for a geography.
#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioBlock {
    #[serde(default)]
    pub climate: Option<String>,
    #[serde(default)]
    pub socioeconomic: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub periods: IndexMap<String, PeriodBlock>,
}

/// One time period's transition matrix.
///
/// `transitions` maps from-category -> (to-category -> area). Cell values
/// stay as raw JSON here; the assembler normalizes them and decides what is
/// malformed, so one bad cell never fails the whole record decode.
#[derive(Debug, Clone, Deserialize)]
pub struct PeriodBlock {
    #[serde(default)]
    pub transitions: IndexMap<String, IndexMap<String, JsonValue>>,
}

/// Key used for row/column aggregate sentinels inside a transition matrix.
pub const TOTAL_SENTINEL: &str = "total";

/// Derived classification of a transition cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionType {
    Same,
    Change,
}

impl TransitionType {
    /// Compute the transition type from category-code equality.
    pub fn for_pair(from_code: &str, to_code: &str) -> Self {
        if from_code == to_code {
            TransitionType::Same
        } else {
            TransitionType::Change
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionType::Same => "same",
            TransitionType::Change => "change",
        }
    }
}

impl fmt::Display for TransitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Scenario dimension row
#[derive(Debug, Clone, PartialEq, Serialize, Insertable, Queryable)]
#[diesel(table_name = scenario_dim)]
pub struct ScenarioRow {
    pub id: i32,
    pub name: String,
    pub climate_pathway: Option<String>,
    pub socioeconomic_pathway: Option<String>,
    pub description: Option<String>,
}

/// Time dimension row
#[derive(Debug, Clone, PartialEq, Serialize, Insertable, Queryable)]
#[diesel(table_name = time_dim)]
pub struct TimePeriodRow {
    pub id: i32,
    pub period: String,
    pub start_year: i32,
    pub end_year: i32,
    pub period_years: i32,
}

/// Geography dimension row
#[derive(Debug, Clone, PartialEq, Serialize, Insertable, Queryable)]
#[diesel(table_name = geography_dim)]
pub struct GeographyRow {
    pub id: i32,
    pub fips: String,
    pub name: Option<String>,
    pub state_fips: Option<String>,
    pub state_name: Option<String>,
}

/// Land-use dimension row
#[derive(Debug, Clone, PartialEq, Serialize, Insertable, Queryable)]
#[diesel(table_name = landuse_dim)]
pub struct LandUseRow {
    pub id: i32,
    pub code: String,
    pub display_name: String,
    pub category_class: String,
}

/// One fact row: a single transition cell with all dimension keys resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Insertable, Queryable)]
#[diesel(table_name = fact_transitions)]
pub struct FactRow {
    pub scenario_id: i32,
    pub time_id: i32,
    pub geography_id: i32,
    pub from_landuse_id: i32,
    pub to_landuse_id: i32,
    pub area: BigDecimal,
    pub transition_type: String,
}

/// Dimension rows grouped by relation, in interning order within each.
#[derive(Debug, Clone, Default)]
pub struct DimensionRows {
    pub scenarios: Vec<ScenarioRow>,
    pub periods: Vec<TimePeriodRow>,
    pub geographies: Vec<GeographyRow>,
    pub landuses: Vec<LandUseRow>,
}

impl DimensionRows {
    pub fn len(&self) -> usize {
        self.scenarios.len() + self.periods.len() + self.geographies.len() + self.landuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
