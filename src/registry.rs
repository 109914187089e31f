//! Dimension registry: natural keys to stable surrogate IDs.
//!
//! Interning is lookup-or-insert over the natural key of each dimension.
//! IDs are sequential per dimension, assigned in first-seen order starting
//! at 1, and never change for the lifetime of a run. The registry is an
//! owned value with a single logical writer (the assembly stage); it is
//! never shared across threads.
//!
//! ID stability across independent runs is NOT guaranteed: a resumed run is
//! re-seeded from the target store, but two runs over reordered input will
//! assign different IDs. Downstream systems must join through natural keys.

use indexmap::IndexMap;
use regex::Regex;

use crate::model::{DimensionRows, GeographyRecord, GeographyRow, LandUseRow, ScenarioBlock, ScenarioRow, TimePeriodRow};

/// Display name and broad class for the standard land-use categories.
/// Unknown codes fall back to a capitalized code and class "Other".
const LANDUSE_CLASSES: &[(&str, &str, &str)] = &[
    ("crop", "Cropland", "Agriculture"),
    ("pasture", "Pasture", "Agriculture"),
    ("forest", "Forest", "Natural"),
    ("rangeland", "Rangeland", "Natural"),
    ("urban", "Urban", "Developed"),
];

/// Registry of interned dimension values for one conversion run.
pub struct DimensionRegistry {
    scenarios: IndexMap<String, ScenarioRow>,
    periods: IndexMap<String, TimePeriodRow>,
    geographies: IndexMap<String, GeographyRow>,
    landuses: IndexMap<String, LandUseRow>,
    // High-water marks for drain_new_rows
    drained_scenarios: usize,
    drained_periods: usize,
    drained_geographies: usize,
    drained_landuses: usize,
    period_pattern: Regex,
}

impl DimensionRegistry {
    pub fn new() -> Self {
        Self {
            scenarios: IndexMap::new(),
            periods: IndexMap::new(),
            geographies: IndexMap::new(),
            landuses: IndexMap::new(),
            drained_scenarios: 0,
            drained_periods: 0,
            drained_geographies: 0,
            drained_landuses: 0,
            period_pattern: Regex::new(r"^(\d{4})\s*[-–]\s*(\d{4})$")
                .expect("period pattern is a valid regex"),
        }
    }

    /// Seed the registry from dimension rows already present in the target
    /// store, so a resumed run keeps assigning IDs where the interrupted run
    /// left off. Seeded rows are not re-emitted by `drain_new_rows`.
    ///
    /// Rows must be ordered by ID, which is how sinks return them.
    pub fn seed(&mut self, rows: DimensionRows) {
        for row in rows.scenarios {
            self.scenarios.insert(row.name.clone(), row);
        }
        for row in rows.periods {
            self.periods.insert(row.period.clone(), row);
        }
        for row in rows.geographies {
            self.geographies.insert(row.fips.clone(), row);
        }
        for row in rows.landuses {
            self.landuses.insert(row.code.clone(), row);
        }
        self.drained_scenarios = self.scenarios.len();
        self.drained_periods = self.periods.len();
        self.drained_geographies = self.geographies.len();
        self.drained_landuses = self.landuses.len();
    }

    /// Intern a scenario by name. Attributes are captured at first sight and
    /// immutable afterwards.
    pub fn intern_scenario(&mut self, name: &str, block: &ScenarioBlock) -> i32 {
        if let Some(row) = self.scenarios.get(name) {
            return row.id;
        }
        let id = (self.scenarios.len() + 1) as i32;
        self.scenarios.insert(
            name.to_string(),
            ScenarioRow {
                id,
                name: name.to_string(),
                climate_pathway: block.climate.clone(),
                socioeconomic_pathway: block.socioeconomic.clone(),
                description: block.description.clone(),
            },
        );
        id
    }

    /// Intern a time period by its label, e.g. `2020-2030`.
    ///
    /// Labels that do not parse as a year range still intern, with zeroed
    /// year attributes, rather than failing the record.
    pub fn intern_period(&mut self, label: &str) -> i32 {
        if let Some(row) = self.periods.get(label) {
            return row.id;
        }
        let (start_year, end_year) = self.parse_period(label);
        let id = (self.periods.len() + 1) as i32;
        self.periods.insert(
            label.to_string(),
            TimePeriodRow {
                id,
                period: label.to_string(),
                start_year,
                end_year,
                period_years: end_year - start_year,
            },
        );
        id
    }

    /// Intern a geography by its county-equivalent code.
    pub fn intern_geography(&mut self, record: &GeographyRecord) -> i32 {
        if let Some(row) = self.geographies.get(&record.geography) {
            return row.id;
        }
        let id = (self.geographies.len() + 1) as i32;
        self.geographies.insert(
            record.geography.clone(),
            GeographyRow {
                id,
                fips: record.geography.clone(),
                name: record.name.clone(),
                state_fips: record.state_fips.clone(),
                state_name: record.state_name.clone(),
            },
        );
        id
    }

    /// Intern a land-use category by its short code.
    pub fn intern_landuse(&mut self, code: &str) -> i32 {
        if let Some(row) = self.landuses.get(code) {
            return row.id;
        }
        let (display_name, category_class) = landuse_attributes(code);
        let id = (self.landuses.len() + 1) as i32;
        self.landuses.insert(
            code.to_string(),
            LandUseRow {
                id,
                code: code.to_string(),
                display_name,
                category_class,
            },
        );
        id
    }

    /// Look up the surrogate ID of an already-interned geography.
    pub fn geography_id(&self, fips: &str) -> Option<i32> {
        self.geographies.get(fips).map(|row| row.id)
    }

    /// Return all dimension rows interned since the previous drain.
    ///
    /// Callers load these ahead of the fact rows that reference them, which
    /// is what keeps fact foreign keys free of forward references.
    pub fn drain_new_rows(&mut self) -> DimensionRows {
        let rows = DimensionRows {
            scenarios: self.scenarios.values().skip(self.drained_scenarios).cloned().collect(),
            periods: self.periods.values().skip(self.drained_periods).cloned().collect(),
            geographies: self.geographies.values().skip(self.drained_geographies).cloned().collect(),
            landuses: self.landuses.values().skip(self.drained_landuses).cloned().collect(),
        };
        self.drained_scenarios = self.scenarios.len();
        self.drained_periods = self.periods.len();
        self.drained_geographies = self.geographies.len();
        self.drained_landuses = self.landuses.len();
        rows
    }

    fn parse_period(&self, label: &str) -> (i32, i32) {
        if let Some(caps) = self.period_pattern.captures(label.trim()) {
            let start = caps[1].parse::<i32>().unwrap_or(0);
            let end = caps[2].parse::<i32>().unwrap_or(0);
            (start, end)
        } else {
            (0, 0)
        }
    }
}

impl Default for DimensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn landuse_attributes(code: &str) -> (String, String) {
    for (known, display, class) in LANDUSE_CLASSES {
        if *known == code {
            return (display.to_string(), class.to_string());
        }
    }
    let mut chars = code.chars();
    let display = match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    };
    (display, "Other".to_string())
}
