//! CSV exchange-file rendering for the bulk-copy path.
//!
//! The rendering follows PostgreSQL's CSV `COPY` conventions: fields are
//! separated by commas, an unquoted empty field is NULL, a quoted empty
//! field is an empty string, and embedded quotes are doubled. Column order
//! matches the positional order of `crate::schema`, so a rendered batch can
//! be copied straight into its table.
//!
//! Both load paths start from the same row structs; what this module
//! renders is exactly what the row path binds, which is the property the
//! load-path equivalence test pins down.

use bigdecimal::BigDecimal;
use std::str::FromStr;

use crate::model::{FactRow, GeographyRow, LandUseRow, ScenarioRow, TimePeriodRow};

/// Render a required text field.
pub fn csv_field(value: &str) -> String {
    if value.is_empty() {
        // Quoted empty string, distinct from NULL
        return "\"\"".to_string();
    }
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Render a nullable text field. `None` renders as the unquoted empty
/// field PostgreSQL reads back as NULL.
pub fn csv_opt_field(value: Option<&str>) -> String {
    match value {
        Some(s) => csv_field(s),
        None => String::new(),
    }
}

pub fn scenario_record(row: &ScenarioRow) -> String {
    format!(
        "{},{},{},{},{}",
        row.id,
        csv_field(&row.name),
        csv_opt_field(row.climate_pathway.as_deref()),
        csv_opt_field(row.socioeconomic_pathway.as_deref()),
        csv_opt_field(row.description.as_deref()),
    )
}

pub fn period_record(row: &TimePeriodRow) -> String {
    format!(
        "{},{},{},{},{}",
        row.id,
        csv_field(&row.period),
        row.start_year,
        row.end_year,
        row.period_years,
    )
}

pub fn geography_record(row: &GeographyRow) -> String {
    format!(
        "{},{},{},{},{}",
        row.id,
        csv_field(&row.fips),
        csv_opt_field(row.name.as_deref()),
        csv_opt_field(row.state_fips.as_deref()),
        csv_opt_field(row.state_name.as_deref()),
    )
}

pub fn landuse_record(row: &LandUseRow) -> String {
    format!(
        "{},{},{},{}",
        row.id,
        csv_field(&row.code),
        csv_field(&row.display_name),
        csv_field(&row.category_class),
    )
}

pub fn fact_record(row: &FactRow) -> String {
    format!(
        "{},{},{},{},{},{},{}",
        row.scenario_id,
        row.time_id,
        row.geography_id,
        row.from_landuse_id,
        row.to_landuse_id,
        row.area,
        row.transition_type,
    )
}

/// Render a whole slice of rows, one record per line.
pub fn render_lines<T>(rows: &[T], render: impl Fn(&T) -> String) -> String {
    let mut out = String::new();
    for row in rows {
        out.push_str(&render(row));
        out.push('\n');
    }
    out
}

/// Decode one rendered fact record. Fact fields never need quoting, so the
/// decode is a plain split; used by the in-memory sink to give its bulk
/// path the same serialize-then-load semantics as the real one.
pub fn parse_fact_record(line: &str) -> Option<FactRow> {
    let fields: Vec<&str> = line.trim_end().split(',').collect();
    if fields.len() != 7 {
        return None;
    }
    Some(FactRow {
        scenario_id: fields[0].parse().ok()?,
        time_id: fields[1].parse().ok()?,
        geography_id: fields[2].parse().ok()?,
        from_landuse_id: fields[3].parse().ok()?,
        to_landuse_id: fields[4].parse().ok()?,
        area: BigDecimal::from_str(fields[5]).ok()?,
        transition_type: fields[6].to_string(),
    })
}
