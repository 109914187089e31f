//! Target-store DDL: tables, indexes, and analytical views.
//!
//! Everything here is idempotent (`IF NOT EXISTS` / `CREATE OR REPLACE`),
//! so re-running finalization never duplicates indexes or views. Table
//! creation runs before any load so an empty input still leaves behind a
//! schema-valid, empty store; index and view creation run exactly once,
//! after the last batch commits, and are the "ready for consumption"
//! signal for the read-only query layer.

use diesel::prelude::*;

use crate::loader::database::DbConnection;

const CREATE_TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS scenario_dim (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        climate_pathway TEXT,
        socioeconomic_pathway TEXT,
        description TEXT
    )",
    "CREATE TABLE IF NOT EXISTS time_dim (
        id INTEGER PRIMARY KEY,
        period TEXT NOT NULL UNIQUE,
        start_year INTEGER NOT NULL,
        end_year INTEGER NOT NULL,
        period_years INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS geography_dim (
        id INTEGER PRIMARY KEY,
        fips TEXT NOT NULL UNIQUE,
        name TEXT,
        state_fips TEXT,
        state_name TEXT
    )",
    "CREATE TABLE IF NOT EXISTS landuse_dim (
        id INTEGER PRIMARY KEY,
        code TEXT NOT NULL UNIQUE,
        display_name TEXT NOT NULL,
        category_class TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS fact_transitions (
        scenario_id INTEGER NOT NULL REFERENCES scenario_dim (id),
        time_id INTEGER NOT NULL REFERENCES time_dim (id),
        geography_id INTEGER NOT NULL REFERENCES geography_dim (id),
        from_landuse_id INTEGER NOT NULL REFERENCES landuse_dim (id),
        to_landuse_id INTEGER NOT NULL REFERENCES landuse_dim (id),
        area NUMERIC NOT NULL CHECK (area >= 0),
        transition_type TEXT NOT NULL CHECK (transition_type IN ('same', 'change'))
    )",
];

const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_fact_scenario ON fact_transitions (scenario_id)",
    "CREATE INDEX IF NOT EXISTS idx_fact_time ON fact_transitions (time_id)",
    "CREATE INDEX IF NOT EXISTS idx_fact_geography ON fact_transitions (geography_id)",
    "CREATE INDEX IF NOT EXISTS idx_fact_from_landuse ON fact_transitions (from_landuse_id)",
    "CREATE INDEX IF NOT EXISTS idx_fact_to_landuse ON fact_transitions (to_landuse_id)",
];

const CREATE_VIEWS: &[&str] = &[
    // Fully denormalized join view for ad hoc exploration
    "CREATE OR REPLACE VIEW v_transitions AS
     SELECT f.scenario_id,
            s.name AS scenario,
            s.climate_pathway,
            s.socioeconomic_pathway,
            f.time_id,
            t.period,
            t.start_year,
            t.end_year,
            f.geography_id,
            g.fips,
            g.name AS geography,
            g.state_fips,
            g.state_name,
            lu_from.code AS from_landuse,
            lu_to.code AS to_landuse,
            f.area,
            f.transition_type
     FROM fact_transitions f
     JOIN scenario_dim s ON s.id = f.scenario_id
     JOIN time_dim t ON t.id = f.time_id
     JOIN geography_dim g ON g.id = f.geography_id
     JOIN landuse_dim lu_from ON lu_from.id = f.from_landuse_id
     JOIN landuse_dim lu_to ON lu_to.id = f.to_landuse_id",
    // Pre-aggregated summary for the common dashboard query
    "CREATE OR REPLACE VIEW v_transition_summary AS
     SELECT s.name AS scenario,
            t.period,
            f.transition_type,
            count(*) AS transitions,
            sum(f.area) AS total_area
     FROM fact_transitions f
     JOIN scenario_dim s ON s.id = f.scenario_id
     JOIN time_dim t ON t.id = f.time_id
     GROUP BY s.name, t.period, f.transition_type",
];

/// Create the five relations if they do not exist yet.
pub fn create_tables(conn: &mut DbConnection) -> QueryResult<()> {
    run_all(conn, CREATE_TABLES)
}

/// Create fact foreign-key indexes and the analytical views.
pub fn finalize_store(conn: &mut DbConnection) -> QueryResult<()> {
    run_all(conn, CREATE_INDEXES)?;
    run_all(conn, CREATE_VIEWS)
}

fn run_all(conn: &mut DbConnection, statements: &[&str]) -> QueryResult<()> {
    for statement in statements {
        diesel::sql_query(*statement).execute(conn)?;
    }
    Ok(())
}
