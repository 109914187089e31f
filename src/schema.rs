//! Diesel table definitions for the star schema.
//!
//! Column order here must match the DDL in `crate::ddl` and the field order
//! of the row structs in `crate::model`: the CSV exchange files written for
//! the bulk-copy path rely on positional column mapping.

diesel::table! {
    scenario_dim (id) {
        id -> Integer,
        name -> Text,
        climate_pathway -> Nullable<Text>,
        socioeconomic_pathway -> Nullable<Text>,
        description -> Nullable<Text>,
    }
}

diesel::table! {
    time_dim (id) {
        id -> Integer,
        period -> Text,
        start_year -> Integer,
        end_year -> Integer,
        period_years -> Integer,
    }
}

diesel::table! {
    geography_dim (id) {
        id -> Integer,
        fips -> Text,
        name -> Nullable<Text>,
        state_fips -> Nullable<Text>,
        state_name -> Nullable<Text>,
    }
}

diesel::table! {
    landuse_dim (id) {
        id -> Integer,
        code -> Text,
        display_name -> Text,
        category_class -> Text,
    }
}

diesel::table! {
    fact_transitions (scenario_id, time_id, geography_id, from_landuse_id, to_landuse_id) {
        scenario_id -> Integer,
        time_id -> Integer,
        geography_id -> Integer,
        from_landuse_id -> Integer,
        to_landuse_id -> Integer,
        area -> Numeric,
        transition_type -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    scenario_dim,
    time_dim,
    geography_dim,
    landuse_dim,
    fact_transitions,
);
