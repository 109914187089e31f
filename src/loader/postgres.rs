//! PostgreSQL batch sink: row-by-row inserts and COPY-based bulk load.
//!
//! Both paths commit a batch inside one transaction, dimensions before
//! facts so foreign keys never reference a row that does not exist yet.
//! The bulk path spools each relation's rows to a CSV exchange file and
//! issues a single `COPY ... FROM` per relation per batch, which is where
//! the order-of-magnitude throughput over per-row inserts comes from.

use diesel::pg::CopyFormat;
use diesel::prelude::*;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

use crate::ddl;
use crate::error::ConvertError;
use crate::loader::database::{Database, DbConnection};
use crate::loader::exchange;
use crate::loader::{Batch, BatchSink, LoadMode};
use crate::model::DimensionRows;
use crate::schema::{fact_transitions, geography_dim, landuse_dim, scenario_dim, time_dim};

/// Rows per INSERT statement on the row path, kept well under the
/// PostgreSQL bind-parameter limit.
const ROW_INSERT_CHUNK: usize = 1_000;

/// Batch sink writing to the PostgreSQL analytical store.
pub struct PgSink {
    db: Database,
    exchange_dir: PathBuf,
}

impl PgSink {
    /// Connect to the target store and verify connectivity.
    pub fn connect(database_url: &str) -> Result<Self, ConvertError> {
        let db = Database::new(database_url)?;
        db.test_connection()?;
        Ok(Self {
            db,
            exchange_dir: std::env::temp_dir(),
        })
    }

    /// Directory the CSV exchange files are spooled to.
    pub fn with_exchange_dir(mut self, dir: PathBuf) -> Self {
        self.exchange_dir = dir;
        self
    }

    fn commit_rows(&self, conn: &mut DbConnection, batch: &Batch) -> Result<(), ConvertError> {
        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            let dims = &batch.dimensions;
            if !dims.scenarios.is_empty() {
                diesel::insert_into(scenario_dim::table)
                    .values(&dims.scenarios)
                    .on_conflict_do_nothing()
                    .execute(conn)?;
            }
            if !dims.periods.is_empty() {
                diesel::insert_into(time_dim::table)
                    .values(&dims.periods)
                    .on_conflict_do_nothing()
                    .execute(conn)?;
            }
            if !dims.geographies.is_empty() {
                diesel::insert_into(geography_dim::table)
                    .values(&dims.geographies)
                    .on_conflict_do_nothing()
                    .execute(conn)?;
            }
            if !dims.landuses.is_empty() {
                diesel::insert_into(landuse_dim::table)
                    .values(&dims.landuses)
                    .on_conflict_do_nothing()
                    .execute(conn)?;
            }
            for chunk in batch.facts.chunks(ROW_INSERT_CHUNK) {
                diesel::insert_into(fact_transitions::table)
                    .values(chunk)
                    .execute(conn)?;
            }
            Ok(())
        })?;
        Ok(())
    }

    fn commit_bulk(&self, conn: &mut DbConnection, batch: &Batch) -> Result<(), ConvertError> {
        let dims = &batch.dimensions;

        // Spool every relation's exchange file before opening the
        // transaction, so only COPY runs inside it
        let scenarios = self.spool(exchange::render_lines(&dims.scenarios, exchange::scenario_record))?;
        let periods = self.spool(exchange::render_lines(&dims.periods, exchange::period_record))?;
        let geographies = self.spool(exchange::render_lines(&dims.geographies, exchange::geography_record))?;
        let landuses = self.spool(exchange::render_lines(&dims.landuses, exchange::landuse_record))?;
        let facts = self.spool(exchange::render_lines(&batch.facts, exchange::fact_record))?;

        conn.transaction::<_, diesel::result::Error, _>(|conn| {
            if let Some((_file, bytes)) = scenarios {
                copy_scenarios(conn, bytes)?;
            }
            if let Some((_file, bytes)) = periods {
                copy_periods(conn, bytes)?;
            }
            if let Some((_file, bytes)) = geographies {
                copy_geographies(conn, bytes)?;
            }
            if let Some((_file, bytes)) = landuses {
                copy_landuses(conn, bytes)?;
            }
            if let Some((_file, bytes)) = facts {
                let copied = copy_facts(conn, bytes)?;
                tracing::debug!(rows = copied, "fact batch copied");
            }
            Ok(())
        })?;
        Ok(())
    }

    /// Write rendered CSV to an exchange file and read it back for COPY.
    /// The file handle rides along so the file outlives the copy.
    fn spool(&self, csv: String) -> Result<Option<(NamedTempFile, Vec<u8>)>, ConvertError> {
        if csv.is_empty() {
            return Ok(None);
        }
        let mut file = NamedTempFile::new_in(&self.exchange_dir)?;
        file.write_all(csv.as_bytes())?;
        file.flush()?;
        let bytes = fs::read(file.path())?;
        Ok(Some((file, bytes)))
    }
}

impl BatchSink for PgSink {
    fn ensure_schema(&mut self) -> Result<(), ConvertError> {
        let mut conn = self.db.get_connection()?;
        ddl::create_tables(&mut conn)?;
        Ok(())
    }

    fn commit(&mut self, batch: &Batch, mode: LoadMode) -> Result<(), ConvertError> {
        let mut conn = self.db.get_connection()?;
        match mode {
            LoadMode::Row => self.commit_rows(&mut conn, batch),
            LoadMode::Bulk => self.commit_bulk(&mut conn, batch),
        }
    }

    fn fetch_dimensions(&mut self) -> Result<DimensionRows, ConvertError> {
        let mut conn = self.db.get_connection()?;
        Ok(DimensionRows {
            scenarios: scenario_dim::table
                .order(scenario_dim::id.asc())
                .load(&mut conn)?,
            periods: time_dim::table.order(time_dim::id.asc()).load(&mut conn)?,
            geographies: geography_dim::table
                .order(geography_dim::id.asc())
                .load(&mut conn)?,
            landuses: landuse_dim::table
                .order(landuse_dim::id.asc())
                .load(&mut conn)?,
        })
    }

    fn delete_facts_after(&mut self, geography_id: i32) -> Result<(), ConvertError> {
        let mut conn = self.db.get_connection()?;
        let removed = diesel::delete(
            fact_transitions::table.filter(fact_transitions::geography_id.gt(geography_id)),
        )
        .execute(&mut conn)?;
        if removed > 0 {
            tracing::info!(rows = removed, "removed facts past the checkpoint cursor");
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), ConvertError> {
        let mut conn = self.db.get_connection()?;
        ddl::finalize_store(&mut conn)?;
        Ok(())
    }
}

fn copy_scenarios(conn: &mut DbConnection, bytes: Vec<u8>) -> QueryResult<usize> {
    diesel::copy_from(scenario_dim::table)
        .from_raw_data(scenario_dim::table, move |copy| {
            copy.write_all(&bytes).map_err(io_to_diesel)
        })
        .with_format(CopyFormat::Csv)
        .execute(conn)
}

fn copy_periods(conn: &mut DbConnection, bytes: Vec<u8>) -> QueryResult<usize> {
    diesel::copy_from(time_dim::table)
        .from_raw_data(time_dim::table, move |copy| {
            copy.write_all(&bytes).map_err(io_to_diesel)
        })
        .with_format(CopyFormat::Csv)
        .execute(conn)
}

fn copy_geographies(conn: &mut DbConnection, bytes: Vec<u8>) -> QueryResult<usize> {
    diesel::copy_from(geography_dim::table)
        .from_raw_data(geography_dim::table, move |copy| {
            copy.write_all(&bytes).map_err(io_to_diesel)
        })
        .with_format(CopyFormat::Csv)
        .execute(conn)
}

fn copy_landuses(conn: &mut DbConnection, bytes: Vec<u8>) -> QueryResult<usize> {
    diesel::copy_from(landuse_dim::table)
        .from_raw_data(landuse_dim::table, move |copy| {
            copy.write_all(&bytes).map_err(io_to_diesel)
        })
        .with_format(CopyFormat::Csv)
        .execute(conn)
}

fn copy_facts(conn: &mut DbConnection, bytes: Vec<u8>) -> QueryResult<usize> {
    diesel::copy_from(fact_transitions::table)
        .from_raw_data(fact_transitions::table, move |copy| {
            copy.write_all(&bytes).map_err(io_to_diesel)
        })
        .with_format(CopyFormat::Csv)
        .execute(conn)
}

fn io_to_diesel(err: std::io::Error) -> diesel::result::Error {
    diesel::result::Error::SerializationError(Box::new(err))
}
