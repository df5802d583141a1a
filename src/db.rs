use std::fmt;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};
use tracing::{info, warn};

use crate::error::Result;
use crate::hash::stable_hash;
use crate::record::Observation;
use crate::settings::Settings;

pub const RAW_TABLE: &str = "raw_air_quality_observations";

pub fn connect(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS raw_air_quality_observations (
            id          INTEGER PRIMARY KEY,
            record      TEXT NOT NULL,
            record_hash TEXT NOT NULL UNIQUE CHECK (length(record_hash) = 64),
            ingested_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX IF NOT EXISTS idx_raw_aq_ingested_at
            ON raw_air_quality_observations(ingested_at);
        ",
    )?;
    Ok(())
}

/// Rows reported as inserted by one `insert_raw` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertCount {
    /// The store told inserted rows apart from skipped duplicates.
    Exact(usize),
    /// Affected rows only; not a count of new dedup keys.
    Approximate(usize),
}

impl InsertCount {
    pub fn rows(self) -> usize {
        match self {
            InsertCount::Exact(n) | InsertCount::Approximate(n) => n,
        }
    }

    pub fn is_exact(self) -> bool {
        matches!(self, InsertCount::Exact(_))
    }
}

impl fmt::Display for InsertCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsertCount::Exact(n) => write!(f, "{}", n),
            InsertCount::Approximate(n) => write!(f, "~{}", n),
        }
    }
}

/// Appends observations to the raw log, one connection per call.
pub struct Ingestor {
    database_path: PathBuf,
}

impl Ingestor {
    pub fn new(settings: &Settings) -> Self {
        Ingestor::at(settings.database_path.clone())
    }

    pub fn at(database_path: impl Into<PathBuf>) -> Self {
        Ingestor {
            database_path: database_path.into(),
        }
    }

    /// Insert every record not already in the log, keyed on its dedup hash.
    ///
    /// The batch commits as one transaction. Requires the log table to exist;
    /// without a unique index on `record_hash` nothing is deduplicated and the
    /// count comes back as [`InsertCount::Approximate`].
    pub fn insert_raw(&self, records: &[Observation]) -> Result<InsertCount> {
        if records.is_empty() {
            return Ok(InsertCount::Exact(0));
        }

        let rows = records
            .iter()
            .map(|r| Ok((r.to_payload()?, stable_hash(r))))
            .collect::<Result<Vec<_>>>()?;

        let mut conn = connect(&self.database_path)?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO raw_air_quality_observations (record, record_hash)
                 VALUES (?1, ?2)",
            )?;
            for (payload, hash) in &rows {
                inserted += stmt.execute(params![payload, hash.as_str()])?;
            }
        }
        let deduplicated = has_unique_hash_index(&tx)?;
        tx.commit()?;

        info!(
            "Inserted {} of {} records into {}",
            inserted,
            rows.len(),
            RAW_TABLE
        );
        if deduplicated {
            Ok(InsertCount::Exact(inserted))
        } else {
            warn!("{} has no unique index on record_hash; duplicates were not skipped", RAW_TABLE);
            Ok(InsertCount::Approximate(inserted))
        }
    }
}

/// Whether some unique index covers exactly the `record_hash` column.
pub fn has_unique_hash_index(conn: &Connection) -> Result<bool> {
    let found: bool = conn.query_row(
        "SELECT EXISTS (
             SELECT 1 FROM pragma_index_list('raw_air_quality_observations') AS il
             WHERE il.\"unique\" = 1
               AND (SELECT COUNT(*) FROM pragma_index_info(il.name)) = 1
               AND (SELECT name FROM pragma_index_info(il.name)) = 'record_hash'
         )",
        [],
        |r| r.get(0),
    )?;
    Ok(found)
}

// ── Stats ──

pub struct LogStats {
    pub rows: usize,
    pub distinct_hashes: usize,
    pub first_ingested: Option<String>,
    pub last_ingested: Option<String>,
}

pub fn log_stats(conn: &Connection) -> Result<LogStats> {
    let stats = conn.query_row(
        "SELECT COUNT(*), COUNT(DISTINCT record_hash), MIN(ingested_at), MAX(ingested_at)
         FROM raw_air_quality_observations",
        [],
        |r| {
            Ok(LogStats {
                rows: r.get(0)?,
                distinct_hashes: r.get(1)?,
                first_ingested: r.get(2)?,
                last_ingested: r.get(3)?,
            })
        },
    )?;
    Ok(stats)
}
