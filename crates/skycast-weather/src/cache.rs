//! SQLite-backed forecast history.
//!
//! Records are append-only. A lookup only returns rows younger than the TTL;
//! older rows stay on disk for history until pruned.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use skycast_core::{DatabaseError, ForecastError, RusqliteErrorExt};
use std::path::Path;

use crate::types::{DailyForecast, ForecastRecord, Freshness};

const RECORD_COLUMNS: &str = "id, raw_address, normalized_key, postal_code, current_temp_c, \
     high_temp_c, low_temp_c, conditions, extended_forecast, timezone, queried_at_ms";

/// Persistent forecast cache.
pub struct ForecastCache {
    conn: Mutex<Connection>,
    ttl: Duration,
}

impl std::fmt::Debug for ForecastCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForecastCache").field("ttl", &self.ttl).finish()
    }
}

impl ForecastCache {
    /// Open (or create) the cache at `path`.
    pub fn new<P: AsRef<Path>>(path: P, ttl: Duration) -> Result<Self, ForecastError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::ConnectionFailed(format!("{}: {}", parent.display(), e))
            })?;
        }
        let conn = Connection::open(path).map_err(|e| e.into_database_error())?;
        Self::with_connection(conn, ttl)
    }

    /// In-memory cache; nothing survives the process.
    pub fn in_memory(ttl: Duration) -> Result<Self, ForecastError> {
        let conn = Connection::open_in_memory().map_err(|e| e.into_database_error())?;
        Self::with_connection(conn, ttl)
    }

    fn with_connection(conn: Connection, ttl: Duration) -> Result<Self, ForecastError> {
        let cache = Self {
            conn: Mutex::new(conn),
            ttl,
        };
        cache.init_schema()?;
        Ok(cache)
    }

    fn init_schema(&self) -> Result<(), ForecastError> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS forecasts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                raw_address TEXT NOT NULL,
                normalized_key TEXT NOT NULL,
                postal_code TEXT,
                current_temp_c INTEGER NOT NULL,
                high_temp_c INTEGER NOT NULL,
                low_temp_c INTEGER NOT NULL,
                conditions TEXT NOT NULL,
                extended_forecast TEXT NOT NULL,
                timezone TEXT,
                queried_at_ms INTEGER NOT NULL
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_forecasts_postal_time
                ON forecasts(postal_code, queried_at_ms);
            CREATE INDEX IF NOT EXISTS idx_forecasts_key_time
                ON forecasts(normalized_key, queried_at_ms);
            "#,
        )?;
        Ok(())
    }

    /// Newest record for `key` that is still inside the TTL.
    pub fn lookup(&self, key: &str) -> Result<Option<ForecastRecord>, ForecastError> {
        self.lookup_at(key, Utc::now())
    }

    /// [`lookup`](Self::lookup) against an explicit clock.
    pub fn lookup_at(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ForecastRecord>, ForecastError> {
        let cutoff = (now - self.ttl).timestamp_millis();
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM forecasts
             WHERE (postal_code = ?1 OR normalized_key = ?1) AND queried_at_ms > ?2
             ORDER BY queried_at_ms DESC, id DESC
             LIMIT 1",
            RECORD_COLUMNS
        ))?;
        let record = stmt
            .query_row(params![key, cutoff], Self::row_to_record)
            .optional()?;
        Ok(record)
    }

    /// Newest record for `key` regardless of age.
    pub fn latest(&self, key: &str) -> Result<Option<ForecastRecord>, ForecastError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM forecasts
             WHERE postal_code = ?1 OR normalized_key = ?1
             ORDER BY queried_at_ms DESC, id DESC
             LIMIT 1",
            RECORD_COLUMNS
        ))?;
        let record = stmt
            .query_row(params![key], Self::row_to_record)
            .optional()?;
        Ok(record)
    }

    /// Insert a record. Returns the stored copy with its id, or `None` when a
    /// record with the same postal code and timestamp already exists.
    pub fn store(&self, record: &ForecastRecord) -> Result<Option<ForecastRecord>, ForecastError> {
        let extended = serde_json::to_string(&record.extended_forecast)
            .map_err(|e| DatabaseError::QueryFailed(format!("encode forecast: {}", e)))?;

        let conn = self.conn.lock();
        let inserted = conn.execute(
            r#"
            INSERT OR IGNORE INTO forecasts
            (raw_address, normalized_key, postal_code, current_temp_c, high_temp_c, low_temp_c,
             conditions, extended_forecast, timezone, queried_at_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                record.raw_address,
                record.normalized_key,
                record.postal_code,
                record.current_temp_c,
                record.high_temp_c,
                record.low_temp_c,
                record.conditions,
                extended,
                record.timezone,
                record.queried_at.timestamp_millis(),
            ],
        )?;

        if inserted == 0 {
            tracing::debug!(
                "Forecast for {:?} at {} already stored",
                record.postal_code,
                record.queried_at
            );
            return Ok(None);
        }

        let mut stored = record.clone();
        stored.id = Some(conn.last_insert_rowid());
        // Round-trip precision: the column holds milliseconds
        stored.queried_at = millis_to_datetime(record.queried_at.timestamp_millis())?;
        Ok(Some(stored))
    }

    /// Classify `record` against this cache's TTL.
    pub fn freshness(&self, record: &ForecastRecord, now: DateTime<Utc>) -> Freshness {
        record.freshness(now, self.ttl)
    }

    pub fn count(&self) -> Result<usize, ForecastError> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM forecasts", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }

    /// Delete every record. Returns the number removed.
    pub fn clear(&self) -> Result<usize, ForecastError> {
        let removed = self.conn.lock().execute("DELETE FROM forecasts", [])?;
        tracing::info!("Cleared {} cached forecasts", removed);
        Ok(removed)
    }

    /// Delete records queried before `cutoff`. Returns the number removed.
    pub fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, ForecastError> {
        let removed = self.conn.lock().execute(
            "DELETE FROM forecasts WHERE queried_at_ms < ?1",
            params![cutoff.timestamp_millis()],
        )?;
        if removed > 0 {
            tracing::info!("Pruned {} forecasts older than {}", removed, cutoff);
        }
        Ok(removed)
    }

    fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ForecastRecord> {
        let extended: String = row.get(8)?;
        let extended_forecast: Vec<DailyForecast> =
            serde_json::from_str(&extended).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    8,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;
        let millis: i64 = row.get(10)?;
        let queried_at = DateTime::from_timestamp_millis(millis).ok_or_else(|| {
            rusqlite::Error::IntegralValueOutOfRange(10, millis)
        })?;

        Ok(ForecastRecord {
            id: Some(row.get(0)?),
            raw_address: row.get(1)?,
            normalized_key: row.get(2)?,
            postal_code: row.get(3)?,
            current_temp_c: row.get(4)?,
            high_temp_c: row.get(5)?,
            low_temp_c: row.get(6)?,
            conditions: row.get(7)?,
            extended_forecast,
            timezone: row.get(9)?,
            queried_at,
        })
    }
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>, ForecastError> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        DatabaseError::Corruption(format!("timestamp out of range: {}", millis)).into()
    })
}
