//! Append-only SQLite store for analysis runs.
//!
//! Two tables: `runs` holds one row per run with the full scored payload as a
//! self-describing JSON blob, `run_sets` is a compact per-set projection that
//! powers the history list and per-set views without decoding the blob. Both
//! rows of an append commit in one transaction; run ids come from
//! AUTOINCREMENT and are strictly monotonic.
//!
//! WAL mode keeps reads tolerant of concurrent appends.

use std::path::Path;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::models::{
    AnalysisResult, RunDetail, RunSetRow, RunSummary, RunSummaryStats,
};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS runs (
    run_id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp INTEGER NOT NULL,
    date_string TEXT NOT NULL,
    strategy TEXT NOT NULL,
    execution_mode TEXT NOT NULL,
    total_sets INTEGER NOT NULL,
    profitable_sets INTEGER NOT NULL,
    payload_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS run_sets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL REFERENCES runs(run_id),
    set_slug TEXT NOT NULL,
    set_name TEXT NOT NULL,
    profit_margin REAL NOT NULL,
    lowest_price REAL NOT NULL,
    UNIQUE(run_id, set_slug)
);

CREATE INDEX IF NOT EXISTS idx_run_sets_run_id ON run_sets(run_id);
CREATE INDEX IF NOT EXISTS idx_run_sets_set_slug ON run_sets(set_slug);
CREATE INDEX IF NOT EXISTS idx_runs_timestamp ON runs(timestamp);

CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
) WITHOUT ROWID;
"#;

const SCHEMA_VERSION: i64 = 1;

/// Unique set identity observed across all runs.
#[derive(Debug, Clone, Serialize)]
pub struct SetInfo {
    pub slug: String,
    pub name: String,
}

/// One historical data point for a set.
#[derive(Debug, Clone, Serialize)]
pub struct SetHistoryEntry {
    pub date_string: String,
    pub timestamp: i64,
    pub profit_margin: f64,
    pub lowest_price: f64,
}

/// Aggregate store statistics for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_runs: usize,
    pub total_set_records: usize,
    pub database_size_bytes: u64,
    pub first_run: Option<i64>,
    pub last_run: Option<i64>,
    pub time_span_days: Option<f64>,
}

pub struct RunStore {
    conn: Mutex<Connection>,
    path: String,
}

impl RunStore {
    pub fn new(path: &str) -> Result<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
            Connection::open_with_flags(path, flags)?
        };

        conn.execute_batch(SCHEMA_SQL)?;
        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )?;

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))?;
        info!(path, existing_runs = count, "Run store initialized");

        Ok(RunStore {
            conn: Mutex::new(conn),
            path: path.to_string(),
        })
    }

    /// Append a run atomically: the `runs` row and every `run_sets` row
    /// commit together. Returns the new run id.
    pub fn append(&self, result: &AnalysisResult) -> Result<i64> {
        let payload = serde_json::to_string(result)
            .map_err(|e| EngineError::Storage(format!("payload serialize: {e}")))?;
        let timestamp = result.timestamp.timestamp();
        let date_string = result.timestamp.format("%Y-%m-%d %H:%M:%S").to_string();

        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "INSERT INTO runs (timestamp, date_string, strategy, execution_mode, total_sets, profitable_sets, payload_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                timestamp,
                date_string,
                result.strategy.as_str(),
                result.execution_mode.as_str(),
                result.total_sets as i64,
                result.profitable_sets as i64,
                payload,
            ],
        )?;
        let run_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO run_sets (run_id, set_slug, set_name, profit_margin, lowest_price)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for set in &result.sets {
                stmt.execute(params![
                    run_id,
                    set.set_slug,
                    set.set_name,
                    set.profit_margin,
                    set.set_price,
                ])?;
            }
        }

        tx.commit()?;
        debug!(run_id, sets = result.sets.len(), "Run appended");
        Ok(run_id)
    }

    pub fn run_count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn latest_run_id(&self) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        let id = conn
            .query_row("SELECT MAX(run_id) FROM runs", [], |row| {
                row.get::<_, Option<i64>>(0)
            })?;
        Ok(id)
    }

    /// Paginated run summaries, newest first.
    pub fn list(&self, page: usize, page_size: usize) -> Result<(Vec<RunSummary>, usize)> {
        if page == 0 || page_size == 0 {
            return Err(EngineError::Invariant(
                "page and page_size must be positive".to_string(),
            ));
        }

        let conn = self.conn.lock();
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))?;

        let offset = (page - 1) * page_size;
        let mut stmt = conn.prepare_cached(
            "SELECT r.run_id, r.timestamp, r.date_string, r.strategy, r.execution_mode,
                    r.total_sets, r.profitable_sets,
                    COALESCE(AVG(s.profit_margin), 0), COALESCE(MAX(s.profit_margin), 0)
             FROM runs r
             LEFT JOIN run_sets s ON s.run_id = r.run_id
             GROUP BY r.run_id
             ORDER BY r.run_id DESC
             LIMIT ?1 OFFSET ?2",
        )?;

        let summaries = stmt
            .query_map(params![page_size as i64, offset as i64], |row| {
                Ok(RunSummary {
                    run_id: row.get(0)?,
                    timestamp: row.get(1)?,
                    date_string: row.get(2)?,
                    strategy: row.get(3)?,
                    execution_mode: row.get(4)?,
                    set_count: row.get::<_, i64>(5)? as usize,
                    profitable_sets: row.get::<_, i64>(6)? as usize,
                    avg_profit: row.get(7)?,
                    max_profit: row.get(8)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok((summaries, total as usize))
    }

    /// Run detail from the compact projection; `None` if the run is unknown.
    pub fn get(&self, run_id: i64) -> Result<Option<RunDetail>> {
        let conn = self.conn.lock();

        let header = conn
            .query_row(
                "SELECT timestamp, date_string, strategy, execution_mode, profitable_sets
                 FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .map(Some)
            .or_else(ignore_no_rows)?;

        let Some((timestamp, date_string, strategy, execution_mode, profitable)) = header else {
            return Ok(None);
        };

        let mut stmt = conn.prepare_cached(
            "SELECT set_slug, set_name, profit_margin, lowest_price
             FROM run_sets WHERE run_id = ?1
             ORDER BY profit_margin DESC, set_slug",
        )?;
        let sets = stmt
            .query_map(params![run_id], |row| {
                Ok(RunSetRow {
                    set_slug: row.get(0)?,
                    set_name: row.get(1)?,
                    profit_margin: row.get(2)?,
                    lowest_price: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let summary = summarize(&sets, profitable as usize);
        Ok(Some(RunDetail {
            run_id,
            timestamp,
            date_string,
            strategy,
            execution_mode,
            sets,
            summary,
        }))
    }

    /// Full scored payload for faithful replay.
    pub fn get_full(&self, run_id: i64) -> Result<Option<AnalysisResult>> {
        let conn = self.conn.lock();
        let payload = conn
            .query_row(
                "SELECT payload_json FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| row.get::<_, String>(0),
            )
            .map(Some)
            .or_else(ignore_no_rows)?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        let mut result: AnalysisResult = serde_json::from_str(&payload)
            .map_err(|e| EngineError::Storage(format!("payload for run {run_id}: {e}")))?;
        result.run_id = Some(run_id);
        result.cached = true;
        Ok(Some(result))
    }

    /// All distinct sets ever recorded, ordered by name.
    pub fn all_sets(&self) -> Result<Vec<SetInfo>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT DISTINCT set_slug, set_name FROM run_sets ORDER BY set_name",
        )?;
        let sets = stmt
            .query_map([], |row| {
                Ok(SetInfo {
                    slug: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sets)
    }

    /// Most recent data points for one set, newest first.
    pub fn set_history(&self, set_slug: &str, limit: usize) -> Result<Vec<SetHistoryEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT r.date_string, r.timestamp, s.profit_margin, s.lowest_price
             FROM run_sets s JOIN runs r ON s.run_id = r.run_id
             WHERE s.set_slug = ?1
             ORDER BY r.run_id DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![set_slug, limit as i64], row_to_history)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Data points for one set over the trailing `days`, oldest first.
    pub fn profit_trends(&self, set_slug: &str, days: u32) -> Result<Vec<SetHistoryEntry>> {
        let cutoff = Utc::now().timestamp() - i64::from(days) * 86_400;
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT r.date_string, r.timestamp, s.profit_margin, s.lowest_price
             FROM run_sets s JOIN runs r ON s.run_id = r.run_id
             WHERE s.set_slug = ?1 AND r.timestamp >= ?2
             ORDER BY r.run_id ASC",
        )?;
        let rows = stmt
            .query_map(params![set_slug, cutoff], row_to_history)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock();
        let total_runs: i64 = conn.query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))?;
        let total_set_records: i64 =
            conn.query_row("SELECT COUNT(*) FROM run_sets", [], |row| row.get(0))?;
        let (first_run, last_run): (Option<i64>, Option<i64>) = conn.query_row(
            "SELECT MIN(timestamp), MAX(timestamp) FROM runs",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let database_size_bytes = if self.path == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        let time_span_days = match (first_run, last_run) {
            (Some(first), Some(last)) if last > first => {
                Some((last - first) as f64 / 86_400.0)
            }
            _ => None,
        };

        Ok(StoreStats {
            total_runs: total_runs as usize,
            total_set_records: total_set_records as usize,
            database_size_bytes,
            first_run,
            last_run,
            time_span_days,
        })
    }

    /// Structured export of every run for offline analysis.
    pub fn export_json(&self) -> Result<serde_json::Value> {
        let runs = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare_cached(
                "SELECT run_id, timestamp, date_string, strategy, execution_mode
                 FROM runs ORDER BY run_id ASC",
            )?;
            let headers = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut runs = Vec::with_capacity(headers.len());
            let mut set_stmt = conn.prepare_cached(
                "SELECT set_slug, set_name, profit_margin, lowest_price
                 FROM run_sets WHERE run_id = ?1 ORDER BY set_name",
            )?;
            for (run_id, timestamp, date_string, strategy, execution_mode) in headers {
                let sets = set_stmt
                    .query_map(params![run_id], |row| {
                        Ok(RunSetRow {
                            set_slug: row.get(0)?,
                            set_name: row.get(1)?,
                            profit_margin: row.get(2)?,
                            lowest_price: row.get(3)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                let profitable = sets.iter().filter(|s| s.profit_margin > 0.0).count();
                let summary = summarize(&sets, profitable);
                runs.push(serde_json::json!({
                    "run_info": {
                        "run_id": run_id,
                        "timestamp": timestamp,
                        "date_string": date_string,
                        "strategy": strategy,
                        "execution_mode": execution_mode,
                    },
                    "set_profits": sets,
                    "summary": summary,
                }));
            }
            runs
        };

        Ok(serde_json::json!({
            "metadata": {
                "export_timestamp": Utc::now().timestamp(),
                "export_date": Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
                "total_runs": runs.len(),
                "database_path": self.path,
            },
            "market_runs": runs,
        }))
    }

    /// Write the full export to `path` (overwriting the previous export).
    pub fn save_export(&self, path: &Path) -> Result<()> {
        let export = self.export_json()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_vec_pretty(&export)?)?;
        Ok(())
    }
}

fn row_to_history(row: &rusqlite::Row) -> rusqlite::Result<SetHistoryEntry> {
    Ok(SetHistoryEntry {
        date_string: row.get(0)?,
        timestamp: row.get(1)?,
        profit_margin: row.get(2)?,
        lowest_price: row.get(3)?,
    })
}

fn summarize(sets: &[RunSetRow], profitable: usize) -> RunSummaryStats {
    let margins: Vec<f64> = sets.iter().map(|s| s.profit_margin).collect();
    RunSummaryStats {
        total_sets: sets.len(),
        profitable_sets: profitable,
        average_profit: if margins.is_empty() {
            0.0
        } else {
            margins.iter().sum::<f64>() / margins.len() as f64
        },
        max_profit: margins.iter().copied().fold(f64::NEG_INFINITY, f64::max).max(0.0),
        min_profit: margins.iter().copied().fold(f64::INFINITY, f64::min).min(0.0),
    }
}

fn ignore_no_rows<T>(err: rusqlite::Error) -> std::result::Result<Option<T>, rusqlite::Error> {
    match err {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other),
    }
}
