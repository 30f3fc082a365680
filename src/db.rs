// 🗄️ SQLite History Store - durable assignment ledger + run lock
//
// Tables:
//   assignment_history  append-only, unique idempotency hash
//   rotation_runs       one summary row per finished run
//   run_lock            at most one row: the run currently in progress

use crate::entities::TaxIdRoot;
use crate::error::{RotationError, RotationResult};
use crate::history::{AssignmentRecord, CommitStats, HistoryStore, RunSummary};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::Path;

pub fn setup_database(conn: &Connection) -> RotationResult<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignment_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            idempotency_hash TEXT UNIQUE NOT NULL,
            raiz_cnpj TEXT NOT NULL,
            representative TEXT NOT NULL,
            assigned_on TEXT NOT NULL,
            run_id TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS rotation_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT UNIQUE NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            rotated INTEGER NOT NULL,
            leftover INTEGER NOT NULL,
            committed INTEGER NOT NULL,
            complete INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS run_lock (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            run_id TEXT NOT NULL,
            started_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_history_root ON assignment_history(raiz_cnpj)",
        [],
    )?;

    Ok(())
}

fn root_from_row(idx: usize, raw: String) -> rusqlite::Result<TaxIdRoot> {
    TaxIdRoot::parse(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn insert_record(conn: &Connection, record: &AssignmentRecord) -> RotationResult<bool> {
    let result = conn.execute(
        "INSERT INTO assignment_history (
            idempotency_hash, raiz_cnpj, representative, assigned_on, run_id
        ) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record.compute_idempotency_hash(),
            record.raiz_cnpj.as_str(),
            record.representative,
            record.assigned_on,
            record.run_id,
        ],
    );

    match result {
        Ok(_) => Ok(true),
        Err(ref e) if is_constraint_violation(e) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

pub struct SqliteHistoryStore {
    conn: Connection,
}

impl SqliteHistoryStore {
    pub fn open<P: AsRef<Path>>(path: P) -> RotationResult<Self> {
        let conn = Connection::open(path.as_ref()).map_err(|e| {
            RotationError::persistence(format!("cannot open {:?}: {}", path.as_ref(), e))
        })?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> RotationResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> RotationResult<Self> {
        setup_database(&conn)?;
        Ok(SqliteHistoryStore { conn })
    }

    pub fn verify_count(&self) -> RotationResult<i64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM assignment_history", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Run currently holding the lock, if any.
    pub fn lock_holder(&self) -> RotationResult<Option<(String, String)>> {
        let holder = self
            .conn
            .query_row("SELECT run_id, started_at FROM run_lock WHERE id = 1", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .optional()?;
        Ok(holder)
    }

    /// Drop a lock left behind by a crashed run. Returns the released run id.
    pub fn force_unlock(&self) -> RotationResult<Option<String>> {
        let holder = self.lock_holder()?;
        self.conn.execute("DELETE FROM run_lock", [])?;
        Ok(holder.map(|(run_id, _)| run_id))
    }

    /// Most recent finished runs, newest first.
    pub fn recent_runs(&self, limit: usize) -> RotationResult<Vec<RunSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, started_at, finished_at, rotated, leftover, committed, complete
             FROM rotation_runs
             ORDER BY id DESC
             LIMIT ?1",
        )?;

        let runs = stmt
            .query_map([limit as i64], |row| {
                Ok(RunSummary {
                    run_id: row.get(0)?,
                    started_at: row.get::<_, DateTime<Utc>>(1)?,
                    finished_at: row.get::<_, DateTime<Utc>>(2)?,
                    rotated: row.get::<_, i64>(3)? as usize,
                    leftover: row.get::<_, i64>(4)? as usize,
                    committed: row.get::<_, i64>(5)? as usize,
                    complete: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(runs)
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn record(&mut self, record: &AssignmentRecord) -> RotationResult<bool> {
        insert_record(&self.conn, record)
    }

    fn history_for(&self, root: &TaxIdRoot) -> RotationResult<BTreeSet<String>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT DISTINCT representative FROM assignment_history WHERE raiz_cnpj = ?1",
        )?;

        let holders = stmt
            .query_map([root.as_str()], |row| row.get::<_, String>(0))?
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok(holders)
    }

    fn records_for(&self, root: &TaxIdRoot) -> RotationResult<Vec<AssignmentRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT raiz_cnpj, representative, assigned_on, run_id
             FROM assignment_history
             WHERE raiz_cnpj = ?1
             ORDER BY assigned_on, id",
        )?;

        let records = stmt
            .query_map([root.as_str()], |row| {
                Ok(AssignmentRecord {
                    raiz_cnpj: root_from_row(0, row.get(0)?)?,
                    representative: row.get(1)?,
                    assigned_on: row.get::<_, NaiveDate>(2)?,
                    run_id: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Single SQL transaction: either the whole batch lands or none of it.
    fn record_batch(&mut self, records: &[AssignmentRecord]) -> RotationResult<CommitStats> {
        let tx = self.conn.transaction()?;
        let mut stats = CommitStats::default();

        for record in records {
            if insert_record(&tx, record)? {
                stats.inserted += 1;
            } else {
                stats.duplicates += 1;
            }
        }

        tx.commit()?;
        Ok(stats)
    }

    fn begin_run(&mut self, run_id: &str) -> RotationResult<()> {
        let started_at = Utc::now().to_rfc3339();
        let result = self.conn.execute(
            "INSERT INTO run_lock (id, run_id, started_at) VALUES (1, ?1, ?2)",
            params![run_id, started_at],
        );

        match result {
            Ok(_) => Ok(()),
            Err(ref e) if is_constraint_violation(e) => {
                let (holder, started_at) = self
                    .lock_holder()?
                    .unwrap_or_else(|| ("unknown".to_string(), "unknown".to_string()));
                Err(RotationError::RunInProgress { holder, started_at })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn finish_run(&mut self, summary: &RunSummary) -> RotationResult<()> {
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO rotation_runs (
                run_id, started_at, finished_at, rotated, leftover, committed, complete
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                summary.run_id,
                summary.started_at,
                summary.finished_at,
                summary.rotated as i64,
                summary.leftover as i64,
                summary.committed as i64,
                summary.complete,
            ],
        )?;
        tx.execute("DELETE FROM run_lock WHERE run_id = ?1", [&summary.run_id])?;

        tx.commit()?;
        Ok(())
    }
}
