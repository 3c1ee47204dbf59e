use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::settings::PartitionConfig;

pub const NOT_AVAILABLE: &str = "N/A";

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let conn =
        Connection::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS partitions (
            name       TEXT PRIMARY KEY,
            entry_url  TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS records (
            id                  INTEGER PRIMARY KEY,
            partition           TEXT NOT NULL REFERENCES partitions(name),
            url                 TEXT NOT NULL,
            status              INTEGER NOT NULL DEFAULT 0 CHECK(status IN (0, 1)),
            name                TEXT,
            address             TEXT,
            phone               TEXT,
            company_type        TEXT,
            trades_and_services TEXT,
            market_sectors      TEXT,
            attempts            INTEGER NOT NULL DEFAULT 0,
            last_error          TEXT,
            discovered_at       TEXT NOT NULL DEFAULT (datetime('now')),
            processed_at        TEXT,
            UNIQUE(partition, url)
        );
        CREATE INDEX IF NOT EXISTS idx_records_status ON records(status);

        CREATE TABLE IF NOT EXISTS runs (
            id          INTEGER PRIMARY KEY,
            run_id      TEXT NOT NULL,
            stage       TEXT NOT NULL CHECK(stage IN ('discover','enrich')),
            started_at  TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            inserted    INTEGER NOT NULL DEFAULT 0,
            processed   INTEGER NOT NULL DEFAULT 0,
            skipped     INTEGER NOT NULL DEFAULT 0,
            failed      INTEGER NOT NULL DEFAULT 0
        );
        ",
    )?;
    Ok(())
}

// ── Partitions ──

/// Register partitions, refreshing entry URLs of ones already known.
pub fn register_partitions(conn: &Connection, partitions: &[PartitionConfig]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO partitions (name, entry_url) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET entry_url = excluded.entry_url",
        )?;
        for p in partitions {
            count += stmt.execute(params![p.name, p.entry_url])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

pub fn list_partitions(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM partitions ORDER BY name")?;
    let rows = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ── Discovery ──

pub fn fetch_known_urls(conn: &Connection, partition: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT url FROM records WHERE partition = ?1")?;
    let rows = stmt
        .query_map([partition], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Insert urls as pending records. Urls already stored for the partition are
/// left untouched; returns how many rows were actually created.
pub fn insert_pending(conn: &Connection, partition: &str, urls: &[String]) -> Result<usize> {
    if urls.is_empty() {
        return Ok(0);
    }
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO records (partition, url, status) VALUES (?1, ?2, 0)",
        )?;
        for url in urls {
            count += stmt.execute(params![partition, url])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

// ── Enrichment ──

#[derive(Debug, Clone)]
pub struct PendingRecord {
    pub id: i64,
    pub partition: String,
    pub url: String,
}

/// Pending records across every partition, grouped by partition and in
/// insertion order within each.
pub fn fetch_pending(
    conn: &Connection,
    limit: Option<usize>,
    max_attempts: Option<u32>,
) -> Result<Vec<PendingRecord>> {
    let sql = format!(
        "SELECT id, partition, url FROM records
         WHERE status = 0 AND (?1 IS NULL OR attempts < ?1)
         ORDER BY partition, id{}",
        match limit {
            Some(n) => format!(" LIMIT {}", n),
            None => String::new(),
        }
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([max_attempts], |row| {
            Ok(PendingRecord {
                id: row.get(0)?,
                partition: row.get(1)?,
                url: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFields {
    pub name: String,
    pub address: String,
    pub phone: String,
    pub company_type: String,
    pub trades_and_services: String,
    pub market_sectors: String,
}

impl Default for RecordFields {
    fn default() -> Self {
        RecordFields {
            name: NOT_AVAILABLE.into(),
            address: NOT_AVAILABLE.into(),
            phone: NOT_AVAILABLE.into(),
            company_type: NOT_AVAILABLE.into(),
            trades_and_services: NOT_AVAILABLE.into(),
            market_sectors: NOT_AVAILABLE.into(),
        }
    }
}

/// Write extracted fields and flip the record to processed. Only pending rows
/// are touched, so a record can never move back and a repeat call is a no-op.
/// Returns whether the row changed.
pub fn mark_processed(
    conn: &Connection,
    partition: &str,
    id: i64,
    fields: &RecordFields,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE records
         SET name = ?3, address = ?4, phone = ?5, company_type = ?6,
             trades_and_services = ?7, market_sectors = ?8,
             status = 1, last_error = NULL, processed_at = datetime('now')
         WHERE id = ?1 AND partition = ?2 AND status = 0",
        params![
            id,
            partition,
            fields.name,
            fields.address,
            fields.phone,
            fields.company_type,
            fields.trades_and_services,
            fields.market_sectors,
        ],
    )?;
    Ok(changed == 1)
}

/// Note a failed attempt; the record stays pending.
pub fn record_failure(conn: &Connection, id: i64, reason: &str) -> Result<()> {
    conn.execute(
        "UPDATE records SET attempts = attempts + 1, last_error = ?2
         WHERE id = ?1 AND status = 0",
        params![id, reason],
    )?;
    Ok(())
}

#[cfg(test)]
#[derive(Debug, Clone)]
pub struct Record {
    pub id: i64,
    pub partition: String,
    pub url: String,
    pub status: i32,
    pub fields: Option<RecordFields>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

#[cfg(test)]
pub fn fetch_record(conn: &Connection, id: i64) -> Result<Option<Record>> {
    use rusqlite::OptionalExtension;

    let record = conn
        .query_row(
            "SELECT id, partition, url, status, name, address, phone, company_type,
                    trades_and_services, market_sectors, attempts, last_error
             FROM records WHERE id = ?1",
            [id],
            |row| {
                let status: i32 = row.get(3)?;
                let fields = if status == 1 {
                    Some(RecordFields {
                        name: row.get(4)?,
                        address: row.get(5)?,
                        phone: row.get(6)?,
                        company_type: row.get(7)?,
                        trades_and_services: row.get(8)?,
                        market_sectors: row.get(9)?,
                    })
                } else {
                    None
                };
                Ok(Record {
                    id: row.get(0)?,
                    partition: row.get(1)?,
                    url: row.get(2)?,
                    status,
                    fields,
                    attempts: row.get(10)?,
                    last_error: row.get(11)?,
                })
            },
        )
        .optional()?;
    Ok(record)
}

// ── Runs ──

pub struct RunRow {
    pub run_id: String,
    pub stage: &'static str,
    pub started_at: String,
    pub finished_at: String,
    pub inserted: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub fn save_run(conn: &Connection, run: &RunRow) -> Result<()> {
    conn.execute(
        "INSERT INTO runs
         (run_id, stage, started_at, finished_at, inserted, processed, skipped, failed)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            run.run_id,
            run.stage,
            run.started_at,
            run.finished_at,
            run.inserted,
            run.processed,
            run.skipped,
            run.failed,
        ],
    )?;
    Ok(())
}

// ── Stats ──

#[derive(Debug, Serialize)]
pub struct PartitionStats {
    pub partition: String,
    pub total: usize,
    pub pending: usize,
    pub processed: usize,
    /// Pending records with at least one failed enrichment attempt.
    pub retrying: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Vec<PartitionStats>> {
    let mut stmt = conn.prepare(
        "SELECT p.name,
                COUNT(r.id),
                COALESCE(SUM(r.status = 0), 0),
                COALESCE(SUM(r.status = 1), 0),
                COALESCE(SUM(r.status = 0 AND r.attempts > 0), 0)
         FROM partitions p
         LEFT JOIN records r ON r.partition = p.name
         GROUP BY p.name
         ORDER BY p.name",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok(PartitionStats {
                partition: row.get(0)?,
                total: row.get(1)?,
                pending: row.get(2)?,
                processed: row.get(3)?,
                retrying: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
pub(crate) fn test_conn(partitions: &[&str]) -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
    init_schema(&conn).unwrap();
    let configs: Vec<PartitionConfig> = partitions
        .iter()
        .map(|name| PartitionConfig {
            name: name.to_string(),
            entry_url: format!("https://example.test/{}", name),
        })
        .collect();
    register_partitions(&conn, &configs).unwrap();
    conn
}
