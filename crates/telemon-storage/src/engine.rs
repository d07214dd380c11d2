use crate::error::Result;
use crate::MetricsStorage;
use rusqlite::{params, Connection, Transaction};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use telemon_common::types::{MetricKind, MetricValue, Snapshot, WireRecord};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS gauges (
    _id TEXT NOT NULL,
    mtype TEXT NOT NULL,
    value REAL NOT NULL
);
CREATE TABLE IF NOT EXISTS counters (
    _id TEXT NOT NULL,
    mtype TEXT NOT NULL,
    value INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_gauges_id ON gauges(_id);
CREATE INDEX IF NOT EXISTS idx_counters_id ON counters(_id);
";

const INSERT_GAUGE: &str = "INSERT INTO gauges (_id, mtype, value) VALUES (?1, ?2, ?3)";
const INSERT_COUNTER: &str = "INSERT INTO counters (_id, mtype, value) VALUES (?1, ?2, ?3)";

pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the connection, recovering from a poisoned Mutex if necessary.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of stored rows for a kind.
    pub fn count(&self, kind: MetricKind) -> Result<u64> {
        let sql = match kind {
            MetricKind::Gauge => "SELECT COUNT(*) FROM gauges",
            MetricKind::Counter => "SELECT COUNT(*) FROM counters",
        };
        let count: i64 = self.lock().query_row(sql, [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn insert_all(tx: &Transaction<'_>, records: &[WireRecord]) -> Result<()> {
    let mut gauge_stmt = tx.prepare_cached(INSERT_GAUGE)?;
    let mut counter_stmt = tx.prepare_cached(INSERT_COUNTER)?;
    for record in records {
        let metric = record.metric()?;
        match metric.value {
            MetricValue::Gauge(v) => {
                gauge_stmt.execute(params![metric.name, MetricKind::Gauge.as_str(), v])?;
            }
            MetricValue::Counter(d) => {
                counter_stmt.execute(params![metric.name, MetricKind::Counter.as_str(), d])?;
            }
        }
    }
    Ok(())
}

impl MetricsStorage for SqliteStorage {
    fn ping(&self) -> Result<()> {
        self.lock().query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    fn write_one(&self, record: &WireRecord) -> Result<()> {
        let metric = record.metric()?;
        let conn = self.lock();
        match metric.value {
            MetricValue::Gauge(v) => {
                conn.execute(INSERT_GAUGE, params![metric.name, MetricKind::Gauge.as_str(), v])?
            }
            MetricValue::Counter(d) => conn.execute(
                INSERT_COUNTER,
                params![metric.name, MetricKind::Counter.as_str(), d],
            )?,
        };
        Ok(())
    }

    fn write_batch(&self, records: &[WireRecord]) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        match insert_all(&tx, records) {
            Ok(()) => {
                tx.commit()?;
                Ok(())
            }
            Err(e) => {
                tx.rollback()?;
                Err(e)
            }
        }
    }

    fn load_latest(&self) -> Result<Snapshot> {
        let conn = self.lock();
        let mut snapshot = Snapshot::default();

        let mut stmt = conn.prepare(
            "SELECT _id, value FROM gauges
             WHERE rowid IN (SELECT MAX(rowid) FROM gauges GROUP BY _id)",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)))?;
        for row in rows {
            let (id, value) = row?;
            snapshot.gauges.insert(id, value);
        }

        let mut stmt = conn.prepare(
            "SELECT _id, value FROM counters
             WHERE rowid IN (SELECT MAX(rowid) FROM counters GROUP BY _id)",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (id, value) = row?;
            snapshot.counters.insert(id, value);
        }

        Ok(snapshot)
    }
}
