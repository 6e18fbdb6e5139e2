//! SQLite-backed logger: one row per `{uuid}_{callback_name}` database file
//! under the workspace cache, keyed `SiteID PRIMARY KEY` with
//! `INSERT OR REPLACE`, WAL journal mode, and jittered exponential backoff
//! on `SQLITE_BUSY`/`SQLITE_LOCKED` contention.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rusqlite::Connection;
use tokio::sync::Mutex;

use super::{DataLogger, Frame, Row, Value};
use crate::error::{WorkspaceError, WorkspaceResult};

const MAX_RETRIES: u32 = 6;
const BASE_BACKOFF: Duration = Duration::from_millis(20);

#[derive(Clone)]
pub struct SqliteLogger {
    dir: PathBuf,
    conns: Arc<Mutex<std::collections::HashMap<String, Arc<Mutex<Connection>>>>>,
}

impl SqliteLogger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            conns: Arc::new(Mutex::new(std::collections::HashMap::new())),
        }
    }

    async fn connection(&self, name: &str) -> WorkspaceResult<Arc<Mutex<Connection>>> {
        let mut conns = self.conns.lock().await;
        if let Some(c) = conns.get(name) {
            return Ok(c.clone());
        }
        std::fs::create_dir_all(&self.dir).map_err(|e| WorkspaceError::io(&self.dir, e))?;
        let path = self.dir.join(format!("{name}.sqlite3"));
        let conn = open_with_wal(&path)?;
        let arc = Arc::new(Mutex::new(conn));
        conns.insert(name.to_string(), arc.clone());
        Ok(arc)
    }
}

fn open_with_wal(path: &Path) -> WorkspaceResult<Connection> {
    let conn = Connection::open(path).map_err(|e| sqlite_err(path, e))?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| sqlite_err(path, e))?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS rows (site_id TEXT PRIMARY KEY, ord INTEGER, payload TEXT NOT NULL)",
        [],
    )
    .map_err(|e| sqlite_err(path, e))?;
    Ok(conn)
}

fn sqlite_err(path: &Path, err: rusqlite::Error) -> WorkspaceError {
    WorkspaceError::io(path, std::io::Error::other(err.to_string()))
}

fn is_locked(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::DatabaseBusy || e.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

async fn backoff_sleep(attempt: u32) {
    let jitter_ms: u64 = rand::thread_rng().gen_range(0..=10);
    let delay = BASE_BACKOFF * 2u32.pow(attempt) + Duration::from_millis(jitter_ms);
    tokio::time::sleep(delay).await;
}

fn row_to_json(row: &Row) -> String {
    let map: serde_json::Map<String, serde_json::Value> = row
        .iter()
        .map(|(k, v)| {
            let jv = match v {
                Value::Int(i) => serde_json::Value::from(*i),
                Value::Float(f) => serde_json::Value::from(*f),
                Value::Text(s) => serde_json::Value::from(s.clone()),
                Value::Null => serde_json::Value::Null,
            };
            (k.clone(), jv)
        })
        .collect();
    serde_json::Value::Object(map).to_string()
}

fn json_to_row(text: &str) -> Row {
    let parsed: serde_json::Value = serde_json::from_str(text).unwrap_or(serde_json::Value::Null);
    let mut row = Row::new();
    if let serde_json::Value::Object(map) = parsed {
        for (k, v) in map {
            let value = match v {
                serde_json::Value::Number(n) if n.is_i64() => Value::Int(n.as_i64().unwrap()),
                serde_json::Value::Number(n) => Value::Float(n.as_f64().unwrap_or(0.0)),
                serde_json::Value::String(s) => Value::Text(s),
                serde_json::Value::Null => Value::Null,
                other => Value::Text(other.to_string()),
            };
            row.insert(k, value);
        }
    }
    row
}

#[async_trait::async_trait]
impl DataLogger for SqliteLogger {
    async fn log(&self, name: &str, row: Row) -> WorkspaceResult<()> {
        let conn = self.connection(name).await?;
        let site_id = row
            .get("SiteID")
            .map(|v| v.as_text())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let payload = row_to_json(&row);

        let mut attempt = 0;
        loop {
            let guard = conn.lock().await;
            let result = guard.execute(
                "INSERT INTO rows (site_id, ord, payload) VALUES (?1, \
                 (SELECT COALESCE(MAX(ord), -1) + 1 FROM rows), ?2) \
                 ON CONFLICT(site_id) DO UPDATE SET payload = excluded.payload",
                rusqlite::params![site_id, payload],
            );
            drop(guard);
            match result {
                Ok(_) => return Ok(()),
                Err(e) if is_locked(&e) && attempt < MAX_RETRIES => {
                    attempt += 1;
                    backoff_sleep(attempt).await;
                }
                Err(e) => return Err(sqlite_err(&self.dir, e)),
            }
        }
    }

    async fn fetch(&self, name: &str, keep: bool) -> WorkspaceResult<Frame> {
        let conn = self.connection(name).await?;
        let guard = conn.lock().await;
        let mut stmt = guard
            .prepare("SELECT payload FROM rows ORDER BY ord ASC")
            .map_err(|e| sqlite_err(&self.dir, e))?;
        let payloads: Vec<String> = stmt
            .query_map([], |r| r.get::<_, String>(0))
            .map_err(|e| sqlite_err(&self.dir, e))?
            .collect::<Result<_, _>>()
            .map_err(|e| sqlite_err(&self.dir, e))?;
        drop(stmt);

        let rows: Vec<Row> = payloads.iter().map(|p| json_to_row(p)).collect();
        let mut columns = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }

        if !keep {
            guard
                .execute("DELETE FROM rows", [])
                .map_err(|e| sqlite_err(&self.dir, e))?;
        }
        drop(guard);
        if !keep {
            self.conns.lock().await.remove(name);
        }

        Ok(Frame { columns, rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_logger::Value;

    fn row(site_id: &str, yield_value: f64) -> Row {
        let mut r = Row::new();
        r.insert("SiteID".into(), Value::Text(site_id.into()));
        r.insert("yield".into(), Value::Float(yield_value));
        r
    }

    #[tokio::test]
    async fn replaces_row_with_same_site_id() {
        let dir = tempfile::tempdir().unwrap();
        let logger = SqliteLogger::new(dir.path());
        logger.log("yields", row("A1", 1.0)).await.unwrap();
        logger.log("yields", row("A1", 2.0)).await.unwrap();
        let frame = logger.fetch("yields", true).await.unwrap();
        assert_eq!(frame.rows.len(), 1);
        assert_eq!(frame.rows[0]["yield"], Value::Float(2.0));
    }
}
