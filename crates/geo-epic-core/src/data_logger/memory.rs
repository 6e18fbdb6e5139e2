use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use super::{DataLogger, Frame, Row};
use crate::error::WorkspaceResult;

struct Table {
    columns: Vec<String>,
    /// Keyed `{table}:{row-id}` conceptually; `SiteID`, when present, is
    /// the row-id so a repeat write replaces rather than appends.
    rows: BTreeMap<String, Row>,
    order: Vec<String>,
    counter: AtomicU64,
}

impl Table {
    fn new() -> Self {
        Self {
            columns: Vec::new(),
            rows: BTreeMap::new(),
            order: Vec::new(),
            counter: AtomicU64::new(0),
        }
    }

    fn upsert(&mut self, row: Row) {
        for key in row.keys() {
            if !self.columns.contains(key) {
                self.columns.push(key.clone());
            }
        }
        let row_id = row
            .get("SiteID")
            .map(|v| v.as_text())
            .unwrap_or_else(|| self.counter.fetch_add(1, Ordering::SeqCst).to_string());

        if !self.rows.contains_key(&row_id) {
            self.order.push(row_id.clone());
        }
        self.rows.insert(row_id, row);
    }

    fn to_frame(&self) -> Frame {
        Frame {
            columns: self.columns.clone(),
            rows: self.order.iter().filter_map(|id| self.rows.get(id).cloned()).collect(),
        }
    }
}

/// Default backend: an in-process hash of tables guarded by one lock per
/// table so concurrent writes to different tables never contend.
#[derive(Clone, Default)]
pub struct MemoryLogger {
    tables: Arc<Mutex<BTreeMap<String, Arc<Mutex<Table>>>>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self::default()
    }

    async fn table(&self, name: &str) -> Arc<Mutex<Table>> {
        let mut tables = self.tables.lock().await;
        tables
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Table::new())))
            .clone()
    }
}

#[async_trait::async_trait]
impl DataLogger for MemoryLogger {
    async fn log(&self, name: &str, row: Row) -> WorkspaceResult<()> {
        let table = self.table(name).await;
        table.lock().await.upsert(row);
        Ok(())
    }

    async fn fetch(&self, name: &str, keep: bool) -> WorkspaceResult<Frame> {
        let table = self.table(name).await;
        let frame = table.lock().await.to_frame();
        if !keep {
            self.tables.lock().await.remove(name);
        }
        Ok(frame)
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
    async fn duplicate_site_id_replaces_prior_row() {
        let logger = MemoryLogger::new();
        logger.log("yields", row("A1", 1.0)).await.unwrap();
        logger.log("yields", row("A1", 2.0)).await.unwrap();
        let frame = logger.fetch("yields", true).await.unwrap();
        assert_eq!(frame.rows.len(), 1);
        assert_eq!(frame.rows[0]["yield"], Value::Float(2.0));
    }

    #[tokio::test]
    async fn fetch_without_keep_drops_table() {
        let logger = MemoryLogger::new();
        logger.log("yields", row("A1", 1.0)).await.unwrap();
        let _ = logger.fetch("yields", false).await.unwrap();
        let frame = logger.fetch("yields", true).await.unwrap();
        assert!(frame.rows.is_empty());
    }
}
