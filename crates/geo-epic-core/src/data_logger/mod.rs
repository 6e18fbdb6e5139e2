//! DataLogger (C4): concurrent append-or-upsert row storage, one table per
//! registered callback name. Two backends share the same contract; the
//! in-process backend is the default for a single-process Workspace, the
//! SQLite backend is available for the cross-process worker-pool case.

mod memory;
mod sqlite;

pub use memory::MemoryLogger;
pub use sqlite::SqliteLogger;

use indexmap::IndexMap;

use crate::error::WorkspaceResult;

/// A single logged row: an ordered map so that first-seen key order is
/// preserved when the table is read back as a frame. `BTreeMap` would sort
/// keys alphabetically and silently discard the insertion order callers rely
/// on for column order.
pub type Row = IndexMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
    Null,
}

impl Value {
    pub fn as_text(&self) -> String {
        match self {
            Value::Int(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Text(v) => v.clone(),
            Value::Null => String::new(),
        }
    }
}

/// A table read back from the logger: column names in first-seen order,
/// plus the rows in insertion order.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

/// Backend-agnostic contract the Workspace drives every registered
/// callback's rows through.
#[async_trait::async_trait]
pub trait DataLogger: Send + Sync {
    /// Inserts or replaces `row` in table `name`, keyed by the `SiteID`
    /// entry in `row` when present.
    async fn log(&self, name: &str, row: Row) -> WorkspaceResult<()>;

    /// Reads table `name` back as a frame; drops the table afterward
    /// unless `keep` is true.
    async fn fetch(&self, name: &str, keep: bool) -> WorkspaceResult<Frame>;
}
