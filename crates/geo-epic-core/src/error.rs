use std::path::PathBuf;

use thiserror::Error;

/// Construction-time and configuration-time failures. These are fail-fast:
/// the caller is expected to terminate rather than retry.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("missing required configuration keys: {0:?}")]
    MissingKeys(Vec<String>),

    #[error("configuration value {key} is not a valid {expected}: {value}")]
    InvalidValue {
        key: String,
        expected: &'static str,
        value: String,
    },

    #[error("roster source {0} has an unsupported extension")]
    UnsupportedRosterFormat(PathBuf),

    #[error("roster is missing required column(s): {0:?}")]
    MissingRosterColumns(Vec<String>),

    #[error("invalid SiteID {0:?}: must be 1-9 alphanumeric characters")]
    InvalidSiteId(String),

    #[error("engine installation directory {0} does not exist")]
    MissingEngineDir(PathBuf),

    #[error("engine directory {0} is already locked by another workspace")]
    EngineDirLocked(PathBuf),

    #[error("cache path {0} is not writable")]
    CacheNotWritable(PathBuf),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("fixed-width layout mismatch in {path} at line {line}: {reason}")]
    ParseError {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

pub type WorkspaceResult<T> = Result<T, WorkspaceError>;

impl WorkspaceError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Outcome of a single site's run through the Engine Runner. Per Design Notes,
/// this is an explicit result type rather than an exception-style early return:
/// one site's failure must never abort the batch.
#[derive(Debug, Error)]
pub enum RunOutcome {
    #[error("run timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("missing or empty output {kind} for site {site_id} (log at {log_path})")]
    MissingOutput {
        site_id: String,
        kind: String,
        log_path: PathBuf,
    },

    #[error("engine invocation failed for site {site_id} (log at {log_path}): {reason}")]
    EngineError {
        site_id: String,
        log_path: PathBuf,
        reason: String,
    },

    #[error("sandbox setup failed: {0}")]
    Sandbox(#[from] WorkspaceError),
}

pub type RunResult<T> = Result<T, RunOutcome>;

/// Logs an error at its origin before it is returned, so every fallible
/// boundary crossing leaves a trace even if the caller only records the index.
pub fn log_run_failure(site_id: &str, err: &RunOutcome) {
    tracing::warn!(site_id, error = %err, "per-site run failed");
}
