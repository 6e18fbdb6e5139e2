//! Workspace (C6): composes the pool, logger, and engine runner into a
//! batch driver with registered callbacks and an optional objective.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::data_logger::{DataLogger, MemoryLogger, Row, SqliteLogger};
use crate::engine_runner::{EngineInstallation, EngineRunner, RunConfig};
use crate::error::{RunOutcome, WorkspaceError, WorkspaceResult};
use crate::executor::{self, ProgressFn};
use crate::filter::Filter;
use crate::io::Sit;
use crate::pool::WorkerPool;
use crate::roster::RosterRecord;
use crate::site::Site;

/// A callback invoked after every successful per-site run. Returning
/// `Some(row)` logs the row under the callback's name; `None` makes it a
/// pure routine whose return value is discarded.
#[async_trait::async_trait]
pub trait Callback: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, site: &Site) -> Option<Row>;
}

/// A zero-argument aggregator evaluated once after a completed batch.
#[async_trait::async_trait]
pub trait Objective: Send + Sync {
    async fn evaluate(&self) -> f64;
}

/// The CLI's built-in objective: the mean of a numeric column in a logged
/// table, read back (without draining) after the batch completes. A caller
/// embedding this crate as a library and needing a richer reduction should
/// implement `Objective` directly against the same `DataLogger`.
pub struct ColumnMeanObjective {
    logger: Arc<dyn DataLogger>,
    table: String,
    column: String,
}

impl ColumnMeanObjective {
    pub fn new(logger: Arc<dyn DataLogger>, table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            logger,
            table: table.into(),
            column: column.into(),
        }
    }
}

#[async_trait::async_trait]
impl Objective for ColumnMeanObjective {
    async fn evaluate(&self) -> f64 {
        let frame = match self.logger.fetch(&self.table, true).await {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(table = %self.table, error = %e, "objective table unreadable, reporting 0");
                return 0.0;
            }
        };
        let values: Vec<f64> = frame
            .rows
            .iter()
            .filter_map(|row| match row.get(&self.column) {
                Some(crate::data_logger::Value::Int(v)) => Some(*v as f64),
                Some(crate::data_logger::Value::Float(v)) => Some(*v),
                _ => None,
            })
            .collect();
        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    }
}

/// Outcome of a completed batch: the objective value, if one was set, and
/// how many sites failed. Exit-code mapping (§6) is the CLI's concern.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub objective: Option<f64>,
    pub failed: usize,
}

pub struct Workspace {
    cache_root: PathBuf,
    pool: WorkerPool,
    logger: Arc<dyn DataLogger>,
    installation: EngineInstallation,
    run_config: RunConfig,
    roster_path: PathBuf,
    opc_dir: PathBuf,
    soil_dir: PathBuf,
    weather_dir: PathBuf,
    site_dir: PathBuf,
    timeout: Option<Duration>,
    callbacks: Vec<Arc<dyn Callback>>,
    objective: Option<Arc<dyn Objective>>,
    lockfile: PathBuf,
}

impl Workspace {
    pub fn build(config: &Config, installation: EngineInstallation) -> WorkspaceResult<Self> {
        let cache_base = config
            .cache_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
        let cache_root = cache_base.join(format!("geo_epic_{user}")).join(Uuid::new_v4().to_string());
        std::fs::create_dir_all(&cache_root).map_err(|e| WorkspaceError::io(&cache_root, e))?;

        let lockfile = installation.dir.join(".geo_epic.lock");
        acquire_engine_lock(&lockfile)?;

        let pool = WorkerPool::open(&cache_root, config.num_of_workers)?;

        let logger: Arc<dyn DataLogger> = match config.data_logger.backend {
            crate::config::DataLoggerBackendKind::Memory => Arc::new(MemoryLogger::new()),
            crate::config::DataLoggerBackendKind::Sqlite => Arc::new(SqliteLogger::new(cache_root.join("logs"))),
        };

        let run_config = RunConfig {
            output_dir: config.output_dir.clone(),
            log_dir: config.log_dir.clone(),
            output_types: config.output_types.clone(),
        };

        let objective = config
            .objective
            .as_ref()
            .map(|setting| -> Arc<dyn Objective> {
                Arc::new(ColumnMeanObjective::new(logger.clone(), &setting.table, &setting.column))
            });

        Ok(Self {
            cache_root,
            pool,
            logger,
            installation,
            run_config,
            roster_path: config.run_info.clone(),
            opc_dir: config.opc_dir.clone(),
            soil_dir: config.soil.files_dir.clone(),
            weather_dir: config.weather.dir.clone(),
            site_dir: config.site.dir.clone(),
            timeout: config.timeout.map(Duration::from_secs),
            callbacks: Vec::new(),
            objective,
            lockfile,
        })
    }

    pub fn register_callback(&mut self, callback: Arc<dyn Callback>) {
        self.callbacks.push(callback);
    }

    pub fn set_objective(&mut self, objective: Arc<dyn Objective>) {
        self.objective = Some(objective);
    }

    /// Filters the roster, runs the first surviving site synchronously as
    /// a smoke test, then the rest through the Parallel Executor.
    pub async fn run(&self, select: Option<&str>, progress: Option<ProgressFn>) -> WorkspaceResult<RunReport> {
        let records = crate::roster::load(&self.roster_path, &self.opc_dir)?;
        let records = match select {
            Some(expr) => Filter::parse(expr).apply(&records),
            None => records,
        };

        let sites: Vec<Site> = records
            .into_iter()
            .map(|record| record_to_site(record, &self.soil_dir, &self.weather_dir, &self.site_dir))
            .collect::<WorkspaceResult<Vec<_>>>()?;

        if sites.is_empty() {
            let objective = match &self.objective {
                Some(o) => Some(o.evaluate().await),
                None => None,
            };
            return Ok(RunReport { objective, failed: 0 });
        }

        let mut first = sites[0].clone();
        self.run_one(&mut first).await.map_err(|e| {
            crate::error::log_run_failure(&first.site_id, &e);
            WorkspaceError::CacheNotWritable(self.cache_root.clone())
        })?;
        self.dispatch_callbacks(&first).await;

        let rest = sites[1..].to_vec();
        let this = self.snapshot();
        let report = executor::execute(
            rest,
            this.pool.capacity(),
            self.timeout,
            CancellationToken::new(),
            progress,
            move |mut site| {
                let this = this.clone();
                async move {
                    match this.run_one(&mut site).await {
                        Ok(()) => {
                            this.dispatch_callbacks(&site).await;
                            Ok(site)
                        }
                        Err(e) => {
                            crate::error::log_run_failure(&site.site_id, &e);
                            Err(e.to_string())
                        }
                    }
                }
            },
        )
        .await;

        if !report.failed_indices.is_empty() {
            tracing::warn!(failed = report.failed_indices.len(), "batch completed with per-site failures");
        }

        let objective = match &self.objective {
            Some(o) => Some(o.evaluate().await),
            None => None,
        };
        Ok(RunReport {
            objective,
            failed: report.failed_indices.len(),
        })
    }

    async fn run_one(&self, site: &mut Site) -> Result<(), RunOutcome> {
        let slot = self.pool.acquire(self.timeout).await?;
        let runner = EngineRunner {
            installation: &self.installation,
            config: &self.run_config,
            timeout: self.timeout,
        };
        let result = runner.run(site, &slot.path).await;
        let _ = self.pool.release(slot).await;
        result
    }

    async fn dispatch_callbacks(&self, site: &Site) {
        for callback in &self.callbacks {
            if let Some(row) = callback.run(site).await {
                if let Err(e) = self.logger.log(callback.name(), row).await {
                    tracing::warn!(site_id = %site.site_id, callback = callback.name(), error = %e, "callback row failed to log");
                }
            }
        }
    }

    pub async fn fetch_log(&self, name: &str, keep: bool) -> WorkspaceResult<crate::data_logger::Frame> {
        self.logger.fetch(name, keep).await
    }

    pub fn clear_logs(&self) -> WorkspaceResult<()> {
        recreate_dir(&self.run_config.log_dir)
    }

    pub fn clear_outputs(&self) -> WorkspaceResult<()> {
        match &self.run_config.output_dir {
            Some(dir) => recreate_dir(dir),
            None => Ok(()),
        }
    }

    pub fn close(&self) {
        self.pool.close();
        release_engine_lock(&self.lockfile);
        if let Err(err) = std::fs::remove_dir_all(&self.cache_root) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(cache_root = %self.cache_root.display(), error = %err, "cache root cleanup failed");
            }
        }
    }

    /// A thin, cheaply cloneable handle used inside the executor closure so
    /// the borrowed `&self` doesn't have to outlive the spawned tasks.
    fn snapshot(&self) -> WorkspaceHandle {
        WorkspaceHandle {
            pool: self.pool.clone(),
            logger: self.logger.clone(),
            installation_dir: self.installation.dir.clone(),
            installation_exe: self.installation.exe_name.clone(),
            epic_file: self.installation.epic_file.clone(),
            run_config: Arc::new(RunConfig {
                output_dir: self.run_config.output_dir.clone(),
                log_dir: self.run_config.log_dir.clone(),
                output_types: self.run_config.output_types.clone(),
            }),
            timeout: self.timeout,
            callbacks: self.callbacks.clone(),
        }
    }
}

#[derive(Clone)]
struct WorkspaceHandle {
    pool: WorkerPool,
    logger: Arc<dyn DataLogger>,
    installation_dir: PathBuf,
    installation_exe: String,
    epic_file: crate::io::EpicFile,
    run_config: Arc<RunConfig>,
    timeout: Option<Duration>,
    callbacks: Vec<Arc<dyn Callback>>,
}

impl WorkspaceHandle {
    async fn run_one(&self, site: &mut Site) -> Result<(), RunOutcome> {
        let slot = self.pool.acquire(self.timeout).await?;
        let installation = EngineInstallation {
            dir: self.installation_dir.clone(),
            exe_name: self.installation_exe.clone(),
            epic_file: self.epic_file.clone(),
        };
        let runner = EngineRunner {
            installation: &installation,
            config: &self.run_config,
            timeout: self.timeout,
        };
        let result = runner.run(site, &slot.path).await;
        let _ = self.pool.release(slot).await;
        result
    }

    async fn dispatch_callbacks(&self, site: &Site) {
        for callback in &self.callbacks {
            if let Some(row) = callback.run(site).await {
                if let Err(e) = self.logger.log(callback.name(), row).await {
                    tracing::warn!(site_id = %site.site_id, callback = callback.name(), error = %e, "callback row failed to log");
                }
            }
        }
    }
}

/// Resolves a roster record's bare file names against the configured
/// soil/weather/site directories and reads lat/lon/elevation from the site
/// file itself, per the Site data model (these are derived scalars read
/// from the SIT file, not carried by the roster).
fn record_to_site(
    record: RosterRecord,
    soil_dir: &Path,
    weather_dir: &Path,
    site_dir: &Path,
) -> WorkspaceResult<Site> {
    let soil = soil_dir.join(&record.soil);
    let dly = weather_dir.join(&record.dly);
    let sit_path = Sit::path_hint(&record.site_id, site_dir);
    let sit = Sit::load(&sit_path)?;

    let mut site = Site::new(record.site_id, soil, dly, sit_path, sit.lat, sit.lon, sit.elevation)?;
    if let Some(opc) = record.opc {
        site = site.with_opc(opc);
    }
    Ok(site)
}

fn recreate_dir(dir: &Path) -> WorkspaceResult<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir).map_err(|e| WorkspaceError::io(dir, e))?;
    }
    std::fs::create_dir_all(dir).map_err(|e| WorkspaceError::io(dir, e))
}

fn acquire_engine_lock(lockfile: &Path) -> WorkspaceResult<()> {
    if lockfile.exists() {
        return Err(WorkspaceError::EngineDirLocked(
            lockfile.parent().unwrap_or(lockfile).to_path_buf(),
        ));
    }
    std::fs::write(lockfile, std::process::id().to_string()).map_err(|e| WorkspaceError::io(lockfile, e))
}

fn release_engine_lock(lockfile: &Path) {
    let _ = std::fs::remove_file(lockfile);
}
