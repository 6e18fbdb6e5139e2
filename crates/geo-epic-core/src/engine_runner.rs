//! Engine Runner (C5): turns a [`Site`] handle plus an engine installation
//! into an output-bearing directory, following the eight-step per-run
//! protocol described for this component.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;

use crate::error::{RunOutcome, RunResult, WorkspaceError};
use crate::io::{EpicFile, PrintControl};
use crate::site::Site;

const WEATHER_STEM: &str = "1";
const LOCKFILE_NAME: &str = ".geo_epic.lock";

pub struct EngineInstallation {
    pub dir: PathBuf,
    pub exe_name: String,
    pub epic_file: EpicFile,
}

pub struct RunConfig {
    pub output_dir: Option<PathBuf>,
    pub log_dir: PathBuf,
    pub output_types: Vec<String>,
}

pub struct EngineRunner<'a> {
    pub installation: &'a EngineInstallation,
    pub config: &'a RunConfig,
    pub timeout: Option<Duration>,
}

impl<'a> EngineRunner<'a> {
    /// Executes the per-run protocol for one site inside `sandbox_dir`,
    /// populating `site.outputs` on success.
    pub async fn run(&self, site: &mut Site, sandbox_dir: &Path) -> RunResult<()> {
        if let Some(outputs) = self.short_circuit(site)? {
            site.outputs = outputs;
            return Ok(());
        }

        self.materialize_sandbox(sandbox_dir)?;
        self.write_weather(site, sandbox_dir)?;
        self.write_control_files(site, sandbox_dir)?;
        let exe_path = self.copy_executable(site, sandbox_dir)?;
        let log_path = sandbox_dir.join(format!("{}.log", site.site_id));
        self.invoke(&exe_path, sandbox_dir, &log_path, &site.site_id).await?;
        self.harvest(site, sandbox_dir, &log_path)?;
        Ok(())
    }

    fn short_circuit(&self, site: &Site) -> RunResult<Option<BTreeMap<String, PathBuf>>> {
        let Some(output_dir) = &self.config.output_dir else {
            return Ok(None);
        };
        let mut outputs = BTreeMap::new();
        for kind in &self.config.output_types {
            let path = output_dir.join(format!("{}.{kind}", site.site_id));
            let non_empty = path.metadata().map(|m| m.len() > 0).unwrap_or(false);
            if !non_empty {
                return Ok(None);
            }
            outputs.insert(kind.clone(), path);
        }
        Ok(Some(outputs))
    }

    fn materialize_sandbox(&self, sandbox_dir: &Path) -> RunResult<()> {
        for entry in walkdir::WalkDir::new(&self.installation.dir)
            .into_iter()
            .filter_map(Result::ok)
        {
            let rel = entry
                .path()
                .strip_prefix(&self.installation.dir)
                .unwrap_or(entry.path());
            if rel.file_name().map(|n| n == LOCKFILE_NAME).unwrap_or(false) {
                continue;
            }
            let dest = sandbox_dir.join(rel);
            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&dest).map_err(|e| WorkspaceError::io(&dest, e))?;
            } else {
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| WorkspaceError::io(parent, e))?;
                }
                std::fs::copy(entry.path(), &dest).map_err(|e| WorkspaceError::io(&dest, e))?;
            }
        }
        Ok(())
    }

    fn write_weather(&self, site: &Site, sandbox_dir: &Path) -> RunResult<()> {
        let dly = crate::io::Dly::load(&site.dly)?;
        dly.save(sandbox_dir.join(format!("{WEATHER_STEM}.DLY")))?;
        dly.write_monthly(sandbox_dir.join(WEATHER_STEM))?;
        Ok(())
    }

    fn write_control_files(&self, site: &Site, sandbox_dir: &Path) -> RunResult<()> {
        let epic_file = &self.installation.epic_file;
        std::fs::write(
            sandbox_dir.join("EPICRUN.DAT"),
            format!("{} 1  0  0  0  1  1  1/\n", site.site_id),
        )
        .map_err(|e| WorkspaceError::io(sandbox_dir, e))?;

        let basename = |p: &Path| p.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();

        let write_one = |key: &str, content: String| -> RunResult<()> {
            let name = epic_file.get(key)?;
            std::fs::write(sandbox_dir.join(name), content).map_err(|e| WorkspaceError::io(sandbox_dir, e).into())
        };

        write_one("FSITE", format!("1    \"./{}\"\n", basename(&site.sit)))?;
        write_one("FSOIL", format!("1    \"./{}\"\n", basename(&site.soil)))?;
        write_one("FWLST", format!("1    {WEATHER_STEM}.DLY\n"))?;
        write_one(
            "FWPM1",
            format!("1    {WEATHER_STEM}.WP1   {}   {}    {}\n", site.lat, site.lon, site.elevation),
        )?;
        write_one(
            "FWIND",
            format!("1    {WEATHER_STEM}.WND   {}   {}    {}\n", site.lat, site.lon, site.elevation),
        )?;
        if let Some(opc) = &site.opc {
            write_one("FOPSC", format!("1    \"./{}\"\n", basename(opc)))?;
        }

        let print_control_path = sandbox_dir.join(epic_file.get("FPRNT")?);
        if print_control_path.exists() {
            let mut pc = PrintControl::load(&print_control_path)?;
            pc.set_enabled_outputs(&self.config.output_types);
            pc.save(&print_control_path)?;
        }
        Ok(())
    }

    fn copy_executable(&self, site: &Site, sandbox_dir: &Path) -> RunResult<PathBuf> {
        let src = self.installation.dir.join(&self.installation.exe_name);
        let ext = Path::new(&self.installation.exe_name)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let stem = Path::new(&self.installation.exe_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "engine".to_string());
        let dest = sandbox_dir.join(format!("{stem}_{}{ext}", site.site_id));
        std::fs::copy(&src, &dest).map_err(|e| WorkspaceError::io(&dest, e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(meta) = std::fs::metadata(&dest) {
                let mut perms = meta.permissions();
                perms.set_mode(perms.mode() | 0o111);
                let _ = std::fs::set_permissions(&dest, perms);
            }
        }
        Ok(dest)
    }

    async fn invoke(&self, exe_path: &Path, sandbox_dir: &Path, log_path: &Path, site_id: &str) -> RunResult<()> {
        let log_file = std::fs::File::create(log_path).map_err(|e| WorkspaceError::io(log_path, e))?;
        let log_file_err = log_file.try_clone().map_err(|e| WorkspaceError::io(log_path, e))?;

        let mut child = tokio::process::Command::new(exe_path)
            .current_dir(sandbox_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_file_err))
            .spawn()
            .map_err(|e| RunOutcome::EngineError {
                site_id: site_id.to_string(),
                log_path: log_path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(b"\n\n\n").await;
        }

        let wait = child.wait();
        let status = match self.timeout {
            Some(d) => match tokio::time::timeout(d, wait).await {
                Ok(result) => result,
                Err(_) => {
                    let _ = child.start_kill();
                    return Err(RunOutcome::Timeout(d));
                }
            },
            None => wait.await,
        };

        if let Err(e) = status {
            tracing::warn!(site_id, error = %e, "engine process wait failed");
        }
        Ok(())
    }

    fn harvest(&self, site: &mut Site, sandbox_dir: &Path, log_path: &Path) -> RunResult<()> {
        for kind in &self.config.output_types {
            let candidate = sandbox_dir.join(format!("{}.{kind}", site.site_id));
            let non_empty = candidate.metadata().map(|m| m.len() > 0).unwrap_or(false);
            if !non_empty {
                let preserved = self.config.log_dir.join(format!("{}.log", site.site_id));
                let _ = std::fs::create_dir_all(&self.config.log_dir);
                let _ = std::fs::copy(log_path, &preserved);
                return Err(RunOutcome::MissingOutput {
                    site_id: site.site_id.clone(),
                    kind: kind.clone(),
                    log_path: preserved,
                });
            }
        }

        for kind in &self.config.output_types {
            let candidate = sandbox_dir.join(format!("{}.{kind}", site.site_id));
            let dest = match &self.config.output_dir {
                Some(dir) => dir.join(format!("{}.{kind}", site.site_id)),
                None => candidate.clone(),
            };
            if candidate != dest {
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| WorkspaceError::io(parent, e))?;
                }
                std::fs::rename(&candidate, &dest).map_err(|e| WorkspaceError::io(&dest, e))?;
            }
            site.outputs.insert(kind.clone(), dest);
        }
        Ok(())
    }
}
