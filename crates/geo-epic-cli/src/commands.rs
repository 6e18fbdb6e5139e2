use std::sync::Arc;

use anyhow::{Context, Result};
use geo_epic_core::calibration::{Optimizer, Problem};
use geo_epic_core::config::{Config, ParameterModelKind};
use geo_epic_core::engine_runner::EngineInstallation;
use geo_epic_core::io::EpicFile;
use geo_epic_core::params::{cropcom::CropCom, ieparm::IeParm, ParameterModel, Sensitivity};
use geo_epic_core::sensitivity::{self, SensitivityMethod};
use geo_epic_core::workspace::Workspace;

use crate::cli::{CalibrateArgs, RosterArgs, RunArgs, SensitivityArgs};

/// Process exit code, per the documented 0/1/2 convention: configuration
/// errors are 1, a batch that completed with per-site failures is 2.
pub enum ExitCode {
    Success,
    ConfigError,
    PartialFailure,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        match code {
            ExitCode::Success => 0,
            ExitCode::ConfigError => 1,
            ExitCode::PartialFailure => 2,
        }
    }
}

fn build_installation(config: &Config) -> Result<EngineInstallation> {
    let dir = config
        .epic_model
        .parent()
        .context("EPICModel path has no parent directory")?
        .to_path_buf();
    let exe_name = config
        .epic_model
        .file_name()
        .context("EPICModel path has no file name")?
        .to_string_lossy()
        .into_owned();
    let epic_file = EpicFile::load(dir.join("EPICFILE.DAT")).context("loading EPICFILE.DAT")?;
    Ok(EngineInstallation { dir, exe_name, epic_file })
}

pub async fn run(args: RunArgs) -> Result<ExitCode> {
    let config = match Config::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return Ok(ExitCode::ConfigError);
        }
    };
    let installation = build_installation(&config)?;
    let workspace = Workspace::build(&config, installation)?;

    let select = args.select.as_deref().or(config.select.as_deref());
    let report = workspace.run(select, None).await?;
    workspace.close();

    if let Some(objective) = report.objective {
        println!("objective: {objective}");
    }
    if report.failed > 0 {
        eprintln!("{} site(s) failed; see log_dir for per-site logs", report.failed);
        return Ok(ExitCode::PartialFailure);
    }
    Ok(ExitCode::Success)
}

pub fn roster(args: RosterArgs) -> Result<ExitCode> {
    let config = match Config::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return Ok(ExitCode::ConfigError);
        }
    };
    let records = geo_epic_core::roster::load(&config.run_info, &config.opc_dir)?;
    let select = args.select.as_deref().or(config.select.as_deref());
    let records = match select {
        Some(expr) => geo_epic_core::filter::Filter::parse(expr).apply(&records),
        None => records,
    };
    println!("{} site(s) selected", records.len());
    for record in &records {
        println!("{}\t{}\t{}", record.site_id, record.lat, record.lon);
    }
    Ok(ExitCode::Success)
}

fn load_model(setting: &geo_epic_core::config::ParameterModelSetting) -> Result<Box<dyn ParameterModel + Send + Sync>> {
    let sensitivity = Sensitivity::load_csv(&setting.sensitivity)
        .with_context(|| format!("loading sensitivity CSV {}", setting.sensitivity.display()))?;
    match setting.kind {
        ParameterModelKind::CropCom => {
            let mut model = CropCom::load(&setting.path)?;
            model.set_sensitive(&[sensitivity], &setting.crop_codes);
            Ok(Box::new(model))
        }
        ParameterModelKind::IeParm => {
            let mut model = IeParm::load(&setting.path)?;
            model.set_sensitive(&[sensitivity], &setting.crop_codes);
            Ok(Box::new(model))
        }
    }
}

fn build_problem(config: &Config, workspace: Arc<Workspace>) -> Result<Problem> {
    let mut problem = Problem::new(workspace);
    for setting in &config.calibration.models {
        let model = load_model(setting)?;
        problem.add_model(model, setting.path.clone());
    }
    problem.validate().context("calibration.models")?;
    Ok(problem)
}

pub async fn calibrate(args: CalibrateArgs) -> Result<ExitCode> {
    let config = match Config::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return Ok(ExitCode::ConfigError);
        }
    };
    let installation = build_installation(&config)?;
    let workspace = Arc::new(Workspace::build(&config, installation)?);
    let mut problem = build_problem(&config, workspace.clone())?;

    let optimizer = Optimizer::new(args.population);
    let champion = optimizer
        .optimize(&mut problem, args.generations, |gen, best, mean| {
            println!("generation {gen}: best={best:.6} avg_gen_time={mean:?}");
        })
        .await?;
    workspace.close();

    println!("champion fitness: {:.6}", champion.fitness);
    for (name, value) in problem.var_names().iter().zip(&champion.vector) {
        println!("{name} = {value:.6}");
    }
    Ok(ExitCode::Success)
}

pub async fn run_sensitivity(args: SensitivityArgs) -> Result<ExitCode> {
    let config = match Config::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return Ok(ExitCode::ConfigError);
        }
    };
    let method: SensitivityMethod = args
        .method
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))
        .context("--method")?;

    let installation = build_installation(&config)?;
    let workspace = Arc::new(Workspace::build(&config, installation)?);
    let mut problem = build_problem(&config, workspace.clone())?;
    let var_names = problem.var_names();

    let effects = sensitivity::run(&mut problem, &var_names, method, args.samples, |done, total| {
        if done % 10 == 0 || done == total {
            println!("{done}/{total} evaluations");
        }
    })
    .await?;
    workspace.close();

    for effect in effects {
        println!("{}\tindex={:.6}\tvariance={:.6}", effect.name, effect.index, effect.variance);
    }
    Ok(ExitCode::Success)
}
