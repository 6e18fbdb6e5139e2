//! Exercises the Engine Runner's full per-run protocol against a fake
//! "engine" shell script, without a real crop-simulation binary.

use std::collections::BTreeMap;
use std::path::Path;

use geo_epic_core::engine_runner::{EngineInstallation, EngineRunner, RunConfig};
use geo_epic_core::error::RunOutcome;
use geo_epic_core::io::EpicFile;
use geo_epic_core::site::Site;

fn fake_engine_installation(dir: &Path) -> EngineInstallation {
    let script = "#!/bin/sh\nid=$(awk '{print $1}' EPICRUN.DAT)\necho ok > \"${id}.OUT\"\n";
    std::fs::write(dir.join("engine.sh"), script).unwrap();

    let mut names = BTreeMap::new();
    names.insert("FSITE".to_string(), "SITE.DAT".to_string());
    names.insert("FSOIL".to_string(), "SOIL.DAT".to_string());
    names.insert("FWLST".to_string(), "WLST.DAT".to_string());
    names.insert("FWPM1".to_string(), "WPM1.DAT".to_string());
    names.insert("FWIND".to_string(), "WIND.DAT".to_string());
    names.insert("FOPSC".to_string(), "OPSC.DAT".to_string());
    names.insert("FPRNT".to_string(), "PRNT.DAT".to_string());

    EngineInstallation {
        dir: dir.to_path_buf(),
        exe_name: "engine.sh".to_string(),
        epic_file: EpicFile { names },
    }
}

fn write_dly(path: &Path) {
    let row = "  2020   1   1  5.20 10.00 -2.50  0.00 70.00  3.10\n";
    std::fs::write(path, row).unwrap();
}

#[tokio::test]
async fn runs_fake_engine_and_harvests_output() {
    let installation_dir = tempfile::tempdir().unwrap();
    let sandbox_dir = tempfile::tempdir().unwrap();
    let log_dir = tempfile::tempdir().unwrap();

    let installation = fake_engine_installation(installation_dir.path());
    let dly_path = installation_dir.path().join("weather.dly");
    write_dly(&dly_path);

    let mut site = Site::new(
        "SITE1",
        installation_dir.path().join("soil.sol"),
        dly_path,
        installation_dir.path().join("site.sit"),
        40.0,
        -90.0,
        250.0,
    )
    .unwrap();

    let config = RunConfig {
        output_dir: None,
        log_dir: log_dir.path().to_path_buf(),
        output_types: vec!["OUT".to_string()],
    };
    let runner = EngineRunner {
        installation: &installation,
        config: &config,
        timeout: Some(std::time::Duration::from_secs(10)),
    };

    runner.run(&mut site, sandbox_dir.path()).await.unwrap();

    let out_path = sandbox_dir.path().join("SITE1.OUT");
    assert!(out_path.exists());
    assert_eq!(site.outputs.get("OUT"), Some(&out_path));

    let dly_copy = sandbox_dir.path().join("1.DLY");
    assert!(dly_copy.exists());
    let wp1 = sandbox_dir.path().join("1.WP1");
    assert!(wp1.exists());
}

#[tokio::test]
async fn reports_missing_output_and_preserves_log() {
    let installation_dir = tempfile::tempdir().unwrap();
    let sandbox_dir = tempfile::tempdir().unwrap();
    let log_dir = tempfile::tempdir().unwrap();

    let installation = fake_engine_installation(installation_dir.path());
    let dly_path = installation_dir.path().join("weather.dly");
    write_dly(&dly_path);

    let mut site = Site::new(
        "SITE2",
        installation_dir.path().join("soil.sol"),
        dly_path,
        installation_dir.path().join("site.sit"),
        40.0,
        -90.0,
        250.0,
    )
    .unwrap();

    let config = RunConfig {
        output_dir: None,
        log_dir: log_dir.path().to_path_buf(),
        // The fake engine only ever writes "<id>.OUT"; asking for a kind it
        // never produces exercises the missing-output path.
        output_types: vec!["SUM".to_string()],
    };
    let runner = EngineRunner {
        installation: &installation,
        config: &config,
        timeout: Some(std::time::Duration::from_secs(10)),
    };

    let err = runner.run(&mut site, sandbox_dir.path()).await.unwrap_err();
    match err {
        RunOutcome::MissingOutput { site_id, kind, log_path } => {
            assert_eq!(site_id, "SITE2");
            assert_eq!(kind, "SUM");
            assert!(log_path.exists(), "preserved log should exist at {log_path:?}");
        }
        other => panic!("expected MissingOutput, got {other:?}"),
    }
}
