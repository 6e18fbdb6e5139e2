use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{WorkspaceError, WorkspaceResult};

/// Layered configuration document: defaults, file, environment, then CLI
/// overrides, each later layer winning. Relative (`./`-prefixed) path values
/// are resolved against the directory of the file that introduced them, not
/// the process current directory, so a config can be invoked from anywhere.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(rename = "EPICModel")]
    pub epic_model: PathBuf,
    #[serde(default)]
    pub output_types: Vec<String>,
    pub output_dir: Option<PathBuf>,
    pub log_dir: PathBuf,
    pub run_info: PathBuf,
    pub opc_dir: PathBuf,
    pub weather: DirSetting,
    pub soil: SoilSetting,
    pub site: DirSetting,
    #[serde(default = "default_num_workers")]
    pub num_of_workers: usize,
    pub timeout: Option<u64>,
    pub select: Option<String>,
    pub start_date: Option<String>,
    pub duration: Option<u32>,
    #[serde(default)]
    pub delete_after_use: bool,
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub data_logger: DataLoggerSetting,
    pub objective: Option<ObjectiveSetting>,
    #[serde(default)]
    pub calibration: CalibrationSetting,
}

/// Names the logged table/column the CLI's built-in objective reduces to a
/// single scalar. A user embedding `geo-epic-core` as a library supplies a
/// richer `Objective` directly; the CLI binary only has this config surface.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectiveSetting {
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CalibrationSetting {
    #[serde(default)]
    pub models: Vec<ParameterModelSetting>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParameterModelSetting {
    pub kind: ParameterModelKind,
    pub path: PathBuf,
    pub sensitivity: PathBuf,
    #[serde(default)]
    pub crop_codes: Vec<i32>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParameterModelKind {
    CropCom,
    IeParm,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirSetting {
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SoilSetting {
    pub files_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DataLoggerSetting {
    #[serde(default)]
    pub backend: DataLoggerBackendKind,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataLoggerBackendKind {
    #[default]
    Memory,
    Sqlite,
}

fn default_num_workers() -> usize {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

const REQUIRED_KEYS: &[&str] = &[
    "EPICModel",
    "log_dir",
    "run_info",
    "opc_dir",
    "weather.dir",
    "soil.files_dir",
    "site.dir",
];

impl Config {
    /// Load a TOML config file, merge environment overrides (`GEOEPIC_` prefix,
    /// e.g. `GEOEPIC_NUM_OF_WORKERS`), resolve relative paths against the file's
    /// directory, and validate. Missing keys are collected into one error.
    pub fn load(path: impl AsRef<Path>) -> WorkspaceResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| WorkspaceError::io(path, e))?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::load_from_str(&text, &base_dir)
    }

    pub fn load_from_str(text: &str, base_dir: &Path) -> WorkspaceResult<Self> {
        let mut doc: toml::Value = toml::from_str(text).map_err(|e| WorkspaceError::InvalidValue {
            key: "<root>".into(),
            expected: "TOML document",
            value: e.to_string(),
        })?;

        apply_env_overrides(&mut doc);
        validate_required_keys(&doc)?;
        resolve_relative_paths(&mut doc, base_dir);

        doc.try_into().map_err(|e: toml::de::Error| WorkspaceError::InvalidValue {
            key: "<root>".into(),
            expected: "Config schema",
            value: e.to_string(),
        })
    }
}

fn validate_required_keys(doc: &toml::Value) -> WorkspaceResult<()> {
    let mut missing = Vec::new();
    for key in REQUIRED_KEYS {
        if lookup_dotted(doc, key).is_none() {
            missing.push((*key).to_string());
        }
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(WorkspaceError::MissingKeys(missing))
    }
}

fn lookup_dotted<'a>(doc: &'a toml::Value, dotted: &str) -> Option<&'a toml::Value> {
    let mut cur = doc;
    for part in dotted.split('.') {
        cur = cur.as_table()?.get(part)?;
    }
    Some(cur)
}

/// Environment overrides follow the `GEOEPIC_<UPPER_SNAKE_KEY>` convention;
/// dotted keys use `__` as the nesting separator (`GEOEPIC_WEATHER__DIR`).
fn apply_env_overrides(doc: &mut toml::Value) {
    let prefix = "GEOEPIC_";
    let overrides: BTreeMap<String, String> = std::env::vars()
        .filter_map(|(k, v)| {
            k.strip_prefix(prefix)
                .map(|rest| (rest.to_ascii_lowercase(), v))
        })
        .collect();

    for (key, value) in overrides {
        let path: Vec<&str> = key.split("__").collect();
        set_dotted(doc, &path, &value);
    }
}

fn set_dotted(doc: &mut toml::Value, path: &[&str], raw_value: &str) {
    let Some(table) = doc.as_table_mut() else {
        return;
    };
    let value = parse_env_scalar(raw_value);
    if path.len() == 1 {
        table.insert(path[0].to_string(), value);
        return;
    }
    let entry = table
        .entry(path[0].to_string())
        .or_insert_with(|| toml::Value::Table(Default::default()));
    if !entry.is_table() {
        *entry = toml::Value::Table(Default::default());
    }
    set_dotted(entry, &path[1..], raw_value);
}

fn parse_env_scalar(raw: &str) -> toml::Value {
    if let Ok(n) = raw.parse::<i64>() {
        toml::Value::Integer(n)
    } else if let Ok(b) = raw.parse::<bool>() {
        toml::Value::Boolean(b)
    } else {
        toml::Value::String(raw.to_string())
    }
}

/// Rewrites every string value starting with `./` into an absolute path
/// anchored at `base_dir`, recursing through tables and arrays.
fn resolve_relative_paths(value: &mut toml::Value, base_dir: &Path) {
    match value {
        toml::Value::String(s) => {
            if let Some(rest) = s.strip_prefix("./") {
                *s = base_dir.join(rest).to_string_lossy().into_owned();
            }
        }
        toml::Value::Table(table) => {
            for v in table.values_mut() {
                resolve_relative_paths(v, base_dir);
            }
        }
        toml::Value::Array(items) => {
            for v in items.iter_mut() {
                resolve_relative_paths(v, base_dir);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> &'static str {
        r#"
        EPICModel = "/opt/epic/EPIC1102"
        output_types = ["ACY", "DGN"]
        log_dir = "./logs"
        run_info = "./sites.csv"
        opc_dir = "./opc"
        num_of_workers = 2

        [weather]
        dir = "./weather"

        [soil]
        files_dir = "./soil"

        [site]
        dir = "./site"
        "#
    }

    #[test]
    fn resolves_relative_paths_against_config_dir() {
        let base = Path::new("/home/user/project");
        let cfg = Config::load_from_str(sample(), base).unwrap();
        assert_eq!(cfg.log_dir, base.join("logs"));
        assert_eq!(cfg.opc_dir, base.join("opc"));
        assert_eq!(cfg.weather.dir, base.join("weather"));
    }

    #[test]
    fn missing_keys_are_batched() {
        let err = Config::load_from_str("EPICModel = \"/x\"", Path::new(".")).unwrap_err();
        match err {
            WorkspaceError::MissingKeys(keys) => {
                assert!(keys.contains(&"log_dir".to_string()));
                assert!(keys.contains(&"weather.dir".to_string()));
            }
            other => panic!("expected MissingKeys, got {other:?}"),
        }
    }

    #[test]
    fn env_override_applies_after_file() {
        std::env::set_var("GEOEPIC_NUM_OF_WORKERS", "9");
        let cfg = Config::load_from_str(sample(), Path::new(".")).unwrap();
        std::env::remove_var("GEOEPIC_NUM_OF_WORKERS");
        assert_eq!(cfg.num_of_workers, 9);
    }
}
