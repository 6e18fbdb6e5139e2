//! Parameter tables used by the calibration driver: per-crop CROPCOM rows
//! and the global engine parameter block (PARM1501.DAT). Both expose the
//! same narrow surface the driver needs — bounds, current values, and a
//! way to push a candidate vector back in.

pub mod cropcom;
pub mod ieparm;

pub use cropcom::CropCom;
pub use ieparm::IeParm;

use crate::error::WorkspaceResult;

/// A single tunable parameter and the bounds it may range over.
#[derive(Debug, Clone, PartialEq)]
pub struct SensitiveParam {
    pub name: String,
    pub min: f64,
    pub max: f64,
}

/// The set of parameters a calibration run has declared sensitive, as
/// loaded from a sensitivity-analysis CSV (`Parm,Min,Max` columns).
#[derive(Debug, Clone, Default)]
pub struct Sensitivity {
    pub active: Vec<SensitiveParam>,
}

impl Sensitivity {
    pub fn from_rows(rows: impl IntoIterator<Item = (String, f64, f64)>) -> Self {
        Self {
            active: rows
                .into_iter()
                .map(|(name, min, max)| SensitiveParam { name, min, max })
                .collect(),
        }
    }

    /// Loads a `Parm, Min, Max, Select` sensitivity CSV, keeping only rows
    /// whose `Select` column is truthy (`1`, `true`, `yes`, case-insensitive).
    pub fn load_csv(path: impl AsRef<std::path::Path>) -> WorkspaceResult<Self> {
        let path = path.as_ref();
        let mut reader = csv::Reader::from_path(path)
            .map_err(|e| crate::error::WorkspaceError::io(path, std::io::Error::other(e)))?;
        let mut active = Vec::new();
        for result in reader.records() {
            let row = result.map_err(|e| crate::error::WorkspaceError::io(path, std::io::Error::other(e)))?;
            let (Some(name), Some(min), Some(max), Some(select)) =
                (row.get(0), row.get(1), row.get(2), row.get(3))
            else {
                continue;
            };
            if !is_truthy(select) {
                continue;
            }
            let (Ok(min), Ok(max)) = (min.parse::<f64>(), max.parse::<f64>()) else {
                continue;
            };
            active.push(SensitiveParam {
                name: name.to_string(),
                min,
                max,
            });
        }
        Ok(Self { active })
    }

    /// Merges several sensitivity sources, keeping the first occurrence of
    /// each parameter name (mirrors roster union's "keep last wins" only in
    /// reverse: here the earliest file takes precedence, since sensitivity
    /// lists are layered most-specific-first).
    pub fn union(sources: &[Sensitivity]) -> Self {
        let mut seen = std::collections::HashSet::new();
        let mut active = Vec::new();
        for source in sources {
            for p in &source.active {
                if seen.insert(p.name.clone()) {
                    active.push(p.clone());
                }
            }
        }
        Self { active }
    }
}

fn is_truthy(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

/// Common surface the calibration driver drives every parameter table
/// through: declare what's tunable, read bounds/current values, and push
/// an edited vector back.
pub trait ParameterModel {
    fn set_sensitive(&mut self, sources: &[Sensitivity], crop_codes: &[i32]);
    fn constraints(&self) -> Vec<(f64, f64)>;
    fn current(&self) -> Vec<f64>;
    fn edit(&mut self, values: &[f64]) -> WorkspaceResult<()>;
    fn var_names(&self) -> Vec<String>;
    fn save(&self, path: &std::path::Path) -> WorkspaceResult<()>;
}
