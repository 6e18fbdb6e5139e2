//! Site handle: an immutable reference to one field's input bundle, plus
//! the mutable output map the Engine Runner populates after a run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{WorkspaceError, WorkspaceResult};

static SITE_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9]{1,9}$").unwrap());

#[derive(Debug, Clone)]
pub struct Site {
    pub site_id: String,
    pub soil: PathBuf,
    pub dly: PathBuf,
    pub opc: Option<PathBuf>,
    pub sit: PathBuf,
    pub lat: f64,
    pub lon: f64,
    pub elevation: f64,
    pub outputs: BTreeMap<String, PathBuf>,
}

impl Site {
    pub fn new(
        site_id: impl Into<String>,
        soil: impl Into<PathBuf>,
        dly: impl Into<PathBuf>,
        sit: impl Into<PathBuf>,
        lat: f64,
        lon: f64,
        elevation: f64,
    ) -> WorkspaceResult<Self> {
        let site_id = site_id.into();
        validate_site_id(&site_id)?;
        Ok(Self {
            site_id,
            soil: soil.into(),
            dly: dly.into(),
            opc: None,
            sit: sit.into(),
            lat,
            lon,
            elevation,
            outputs: BTreeMap::new(),
        })
    }

    pub fn with_opc(mut self, opc: impl Into<PathBuf>) -> Self {
        self.opc = Some(opc.into());
        self
    }

    /// Copies the site's input files into `dest`, under their basenames,
    /// for a sandboxed run. Missing optional files are skipped.
    pub fn copy_inputs_into(&self, dest: &Path) -> WorkspaceResult<()> {
        for path in [Some(&self.soil), Some(&self.dly), Some(&self.sit), self.opc.as_ref()]
            .into_iter()
            .flatten()
        {
            let Some(name) = path.file_name() else {
                continue;
            };
            std::fs::copy(path, dest.join(name)).map_err(|e| WorkspaceError::io(path, e))?;
        }
        Ok(())
    }
}

pub fn validate_site_id(site_id: &str) -> WorkspaceResult<()> {
    if SITE_ID_RE.is_match(site_id) {
        Ok(())
    } else {
        Err(WorkspaceError::InvalidSiteId(site_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_site_ids_over_nine_characters() {
        assert!(validate_site_id("ABCDEFGHIJ").is_err());
        assert!(validate_site_id("ABC123").is_ok());
    }

    #[test]
    fn rejects_non_alphanumeric_site_ids() {
        assert!(validate_site_id("A-1").is_err());
        assert!(validate_site_id("A_1").is_err());
    }
}
