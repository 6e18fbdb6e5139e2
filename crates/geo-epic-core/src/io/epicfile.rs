//! File-name table (EPICFILE.DAT): key/value pairs, two whitespace-separated
//! tokens per line, mapping logical file roles to physical filenames.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{WorkspaceError, WorkspaceResult};

pub const REQUIRED_KEYS: [&str; 7] = ["FSITE", "FSOIL", "FWLST", "FWPM1", "FWIND", "FOPSC", "FPRNT"];

#[derive(Debug, Clone, Default)]
pub struct EpicFile {
    pub names: BTreeMap<String, String>,
}

impl EpicFile {
    pub fn load(path: impl AsRef<Path>) -> WorkspaceResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| WorkspaceError::io(path, e))?;
        let mut names = BTreeMap::new();
        for line in text.lines() {
            let mut parts = line.split_whitespace();
            if let (Some(key), Some(value)) = (parts.next(), parts.next()) {
                names.insert(key.to_string(), value.to_string());
            }
        }
        Ok(Self { names })
    }

    pub fn get(&self, key: &str) -> WorkspaceResult<&str> {
        self.names
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| WorkspaceError::ParseError {
                path: Path::new("EPICFILE.DAT").to_path_buf(),
                line: 0,
                reason: format!("missing file-name entry {key:?}"),
            })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> WorkspaceResult<()> {
        let path = path.as_ref();
        let mut out = String::new();
        for (k, v) in &self.names {
            out.push_str(&format!("{k} {v}\n"));
        }
        std::fs::write(path, out).map_err(|e| WorkspaceError::io(path, e))
    }
}
