//! Print-control file: fixed-width text with two rows of toggle flags and
//! two rows of extension names at known line offsets. Flipping toggles to
//! reflect the desired output set preserves every other line untouched.

use std::path::Path;

use crate::error::{WorkspaceError, WorkspaceResult};

const TOGGLE_LINE_1: usize = 14;
const TOGGLE_LINE_2: usize = 15;

/// Output kinds that must always be enabled regardless of configuration.
pub const ALWAYS_ON: [&str; 2] = ["ACY", "DGN"];

#[derive(Debug, Clone)]
pub struct PrintControl {
    lines: Vec<String>,
}

impl PrintControl {
    pub fn load(path: impl AsRef<Path>) -> WorkspaceResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| WorkspaceError::io(path, e))?;
        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        if lines.len() < TOGGLE_LINE_2 + 1 + 2 {
            return Err(WorkspaceError::ParseError {
                path: path.to_path_buf(),
                line: lines.len(),
                reason: "file too short to contain toggle and extension rows".into(),
            });
        }
        Ok(Self { lines })
    }

    fn ext_line_1(&self) -> usize {
        self.lines.len() - 2
    }
    fn ext_line_2(&self) -> usize {
        self.lines.len() - 1
    }

    fn extensions(&self) -> Vec<String> {
        let a = self.lines[self.ext_line_1()].replace('*', " ");
        let b = self.lines[self.ext_line_2()].replace('*', " ");
        a.split_whitespace()
            .chain(b.split_whitespace())
            .map(str::to_string)
            .collect()
    }

    fn toggles(&self) -> Vec<String> {
        self.lines[TOGGLE_LINE_1]
            .split_whitespace()
            .chain(self.lines[TOGGLE_LINE_2].split_whitespace())
            .map(str::to_string)
            .collect()
    }

    pub fn enabled_outputs(&self) -> Vec<String> {
        self.extensions()
            .into_iter()
            .zip(self.toggles())
            .filter(|(_, toggle)| toggle == "1")
            .map(|(ext, _)| ext)
            .collect()
    }

    /// Enables exactly the given output kinds (plus `ALWAYS_ON`), disabling
    /// every other known extension; layout of every other line is untouched.
    pub fn set_enabled_outputs(&mut self, wanted: &[String]) {
        let wanted_lower: std::collections::HashSet<String> = wanted
            .iter()
            .map(|s| s.to_lowercase())
            .chain(ALWAYS_ON.iter().map(|s| s.to_lowercase()))
            .collect();

        let exts = self.extensions();
        let split_at = self.lines[TOGGLE_LINE_1].split_whitespace().count();
        let mut toggles: Vec<&str> = exts
            .iter()
            .map(|ext| {
                if wanted_lower.contains(&ext.to_lowercase()) {
                    "1"
                } else {
                    "0"
                }
            })
            .collect();
        if toggles.len() < exts.len() {
            toggles.resize(exts.len(), "0");
        }

        let (first, second) = toggles.split_at(split_at.min(toggles.len()));
        self.lines[TOGGLE_LINE_1] = format!("   {}", first.join("   "));
        self.lines[TOGGLE_LINE_2] = format!("   {}", second.join("   "));
    }

    pub fn save(&self, path: impl AsRef<Path>) -> WorkspaceResult<()> {
        let path = path.as_ref();
        let mut out = self.lines.join("\n");
        out.push('\n');
        std::fs::write(path, out).map_err(|e| WorkspaceError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_lines() -> Vec<String> {
        let mut lines = vec![String::new(); 16];
        lines[TOGGLE_LINE_1] = "   1   0   0".to_string();
        lines[TOGGLE_LINE_2] = "   0   1".to_string();
        lines.push("ACY DGN YLD".to_string());
        lines.push("SNO WTR".to_string());
        lines
    }

    #[test]
    fn enables_requested_and_always_on_outputs() {
        let mut pc = PrintControl {
            lines: sample_lines(),
        };
        pc.set_enabled_outputs(&["YLD".to_string()]);
        let enabled = pc.enabled_outputs();
        assert!(enabled.contains(&"ACY".to_string()));
        assert!(enabled.contains(&"DGN".to_string()));
        assert!(enabled.contains(&"YLD".to_string()));
        assert!(!enabled.contains(&"SNO".to_string()));
    }
}
