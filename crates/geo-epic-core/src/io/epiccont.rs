//! Engine configuration file (EPICCONT.DAT): fixed-width text. Only a
//! handful of fields are understood; everything else round-trips untouched.

use std::path::Path;

use crate::error::{WorkspaceError, WorkspaceResult};

const DURATION_COL: std::ops::Range<usize> = 0..4;
const START_YEAR_COL: std::ops::Range<usize> = 4..8;
const START_MONTH_COL: std::ops::Range<usize> = 8..12;
const START_DAY_COL: std::ops::Range<usize> = 12..16;

const IRRIGATION_LINE: usize = 3;
const NITROGEN_LINE: usize = 4;

#[derive(Debug, Clone)]
pub struct EpicCont {
    lines: Vec<String>,
    pub duration_years: u32,
    pub start_year: u32,
    pub start_month: u32,
    pub start_day: u32,
}

impl EpicCont {
    pub fn load(path: impl AsRef<Path>) -> WorkspaceResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| WorkspaceError::io(path, e))?;
        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        let first = lines.first().cloned().unwrap_or_default();
        let field = |col: std::ops::Range<usize>| -> WorkspaceResult<u32> {
            first
                .get(col.clone())
                .unwrap_or("")
                .trim()
                .parse::<u32>()
                .map_err(|_| WorkspaceError::ParseError {
                    path: path.to_path_buf(),
                    line: 0,
                    reason: format!("field at {col:?} is not an integer"),
                })
        };
        Ok(Self {
            duration_years: field(DURATION_COL)?,
            start_year: field(START_YEAR_COL)?,
            start_month: field(START_MONTH_COL)?,
            start_day: field(START_DAY_COL)?,
            lines,
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> WorkspaceResult<()> {
        let path = path.as_ref();
        let mut lines = self.lines.clone();
        if lines.is_empty() {
            lines.push(String::new());
        }
        let mut first: Vec<char> = lines[0].chars().collect();
        while first.len() < 16 {
            first.push(' ');
        }
        write_int(&mut first, DURATION_COL, self.duration_years);
        write_int(&mut first, START_YEAR_COL, self.start_year);
        write_int(&mut first, START_MONTH_COL, self.start_month);
        write_int(&mut first, START_DAY_COL, self.start_day);
        lines[0] = first.into_iter().collect();

        let mut out = lines.join("\n");
        out.push('\n');
        std::fs::write(path, out).map_err(|e| WorkspaceError::io(path, e))
    }

    /// Irrigation parameters on the fixed irrigation line, as whitespace-separated floats.
    pub fn irrigation_params(&self) -> Vec<f64> {
        self.line_floats(IRRIGATION_LINE)
    }

    pub fn set_irrigation_params(&mut self, values: &[f64]) {
        self.set_line_floats(IRRIGATION_LINE, values);
    }

    /// Nitrogen parameters on the fixed nitrogen line.
    pub fn nitrogen_params(&self) -> Vec<f64> {
        self.line_floats(NITROGEN_LINE)
    }

    pub fn set_nitrogen_params(&mut self, values: &[f64]) {
        self.set_line_floats(NITROGEN_LINE, values);
    }

    fn line_floats(&self, line: usize) -> Vec<f64> {
        self.lines
            .get(line)
            .map(|l| l.split_whitespace().filter_map(|s| s.parse().ok()).collect())
            .unwrap_or_default()
    }

    fn set_line_floats(&mut self, line: usize, values: &[f64]) {
        while self.lines.len() <= line {
            self.lines.push(String::new());
        }
        let rendered: Vec<String> = values.iter().map(|v| format!("{v:6.2}")).collect();
        self.lines[line] = format!("  {}", rendered.join("  "));
    }
}

fn write_int(chars: &mut Vec<char>, col: std::ops::Range<usize>, value: u32) {
    let text = format!("{value:>width$}", width = col.end - col.start);
    for (i, ch) in col.zip(text.chars()) {
        if i < chars.len() {
            chars[i] = ch;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_duration_and_start_date() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("EPICCONT.DAT");
        std::fs::write(
            &path,
            "  10200001215tail-bytes-preserved\nirrelevant line\nanother\n  1.00  2.00\n  3.00  4.00\n",
        )
        .unwrap();

        let mut cont = EpicCont::load(&path).unwrap();
        assert_eq!(cont.duration_years, 10);
        assert_eq!(cont.start_year, 2000);
        assert_eq!(cont.start_month, 12);
        assert_eq!(cont.start_day, 15);
        assert_eq!(cont.irrigation_params(), vec![1.0, 2.0]);

        cont.duration_years = 20;
        cont.save(&path).unwrap();
        let reloaded = EpicCont::load(&path).unwrap();
        assert_eq!(reloaded.duration_years, 20);
        assert_eq!(reloaded.start_year, 2000);
        assert!(std::fs::read_to_string(&path)
            .unwrap()
            .contains("tail-bytes-preserved"));
    }
}
