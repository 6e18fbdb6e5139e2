//! Global engine parameter table (PARM1501.DAT): a 13x10 grid of tunable
//! coefficients plus two 30-wide crop-response vectors (`SCRP1`, `SCRP2`).
//! Several grid cells are unused in any given engine build and are written
//! as blanks; those positions must never be treated as editable and must
//! round-trip back to blanks untouched.

use std::path::Path;

use crate::error::{WorkspaceError, WorkspaceResult};
use crate::params::{ParameterModel, Sensitivity};

const GRID_ROWS: usize = 13;
const GRID_COLS: usize = 10;
const SCRP_LEN: usize = 30;
const FIELD_WIDTH: usize = 8;

#[derive(Debug, Clone)]
pub struct IeParm {
    /// `grid[row][col]`, `None` marks a blank/unused cell that must not be edited.
    grid: Vec<Vec<Option<f64>>>,
    pub scrp1: Vec<f64>,
    pub scrp2: Vec<f64>,
    sensitivity: Option<Sensitivity>,
}

fn grid_name(row: usize, col: usize) -> String {
    format!("PARM{}", row * GRID_COLS + col + 1)
}

impl IeParm {
    /// Reads the 30-line `SCRP1`/`SCRP2` section (two `FIELD_WIDTH`-wide
    /// columns per line, transposed into two 30-element vectors) followed
    /// by the 13-line, 10-column `PARM` grid. Blank grid cells become `None`
    /// and must never be treated as editable.
    pub fn load(path: impl AsRef<Path>) -> WorkspaceResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| WorkspaceError::io(path, e))?;
        let mut lines = text.lines();

        let mut scrp1 = Vec::with_capacity(SCRP_LEN);
        let mut scrp2 = Vec::with_capacity(SCRP_LEN);
        for r in 0..SCRP_LEN {
            let line = lines.next().unwrap_or_default();
            let first = line.get(0..FIELD_WIDTH.min(line.len())).unwrap_or("").trim();
            let second_start = FIELD_WIDTH;
            let second = line
                .get(second_start..(second_start + FIELD_WIDTH).min(line.len()))
                .unwrap_or("")
                .trim();
            scrp1.push(parse_scrp_cell(path, r, "SCRP1", first)?);
            scrp2.push(parse_scrp_cell(path, r, "SCRP2", second)?);
        }

        let mut grid = Vec::with_capacity(GRID_ROWS);
        for r in 0..GRID_ROWS {
            let line = lines.next().unwrap_or_default();
            let mut row = Vec::with_capacity(GRID_COLS);
            for c in 0..GRID_COLS {
                let start = c * FIELD_WIDTH;
                let end = start + FIELD_WIDTH;
                let raw = line.get(start..end.min(line.len())).unwrap_or("").trim();
                row.push(if raw.is_empty() {
                    None
                } else {
                    Some(raw.parse::<f64>().map_err(|_| WorkspaceError::ParseError {
                        path: path.to_path_buf(),
                        line: SCRP_LEN + r,
                        reason: format!("grid cell ({r},{c}) value {raw:?} is not numeric"),
                    })?)
                });
            }
            grid.push(row);
        }

        Ok(Self {
            grid,
            scrp1,
            scrp2,
            sensitivity: None,
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> WorkspaceResult<()> {
        let path = path.as_ref();
        let mut out = String::new();
        for i in 0..SCRP_LEN {
            let a = self.scrp1.get(i).copied().unwrap_or(0.0);
            let b = self.scrp2.get(i).copied().unwrap_or(0.0);
            out.push_str(&format!("{a:FIELD_WIDTH$.2}{b:FIELD_WIDTH$.2}"));
            out.push('\n');
        }
        for row in &self.grid {
            for cell in row {
                match cell {
                    Some(v) => out.push_str(&format_grid_cell(*v)),
                    None => out.push_str(&" ".repeat(FIELD_WIDTH)),
                }
            }
            out.push('\n');
        }
        std::fs::write(path, out).map_err(|e| WorkspaceError::io(path, e))
    }

    fn scrp_names(prefix: &str) -> Vec<String> {
        (1..=SCRP_LEN).map(|i| format!("{prefix}_{i}")).collect()
    }
}

fn parse_scrp_cell(path: &Path, line: usize, which: &str, raw: &str) -> WorkspaceResult<f64> {
    raw.parse::<f64>().map_err(|_| WorkspaceError::ParseError {
        path: path.to_path_buf(),
        line,
        reason: format!("{which} cell {raw:?} is not numeric"),
    })
}

/// Mirrors the reference writer's adaptive-precision `PARM` cell format:
/// round to fit an 8-wide field given the integer part's length, then use
/// just enough decimal digits to represent the rounded value, floored at 2.
fn format_grid_cell(value: f64) -> String {
    let int_digits = (value.trunc().abs() as i64).to_string().len().max(1);
    let max_dec = 7usize.saturating_sub(int_digits);
    let scale = 10f64.powi(max_dec as i32);
    let rounded = (value * scale).round() / scale;

    let mut decimals = max_dec;
    for dec in 0..=max_dec {
        let s = 10f64.powi(dec as i32);
        if ((rounded * s).round() / s - rounded).abs() < 1e-9 {
            decimals = dec;
            break;
        }
    }
    let decimals = decimals.max(2);
    format!("{rounded:FIELD_WIDTH$.decimals$}")
}

impl ParameterModel for IeParm {
    fn set_sensitive(&mut self, sources: &[Sensitivity], _crop_codes: &[i32]) {
        self.sensitivity = Some(Sensitivity::union(sources));
    }

    fn constraints(&self) -> Vec<(f64, f64)> {
        self.sensitivity
            .as_ref()
            .map(|s| s.active.iter().map(|p| (p.min, p.max)).collect())
            .unwrap_or_default()
    }

    fn current(&self) -> Vec<f64> {
        let Some(s) = &self.sensitivity else {
            return Vec::new();
        };
        s.active.iter().map(|p| self.get(&p.name)).collect()
    }

    fn edit(&mut self, values: &[f64]) -> WorkspaceResult<()> {
        let Some(s) = self.sensitivity.clone() else {
            return Ok(());
        };
        if values.len() != s.active.len() {
            return Err(WorkspaceError::InvalidValue {
                key: "edit vector".into(),
                expected: "length matching active dimensions",
                value: values.len().to_string(),
            });
        }
        for (p, value) in s.active.iter().zip(values) {
            self.set(&p.name, *value)?;
        }
        Ok(())
    }

    fn var_names(&self) -> Vec<String> {
        self.sensitivity
            .as_ref()
            .map(|s| s.active.iter().map(|p| p.name.clone()).collect())
            .unwrap_or_default()
    }

    fn save(&self, path: &std::path::Path) -> WorkspaceResult<()> {
        IeParm::save(self, path)
    }
}

impl IeParm {
    fn get(&self, name: &str) -> f64 {
        if let Some(idx) = Self::scrp_names("SCRP1").iter().position(|n| n == name) {
            return self.scrp1.get(idx).copied().unwrap_or(0.0);
        }
        if let Some(idx) = Self::scrp_names("SCRP2").iter().position(|n| n == name) {
            return self.scrp2.get(idx).copied().unwrap_or(0.0);
        }
        for (r, row) in self.grid.iter().enumerate() {
            for (c, cell) in row.iter().enumerate() {
                if grid_name(r, c) == name {
                    return cell.unwrap_or(0.0);
                }
            }
        }
        0.0
    }

    fn set(&mut self, name: &str, value: f64) -> WorkspaceResult<()> {
        if let Some(idx) = Self::scrp_names("SCRP1").iter().position(|n| n == name) {
            if idx < self.scrp1.len() {
                self.scrp1[idx] = value;
            }
            return Ok(());
        }
        if let Some(idx) = Self::scrp_names("SCRP2").iter().position(|n| n == name) {
            if idx < self.scrp2.len() {
                self.scrp2[idx] = value;
            }
            return Ok(());
        }
        for (r, row) in self.grid.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                if grid_name(r, c) == name {
                    if cell.is_none() {
                        return Err(WorkspaceError::InvalidValue {
                            key: name.to_string(),
                            expected: "a populated grid cell, not a blank/unused slot",
                            value: value.to_string(),
                        });
                    }
                    *cell = Some(value);
                    return Ok(());
                }
            }
        }
        Err(WorkspaceError::InvalidValue {
            key: name.to_string(),
            expected: "a known PARM/SCRP1/SCRP2 name",
            value: value.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::SensitiveParam;

    fn sample() -> IeParm {
        let mut grid = vec![vec![Some(1.0); GRID_COLS]; GRID_ROWS];
        grid[0][0] = None;
        IeParm {
            grid,
            scrp1: vec![0.5; SCRP_LEN],
            scrp2: vec![0.25; SCRP_LEN],
            sensitivity: None,
        }
    }

    #[test]
    fn blank_cells_reject_edits() {
        let mut parm = sample();
        parm.set_sensitive(
            &[Sensitivity {
                active: vec![SensitiveParam {
                    name: grid_name(0, 0),
                    min: 0.0,
                    max: 1.0,
                }],
            }],
            &[],
        );
        assert!(parm.edit(&[0.9]).is_err());
    }

    #[test]
    fn grid_and_scrp_round_trip_through_save() {
        let parm = sample();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("PARM1501.DAT");
        parm.save(&path).unwrap();
        let reloaded = IeParm::load(&path).unwrap();
        assert_eq!(reloaded.grid[0][0], None);
        assert_eq!(reloaded.grid[1][1], Some(1.0));
        assert!((reloaded.scrp1[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn load_reads_scrp_section_before_grid_at_fixed_width() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("PARM1501.DAT");
        let mut text = String::new();
        for i in 0..SCRP_LEN {
            // two adjacent 8-wide fields with no separating space, so a
            // whitespace split would misparse this line.
            text.push_str(&format!("{:8.2}{:8.2}\n", i as f64, -(i as f64)));
        }
        for _ in 0..GRID_ROWS {
            text.push_str(&format!("{:8.2}", 1.0).repeat(GRID_COLS));
            text.push('\n');
        }
        std::fs::write(&path, text).unwrap();

        let parm = IeParm::load(&path).unwrap();
        assert_eq!(parm.scrp1.len(), SCRP_LEN);
        assert_eq!(parm.scrp2.len(), SCRP_LEN);
        assert!((parm.scrp1[5] - 5.0).abs() < 1e-9);
        assert!((parm.scrp2[5] - -5.0).abs() < 1e-9);
        assert_eq!(parm.grid.len(), GRID_ROWS);
        assert_eq!(parm.grid[0][0], Some(1.0));
    }

    #[test]
    fn grid_cell_preserves_original_decimal_precision() {
        assert_eq!(format_grid_cell(3.4567), "  3.4567");
        assert_eq!(format_grid_cell(12.0), "   12.00");
        assert_eq!(format_grid_cell(100.0), "  100.00");
    }
}
