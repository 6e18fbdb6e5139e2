//! Site-file (SIT): fixed-width text preserving every byte outside the
//! handful of numeric fields the core needs to read and write.

use std::path::{Path, PathBuf};

use crate::error::{WorkspaceError, WorkspaceResult};

const LAT_COL: std::ops::Range<usize> = 0..8;
const LON_COL: std::ops::Range<usize> = 8..16;
const ELEV_COL: std::ops::Range<usize> = 16..24;
const SLOPE_LEN_COL: std::ops::Range<usize> = 48..56;
const SLOPE_STEEP_COL: std::ops::Range<usize> = 56..64;

const LAT_LINE: usize = 3;
const SLOPE_LINE: usize = 4;

#[derive(Debug, Clone)]
pub struct Sit {
    /// Every line of the source file, byte-for-byte, including line endings.
    lines: Vec<String>,
    pub lat: f64,
    pub lon: f64,
    pub elevation: f64,
    pub slope_length: f64,
    pub slope_steep: f64,
}

impl Sit {
    pub fn load(path: impl AsRef<Path>) -> WorkspaceResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| WorkspaceError::io(path, e))?;
        let lines: Vec<String> = text.lines().map(str::to_string).collect();

        if lines.len() <= SLOPE_LINE {
            return Err(WorkspaceError::ParseError {
                path: path.to_path_buf(),
                line: lines.len(),
                reason: "file has fewer than 5 lines".into(),
            });
        }

        let lat = read_field(path, &lines, LAT_LINE, LAT_COL)?;
        let lon = read_field(path, &lines, LAT_LINE, LON_COL)?;
        let elevation = read_field(path, &lines, LAT_LINE, ELEV_COL)?;
        let slope_length = read_field(path, &lines, SLOPE_LINE, SLOPE_LEN_COL)?;
        let slope_steep = read_field(path, &lines, SLOPE_LINE, SLOPE_STEEP_COL)?;

        Ok(Self {
            lines,
            lat,
            lon,
            elevation,
            slope_length,
            slope_steep,
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> WorkspaceResult<()> {
        let path = path.as_ref();
        let mut lines = self.lines.clone();
        lines[LAT_LINE] = write_field(&lines[LAT_LINE], LAT_COL, self.lat, &[
            (LON_COL, self.lon),
            (ELEV_COL, self.elevation),
        ]);
        lines[SLOPE_LINE] = write_field(&lines[SLOPE_LINE], SLOPE_LEN_COL, self.slope_length, &[(
            SLOPE_STEEP_COL,
            self.slope_steep,
        )]);
        let mut out = lines.join("\n");
        out.push('\n');
        std::fs::write(path, out).map_err(|e| WorkspaceError::io(path, e))
    }

    pub fn path_hint(site_id: &str, dir: &Path) -> PathBuf {
        dir.join(format!("{site_id}.SIT"))
    }
}

fn read_field(
    path: &Path,
    lines: &[String],
    line: usize,
    col: std::ops::Range<usize>,
) -> WorkspaceResult<f64> {
    let raw = lines
        .get(line)
        .and_then(|l| l.get(col.clone()))
        .ok_or_else(|| WorkspaceError::ParseError {
            path: path.to_path_buf(),
            line,
            reason: format!("line too short for column range {col:?}"),
        })?;
    raw.trim().parse::<f64>().map_err(|_| WorkspaceError::ParseError {
        path: path.to_path_buf(),
        line,
        reason: format!("field {raw:?} at {col:?} is not numeric"),
    })
}

/// Overwrites `first_col`/`value` plus any additional `(col, value)` pairs
/// within `line`, leaving every other byte (including anything past the
/// known fields) untouched.
fn write_field(
    line: &str,
    first_col: std::ops::Range<usize>,
    first_value: f64,
    rest: &[(std::ops::Range<usize>, f64)],
) -> String {
    let mut chars: Vec<char> = line.chars().collect();
    let max_col = rest
        .iter()
        .map(|(c, _)| c.end)
        .chain(std::iter::once(first_col.end))
        .max()
        .unwrap_or(0);
    while chars.len() < max_col {
        chars.push(' ');
    }

    let mut splice = |col: std::ops::Range<usize>, value: f64| {
        let text = format!("{value:>width$.2}", width = col.end - col.start);
        for (i, ch) in col.clone().zip(text.chars()) {
            chars[i] = ch;
        }
    };
    splice(first_col, first_value);
    for (col, value) in rest {
        splice(col.clone(), *value);
    }
    chars.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_file() -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "Crop Simulations").unwrap();
        writeln!(f, "Prototype").unwrap();
        writeln!(f, "ID: TEST001").unwrap();
        writeln!(
            f,
            "{:>8.2}{:>8.2}{:>8.2}{}",
            40.0, -88.0, 210.0, "  extra tail"
        )
        .unwrap();
        writeln!(
            f,
            "{:48}{:>8.2}{:>8.2}",
            "", 100.0, 5.0
        )
        .unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn round_trips_unedited_fields() {
        let f = sample_file();
        let sit = Sit::load(f.path()).unwrap();
        assert_eq!(sit.lat, 40.0);
        assert_eq!(sit.lon, -88.0);
        assert_eq!(sit.elevation, 210.0);
        assert_eq!(sit.slope_length, 100.0);
        assert_eq!(sit.slope_steep, 5.0);

        let out = tempfile::NamedTempFile::new().unwrap();
        sit.save(out.path()).unwrap();
        let reloaded = Sit::load(out.path()).unwrap();
        assert_eq!(reloaded.lat, sit.lat);
        assert!(std::fs::read_to_string(out.path())
            .unwrap()
            .contains("extra tail"));
    }

    #[test]
    fn edit_changes_only_targeted_field() {
        let f = sample_file();
        let mut sit = Sit::load(f.path()).unwrap();
        sit.lat = 41.5;
        let out = tempfile::NamedTempFile::new().unwrap();
        sit.save(out.path()).unwrap();
        let reloaded = Sit::load(out.path()).unwrap();
        assert_eq!(reloaded.lat, 41.5);
        assert_eq!(reloaded.lon, -88.0);
    }
}
