//! Crop-parameter table (CROPCOM.DAT): one row per crop code. A fixed set
//! of columns pack `integer + fraction/100` into a single on-disk field;
//! in memory each is exposed as two virtual columns (`_v1`, `_v2`) so the
//! calibration driver can edit them like any other scalar.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{WorkspaceError, WorkspaceResult};
use crate::params::{ParameterModel, Sensitivity};

const CODE_WIDTH: usize = 5;
const GROUP_WIDTH: usize = 5;
const PARAM_WIDTH: usize = 8;
const COMMENT_WIDTH: usize = 50;
const NUM_PARAMS: usize = 58;

/// Columns whose physical representation is `int(v1) + v2/100`.
pub const SPLIT_COLUMNS: [&str; 5] = ["DLAP1", "DLAP2", "WAC2", "PPLP1", "PPLP2"];

fn param_names() -> Vec<String> {
    let mut names: Vec<String> = (1..=NUM_PARAMS)
        .map(|i| format!("PARM{i:02}"))
        .collect();
    for (i, special) in SPLIT_COLUMNS.iter().enumerate() {
        names[i] = special.to_string();
    }
    names
}

#[derive(Debug, Clone)]
pub struct CropRow {
    pub code: i32,
    pub group: i32,
    pub params: BTreeMap<String, f64>,
    pub comment: String,
}

#[derive(Debug, Clone)]
pub struct CropCom {
    header: String,
    pub rows: Vec<CropRow>,
    sensitivity: Option<Sensitivity>,
    crop_codes: Vec<i32>,
}

impl CropCom {
    pub fn load(path: impl AsRef<Path>) -> WorkspaceResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| WorkspaceError::io(path, e))?;
        let mut lines = text.lines();
        let header = lines.next().unwrap_or_default().to_string();
        let names = param_names();

        let mut rows = Vec::new();
        for (idx, line) in lines.enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            rows.push(parse_row(path, idx + 1, line, &names)?);
        }
        Ok(Self {
            header,
            rows,
            sensitivity: None,
            crop_codes: Vec::new(),
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> WorkspaceResult<()> {
        let path = path.as_ref();
        let names = param_names();
        let mut out = String::new();
        out.push_str(&self.header);
        out.push('\n');
        for row in &self.rows {
            out.push_str(&format!("{:CODE_WIDTH$}{:GROUP_WIDTH$}", row.code, row.group));
            for (idx, name) in names.iter().enumerate() {
                let value = row.params.get(name).copied().unwrap_or(0.0);
                out.push_str(&format_param_cell(value, idx));
            }
            out.push_str(&format!("{:>COMMENT_WIDTH$}", row.comment));
            out.push('\n');
        }
        std::fs::write(path, out).map_err(|e| WorkspaceError::io(path, e))
    }
}

/// Per-column precision, grounded on the reference writer's fixed format
/// table (`'%8.2f'*11 + '%8.4f' + '%8.2f'*5 + '%8.4f'*3 + '%8.2f'*6 +
/// '%8.4f'*9 + '%8.3f'*3 + '%8d' + '%8.2f'*18 + '%8.3f'`). A single
/// hardcoded precision would silently reformat untouched columns on save.
fn param_decimals(idx: usize) -> Option<usize> {
    match idx {
        11 => Some(4),
        17..=19 => Some(4),
        26..=34 => Some(4),
        35..=37 => Some(3),
        38 => None,
        57 => Some(3),
        _ => Some(2),
    }
}

fn format_param_cell(value: f64, idx: usize) -> String {
    match param_decimals(idx) {
        Some(decimals) => format!("{value:PARAM_WIDTH$.decimals$}"),
        None => format!("{:PARAM_WIDTH$}", value.round() as i64),
    }
}

fn parse_row(path: &Path, line_no: usize, line: &str, names: &[String]) -> WorkspaceResult<CropRow> {
    let mut offset = 0;
    let take = |offset: &mut usize, width: usize| -> String {
        let end = (*offset + width).min(line.len());
        let s = line.get(*offset..end).unwrap_or("").trim().to_string();
        *offset = end;
        s
    };
    let code_str = take(&mut offset, CODE_WIDTH);
    let group_str = take(&mut offset, GROUP_WIDTH);
    let parse_err = |field: &str, value: &str| WorkspaceError::ParseError {
        path: path.to_path_buf(),
        line: line_no,
        reason: format!("{field} value {value:?} is not numeric"),
    };
    let code = code_str
        .parse::<i32>()
        .map_err(|_| parse_err("crop code", &code_str))?;
    let group = group_str
        .parse::<i32>()
        .map_err(|_| parse_err("group", &group_str))?;

    let mut params = BTreeMap::new();
    for name in names {
        let raw = take(&mut offset, PARAM_WIDTH);
        let value = raw.parse::<f64>().map_err(|_| parse_err(name, &raw))?;
        params.insert(name.clone(), value);
    }
    let comment = line.get(offset..).unwrap_or("").trim().to_string();

    Ok(CropRow {
        code,
        group,
        params,
        comment,
    })
}

impl CropRow {
    /// `v1 = floor(v)`, `v2 = (v - floor(v)) * 100`, for a split column.
    pub fn split_value(&self, column: &str) -> (f64, f64) {
        let v = self.params.get(column).copied().unwrap_or(0.0);
        let v1 = v.floor();
        let v2 = (v - v1) * 100.0;
        (v1, v2)
    }

    pub fn set_split_value(&mut self, column: &str, v1: f64, v2: f64) {
        self.params
            .insert(column.to_string(), (v1 as i64) as f64 + v2 / 100.0);
    }
}

impl ParameterModel for CropCom {
    fn set_sensitive(&mut self, sources: &[Sensitivity], crop_codes: &[i32]) {
        let merged = Sensitivity::union(sources);
        self.sensitivity = Some(merged);
        self.crop_codes = crop_codes.to_vec();
    }

    fn constraints(&self) -> Vec<(f64, f64)> {
        let Some(s) = &self.sensitivity else {
            return Vec::new();
        };
        let per_crop: Vec<(f64, f64)> = s.active.iter().map(|p| (p.min, p.max)).collect();
        per_crop
            .iter()
            .cloned()
            .cycle()
            .take(per_crop.len() * self.crop_codes.len())
            .collect()
    }

    fn current(&self) -> Vec<f64> {
        let Some(s) = &self.sensitivity else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for code in &self.crop_codes {
            let Some(row) = self.rows.iter().find(|r| r.code == *code) else {
                continue;
            };
            for p in &s.active {
                out.push(get_virtual(row, &p.name));
            }
        }
        out
    }

    fn edit(&mut self, values: &[f64]) -> WorkspaceResult<()> {
        let Some(s) = self.sensitivity.clone() else {
            return Ok(());
        };
        let per_crop = s.active.len();
        if values.len() != per_crop * self.crop_codes.len() {
            return Err(WorkspaceError::InvalidValue {
                key: "edit vector".into(),
                expected: "length matching active dimensions times selected crops",
                value: values.len().to_string(),
            });
        }
        for (crop_idx, code) in self.crop_codes.clone().iter().enumerate() {
            let Some(row) = self.rows.iter_mut().find(|r| r.code == *code) else {
                continue;
            };
            for (p_idx, p) in s.active.iter().enumerate() {
                let value = values[crop_idx * per_crop + p_idx];
                set_virtual(row, &p.name, value);
            }
        }
        Ok(())
    }

    fn var_names(&self) -> Vec<String> {
        let Some(s) = &self.sensitivity else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for code in &self.crop_codes {
            for p in &s.active {
                out.push(format!("{}_{}", p.name, code));
            }
        }
        out
    }

    fn save(&self, path: &std::path::Path) -> WorkspaceResult<()> {
        CropCom::save(self, path)
    }
}

fn get_virtual(row: &CropRow, name: &str) -> f64 {
    if let Some(base) = name.strip_suffix("_v1") {
        if SPLIT_COLUMNS.contains(&base) {
            return row.split_value(base).0;
        }
    }
    if let Some(base) = name.strip_suffix("_v2") {
        if SPLIT_COLUMNS.contains(&base) {
            return row.split_value(base).1;
        }
    }
    row.params.get(name).copied().unwrap_or(0.0)
}

fn set_virtual(row: &mut CropRow, name: &str, value: f64) {
    if let Some(base) = name.strip_suffix("_v1") {
        if SPLIT_COLUMNS.contains(&base) {
            let (_, v2) = row.split_value(base);
            row.set_split_value(base, value, v2);
            return;
        }
    }
    if let Some(base) = name.strip_suffix("_v2") {
        if SPLIT_COLUMNS.contains(&base) {
            let (v1, _) = row.split_value(base);
            row.set_split_value(base, v1, value);
            return;
        }
    }
    row.params.insert(name.to_string(), value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::SensitiveParam;

    fn sample_row() -> CropRow {
        let mut params = BTreeMap::new();
        for name in param_names() {
            params.insert(name, 0.0);
        }
        params.insert("DLAP1".into(), 3.45);
        CropRow {
            code: 10,
            group: 1,
            params,
            comment: "corn".into(),
        }
    }

    #[test]
    fn split_and_reassemble_is_exact() {
        let row = sample_row();
        let (v1, v2) = row.split_value("DLAP1");
        assert_eq!(v1, 3.0);
        assert!((v2 - 45.0).abs() < 1e-9);
        let mut row2 = row.clone();
        row2.set_split_value("DLAP1", v1, v2);
        assert!((row2.params["DLAP1"] - 3.45).abs() < 1e-9);
    }

    #[test]
    fn save_preserves_per_column_precision() {
        let mut params = BTreeMap::new();
        let names = param_names();
        for name in &names {
            params.insert(name.clone(), 1.23456);
        }
        let row = CropRow {
            code: 10,
            group: 1,
            params,
            comment: "corn".into(),
        };
        let cc = CropCom {
            header: "HEADER".into(),
            rows: vec![row],
            sensitivity: None,
            crop_codes: Vec::new(),
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CROPCOM.DAT");
        cc.save(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let data_line = text.lines().nth(1).unwrap();

        // column 0 (DLAP1, idx 0) is 2-decimal, column 11 (idx 11) is 4-decimal.
        let col0_start = CODE_WIDTH + GROUP_WIDTH;
        let col0 = &data_line[col0_start..col0_start + PARAM_WIDTH];
        assert_eq!(col0.trim(), "1.23");

        let col11_start = col0_start + 11 * PARAM_WIDTH;
        let col11 = &data_line[col11_start..col11_start + PARAM_WIDTH];
        assert_eq!(col11.trim(), "1.2346");

        // column 38 (idx 38) is rendered as a plain integer.
        let col38_start = col0_start + 38 * PARAM_WIDTH;
        let col38 = &data_line[col38_start..col38_start + PARAM_WIDTH];
        assert_eq!(col38.trim(), "1");
    }

    #[test]
    fn current_and_edit_round_trip() {
        let mut cc = CropCom {
            header: "HEADER".into(),
            rows: vec![sample_row()],
            sensitivity: None,
            crop_codes: Vec::new(),
        };
        cc.set_sensitive(
            &[Sensitivity {
                active: vec![SensitiveParam {
                    name: "DLAP1_v1".into(),
                    min: 0.0,
                    max: 10.0,
                }],
            }],
            &[10],
        );
        assert_eq!(cc.current(), vec![3.0]);
        cc.edit(&[7.0]).unwrap();
        assert_eq!(cc.current(), vec![7.0]);
        assert_eq!(cc.var_names(), vec!["DLAP1_v1_10".to_string()]);
    }
}
