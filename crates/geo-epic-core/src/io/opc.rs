//! Operation schedule (OPC): fixed-width row table of field operations plus
//! a two-line header encoding the simulation start year.

use std::path::Path;

use chrono::NaiveDate;

use crate::error::{WorkspaceError, WorkspaceResult};

pub const PLANTATION_CODES: [i32; 3] = [2, 3, 4];
pub const HARVEST_CODES: [i32; 1] = [650];
pub const FERTILIZER_CODE: i32 = 71;

const FIELD_WIDTHS: [usize; 15] = [3, 3, 3, 5, 5, 5, 5, 8, 8, 8, 8, 8, 8, 8, 8];

#[derive(Debug, Clone)]
pub struct OpRow {
    pub yid: i32,
    pub month: u32,
    pub day: u32,
    pub code: i32,
    pub trac: i32,
    pub crop: i32,
    pub xmtu: i32,
    pub opv: [f64; 8],
}

impl OpRow {
    pub fn date(&self, start_year: i32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(start_year + self.yid - 1, self.month, self.day)
    }
}

#[derive(Debug, Clone)]
pub struct Opc {
    pub header: [String; 2],
    pub start_year: i32,
    pub rows: Vec<OpRow>,
}

pub struct Operation {
    pub op_id: i32,
    pub crop_id: i32,
    pub date: NaiveDate,
    pub opv1: f64,
    pub fert_id: i32,
    pub xmtu: i32,
    pub opv: [f64; 7],
}

impl Opc {
    pub fn load(path: impl AsRef<Path>, start_year: Option<i32>) -> WorkspaceResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| WorkspaceError::io(path, e))?;
        let mut lines = text.lines();
        let header0 = lines.next().unwrap_or_default().to_string();
        let header1 = lines.next().unwrap_or_default().to_string();

        let start_year = match start_year {
            Some(y) => y,
            None => header0
                .split(':')
                .nth(1)
                .and_then(|s| s.trim().parse::<i32>().ok())
                .ok_or_else(|| WorkspaceError::ParseError {
                    path: path.to_path_buf(),
                    line: 0,
                    reason: "start year must be specified in header or as a parameter".into(),
                })?,
        };
        let header0 = format!(
            "{} : {}",
            header0.split(':').next().unwrap_or("").trim(),
            start_year
        );

        let mut rows = Vec::new();
        for (idx, line) in lines.enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            rows.push(parse_row(path, idx + 2, line)?);
        }

        Ok(Self {
            header: [header0, header1],
            start_year,
            rows,
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> WorkspaceResult<()> {
        let path = path.as_ref();
        let mut out = String::new();
        out.push_str(&self.header[0]);
        out.push('\n');
        out.push_str(&self.header[1]);
        out.push('\n');
        for r in &self.rows {
            if r.yid < 1 {
                continue;
            }
            out.push_str(&format!(
                "{:3}{:3}{:3}{:5}{:5}{:5}{:5}{:8.3}{:8.2}{:8.2}{:8.3}{:8.2}{:8.2}{:8.2}{:8.2}\n",
                r.yid,
                r.month,
                r.day,
                r.code,
                r.trac,
                r.crop,
                r.xmtu,
                r.opv[0],
                r.opv[1],
                r.opv[2],
                r.opv[3],
                r.opv[4],
                r.opv[5],
                r.opv[6],
                r.opv[7],
            ));
        }
        std::fs::write(path, out).map_err(|e| WorkspaceError::io(path, e))
    }

    /// Whether auto-irrigation is enabled, read from the header's implement id.
    pub fn auto_irrigation_enabled(&self) -> bool {
        self.header[1]
            .get(4..)
            .and_then(|s| s.trim().parse::<i32>().ok())
            .map(|v| v != 0)
            .unwrap_or(false)
    }

    pub fn set_auto_irrigation(&mut self, implement_id: i32) {
        let luc = self.header[1].get(..4).unwrap_or("    ").to_string();
        self.header[1] = format!("{luc}{implement_id:4}");
    }

    /// Adds or replaces the operation on its date, keeping rows sorted by date.
    pub fn update(&mut self, op: &Operation) {
        self.remove(Some(op.op_id), Some(op.date), None);
        let yid = chrono::Datelike::year(&op.date) - self.start_year + 1;
        let mut opv = [0.0; 8];
        opv[0] = op.opv1;
        opv[1..].copy_from_slice(&op.opv);
        self.rows.push(OpRow {
            yid,
            month: chrono::Datelike::month(&op.date),
            day: chrono::Datelike::day(&op.date),
            code: op.op_id,
            trac: op.fert_id,
            crop: op.crop_id,
            xmtu: op.xmtu,
            opv,
        });
        self.rows
            .sort_by_key(|r| (r.yid, r.month, r.day));
    }

    /// Removes rows matching every given criterion (all are optional AND filters).
    pub fn remove(&mut self, op_id: Option<i32>, date: Option<NaiveDate>, crop_id: Option<i32>) {
        let date_key = date.map(|d| {
            (
                chrono::Datelike::year(&d) - self.start_year + 1,
                chrono::Datelike::month(&d),
                chrono::Datelike::day(&d),
            )
        });
        self.rows.retain(|r| {
            let code_match = op_id.map(|id| r.code == id).unwrap_or(true);
            let crop_match = crop_id.map(|c| r.crop == c).unwrap_or(true);
            let date_match = date_key
                .map(|(y, m, d)| r.yid == y && r.month == m && r.day == d)
                .unwrap_or(true);
            !(code_match && crop_match && date_match)
        });
    }

    /// For each non-fallow crop present, verifies at least one plantation
    /// row and one harvest row exist.
    pub fn validate_seasons(&self) -> Result<(), String> {
        let mut crops: Vec<i32> = self.rows.iter().map(|r| r.crop).collect();
        crops.sort_unstable();
        crops.dedup();
        for crop in crops {
            if crop == 0 {
                continue;
            }
            let has_plant = self
                .rows
                .iter()
                .any(|r| r.crop == crop && PLANTATION_CODES.contains(&r.code));
            let has_harvest = self
                .rows
                .iter()
                .any(|r| r.crop == crop && HARVEST_CODES.contains(&r.code));
            if !has_plant || !has_harvest {
                return Err(format!(
                    "crop {crop} is missing a {} row",
                    if !has_plant { "plantation" } else { "harvest" }
                ));
            }
        }
        Ok(())
    }
}

fn parse_row(path: &Path, line_no: usize, line: &str) -> WorkspaceResult<OpRow> {
    let mut offset = 0;
    let mut fields = Vec::with_capacity(FIELD_WIDTHS.len());
    for width in FIELD_WIDTHS {
        let end = (offset + width).min(line.len());
        fields.push(line.get(offset..end).unwrap_or("").trim());
        offset += width;
    }
    let parse_i = |s: &str| -> WorkspaceResult<i32> {
        s.parse::<f64>().map(|v| v as i32).map_err(|_| WorkspaceError::ParseError {
            path: path.to_path_buf(),
            line: line_no,
            reason: format!("field {s:?} is not numeric"),
        })
    };
    let parse_f = |s: &str| -> WorkspaceResult<f64> {
        s.parse::<f64>().map_err(|_| WorkspaceError::ParseError {
            path: path.to_path_buf(),
            line: line_no,
            reason: format!("field {s:?} is not numeric"),
        })
    };
    Ok(OpRow {
        yid: parse_i(fields[0])?,
        month: parse_i(fields[1])? as u32,
        day: parse_i(fields[2])? as u32,
        code: parse_i(fields[3])?,
        trac: parse_i(fields[4])?,
        crop: parse_i(fields[5])?,
        xmtu: parse_i(fields[6])?,
        opv: [
            parse_f(fields[7])?,
            parse_f(fields[8])?,
            parse_f(fields[9])?,
            parse_f(fields[10])?,
            parse_f(fields[11])?,
            parse_f(fields[12])?,
            parse_f(fields[13])?,
            parse_f(fields[14])?,
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Opc {
        Opc {
            header: ["GEOEPIC : 2000".into(), "LUC   0".into()],
            start_year: 2000,
            rows: vec![OpRow {
                yid: 1,
                month: 4,
                day: 15,
                code: 2,
                trac: 0,
                crop: 5,
                xmtu: 0,
                opv: [0.0; 8],
            }],
        }
    }

    #[test]
    fn validate_seasons_flags_missing_harvest() {
        let opc = sample();
        assert!(opc.validate_seasons().is_err());
    }

    #[test]
    fn update_replaces_same_date_operation() {
        let mut opc = sample();
        let op = Operation {
            op_id: 650,
            crop_id: 5,
            date: NaiveDate::from_ymd_opt(2000, 4, 15).unwrap(),
            opv1: 42.0,
            fert_id: 0,
            xmtu: 0,
            opv: [0.0; 7],
        };
        opc.update(&op);
        assert_eq!(opc.rows.len(), 2);
        opc.update(&op);
        assert_eq!(opc.rows.len(), 2, "same-date same-op update should replace, not duplicate");
    }
}
