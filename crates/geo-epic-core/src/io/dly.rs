//! Daily-weather table (DLY): fixed-width rows plus derived monthly-statistic
//! files (`.WP1`, `.WND`) written into a run sandbox.

use std::path::Path;

use crate::error::{WorkspaceError, WorkspaceResult};

#[derive(Debug, Clone, Copy)]
pub struct DailyRow {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub srad: f64,
    pub tmax: f64,
    pub tmin: f64,
    pub prcp: f64,
    pub rh: f64,
    pub ws: f64,
}

const FIELD_WIDTHS: [usize; 9] = [6, 4, 4, 6, 6, 6, 6, 6, 6];
const DAYS_IN_MONTH: [f64; 12] = [
    31.0, 28.0, 31.0, 30.0, 31.0, 30.0, 31.0, 31.0, 30.0, 31.0, 30.0, 31.0,
];

#[derive(Debug, Clone)]
pub struct Dly {
    pub rows: Vec<DailyRow>,
    pub basename: String,
}

impl Dly {
    pub fn load(path: impl AsRef<Path>) -> WorkspaceResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| WorkspaceError::io(path, e))?;
        let basename = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "1".to_string());

        let mut rows = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            rows.push(parse_row(path, line_no, line)?);
        }
        Ok(Self { rows, basename })
    }

    /// Removes duplicate (year, month, day) rows, keeping the first occurrence.
    pub fn dedup_by_date(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.rows
            .retain(|r| seen.insert((r.year, r.month, r.day)));
    }

    /// Reports missing calendar dates in `[start, end]` (inclusive), both
    /// given as (year, month, day).
    pub fn validate_range(&self, start: (i32, u32, u32), end: (i32, u32, u32)) -> Vec<(i32, u32, u32)> {
        let present: std::collections::HashSet<(i32, u32, u32)> =
            self.rows.iter().map(|r| (r.year, r.month, r.day)).collect();
        let mut missing = Vec::new();
        let mut cursor = chrono::NaiveDate::from_ymd_opt(start.0, start.1, start.2).unwrap();
        let last = chrono::NaiveDate::from_ymd_opt(end.0, end.1, end.2).unwrap();
        while cursor <= last {
            use chrono::Datelike;
            let key = (cursor.year(), cursor.month(), cursor.day());
            if !present.contains(&key) {
                missing.push(key);
            }
            cursor = cursor.succ_opt().unwrap();
        }
        missing
    }

    pub fn save(&self, path: impl AsRef<Path>) -> WorkspaceResult<()> {
        let path = path.as_ref();
        let mut out = String::new();
        for r in &self.rows {
            out.push_str(&format!(
                "{:6}{:4}{:4}{:6.2}{:6.2}{:6.2}{:6.2}{:6.2}{:6.2}\n",
                r.year, r.month, r.day, r.srad, r.tmax, r.tmin, r.prcp, r.rh, r.ws
            ));
        }
        std::fs::write(path, out).map_err(|e| WorkspaceError::io(path, e))
    }

    /// Writes monthly-statistic (`.WP1`) and monthly-wind (`.WND`) files
    /// derived from this daily table, under the given stem.
    pub fn write_monthly(&self, stem: impl AsRef<Path>) -> WorkspaceResult<MonthlyStats> {
        let stem = stem.as_ref();
        let wp1_path = with_ext(stem, "WP1");
        let wnd_path = with_ext(stem, "WND");

        let stats = compute_monthly_stats(&self.rows);

        let mut lines = vec![
            format!("Monthly Weather Statistics : {}", self.basename),
            "     .00     .00".to_string(),
        ];
        for row in stats.columns_in_file_order() {
            lines.push(row);
        }
        std::fs::write(&wp1_path, lines.join("\n")).map_err(|e| WorkspaceError::io(&wp1_path, e))?;

        let mut wnd = String::new();
        wnd.push_str(&format!("Monthly Wind Statistics : {}\n", self.basename));
        wnd.push_str("     .00     .00\n");
        for v in &stats.uavo {
            wnd.push_str(&format!("{v:10.2}"));
        }
        wnd.push('\n');
        for _ in 0..16 {
            for _ in 0..12 {
                wnd.push_str(&format!("{:10.1}", 0.0));
            }
            wnd.push('\n');
        }
        std::fs::write(&wnd_path, wnd).map_err(|e| WorkspaceError::io(&wnd_path, e))?;

        Ok(stats)
    }
}

fn with_ext(stem: &Path, ext: &str) -> std::path::PathBuf {
    let mut p = stem.to_path_buf();
    p.set_extension(ext);
    p
}

fn parse_row(path: &Path, line_no: usize, line: &str) -> WorkspaceResult<DailyRow> {
    let mut offset = 0;
    let mut fields = Vec::with_capacity(FIELD_WIDTHS.len());
    for width in FIELD_WIDTHS {
        let end = (offset + width).min(line.len());
        let raw = line.get(offset..end).unwrap_or("");
        fields.push(raw.trim());
        offset += width;
    }
    let parse = |s: &str, what: &str| -> WorkspaceResult<f64> {
        s.parse::<f64>().map_err(|_| WorkspaceError::ParseError {
            path: path.to_path_buf(),
            line: line_no,
            reason: format!("{what} field {s:?} is not numeric"),
        })
    };
    Ok(DailyRow {
        year: parse(fields[0], "year")? as i32,
        month: parse(fields[1], "month")? as u32,
        day: parse(fields[2], "day")? as u32,
        srad: parse(fields[3], "srad")?,
        tmax: parse(fields[4], "tmax")?,
        tmin: parse(fields[5], "tmin")?,
        prcp: parse(fields[6], "prcp")?,
        rh: parse(fields[7], "rh")?,
        ws: parse(fields[8], "ws")?,
    })
}

pub struct MonthlyStats {
    pub tmax: [f64; 12],
    pub tmin: [f64; 12],
    pub prcp: [f64; 12],
    pub srad: [f64; 12],
    pub rh: [f64; 12],
    pub uavo: [f64; 12],
    pub sdtmx: [f64; 12],
    pub sdtmn: [f64; 12],
    pub sdrf: [f64; 12],
    pub dayp: [f64; 12],
    pub skrf: [f64; 12],
    pub prw1: [f64; 12],
    pub prw2: [f64; 12],
    /// Weather-increment column; always zero, carried for layout parity.
    pub wi: [f64; 12],
}

impl MonthlyStats {
    /// Rows in the exact order the reference `.WP1` format expects, each
    /// tagged with its short station-statistic code.
    fn columns_in_file_order(&self) -> Vec<String> {
        let labeled: [(&str, &[f64; 12]); 14] = [
            ("OBMX", &self.tmax),
            ("OBMN", &self.tmin),
            ("RMO", &self.prcp),
            ("OBSL", &self.srad),
            ("RH", &self.rh),
            ("UAVO", &self.uavo),
            ("SDTMX", &self.sdtmx),
            ("SDTMN", &self.sdtmn),
            ("RST2", &self.sdrf),
            ("DAYP", &self.dayp),
            ("RST3", &self.skrf),
            ("PRW1", &self.prw1),
            ("PRW2", &self.prw2),
            ("WI", &self.wi),
        ];
        labeled
            .iter()
            .map(|(code, values)| {
                let mut line = String::new();
                for v in values.iter() {
                    line.push_str(&format!("{v:10.2}"));
                }
                line.push_str(&format!("{code:>8}"));
                line
            })
            .collect()
    }
}

fn compute_monthly_stats(rows: &[DailyRow]) -> MonthlyStats {
    let mut by_month: Vec<Vec<&DailyRow>> = vec![Vec::new(); 12];
    for r in rows {
        if (1..=12).contains(&r.month) {
            by_month[(r.month - 1) as usize].push(r);
        }
    }

    let mean = |sel: fn(&DailyRow) -> f64, bucket: &[&DailyRow]| -> f64 {
        if bucket.is_empty() {
            0.0
        } else {
            bucket.iter().map(|r| sel(r)).sum::<f64>() / bucket.len() as f64
        }
    };
    let stdev = |sel: fn(&DailyRow) -> f64, bucket: &[&DailyRow]| -> f64 {
        if bucket.len() < 2 {
            return 0.0;
        }
        let m = mean(sel, bucket);
        let var = bucket.iter().map(|r| (sel(r) - m).powi(2)).sum::<f64>() / (bucket.len() - 1) as f64;
        var.sqrt()
    };

    let mut out = MonthlyStats {
        tmax: [0.0; 12],
        tmin: [0.0; 12],
        prcp: [0.0; 12],
        srad: [0.0; 12],
        rh: [0.0; 12],
        uavo: [0.0; 12],
        sdtmx: [0.0; 12],
        sdtmn: [0.0; 12],
        sdrf: [0.0; 12],
        dayp: [0.0; 12],
        skrf: [0.0; 12],
        prw1: [0.0; 12],
        prw2: [0.0; 12],
        wi: [0.0; 12],
    };

    for m in 0..12 {
        let bucket = &by_month[m];
        out.tmax[m] = mean(|r| r.tmax, bucket);
        out.tmin[m] = mean(|r| r.tmin, bucket);
        out.srad[m] = mean(|r| r.srad, bucket);
        out.rh[m] = mean(|r| r.rh, bucket);
        out.uavo[m] = mean(|r| r.ws, bucket);
        out.prcp[m] = mean(|r| r.prcp, bucket) * DAYS_IN_MONTH[m];
        out.sdtmx[m] = stdev(|r| r.tmax, bucket);
        out.sdtmn[m] = stdev(|r| r.tmin, bucket);
        out.sdrf[m] = stdev(|r| r.prcp, bucket);
        out.dayp[m] = bucket.iter().filter(|r| r.prcp > 0.5).count() as f64;

        let median_prcp = median(bucket.iter().map(|r| r.prcp).collect());
        out.skrf[m] = if out.sdrf[m] > 0.0 {
            3.0 * (out.prcp[m] - median_prcp).abs() / out.sdrf[m]
        } else {
            0.0
        };

        let wet: Vec<bool> = bucket.iter().map(|r| r.prcp > 0.5).collect();
        let n = wet.len().max(1) as f64;
        let transitions_to_dry = wet.windows(2).filter(|w| w[0] && !w[1]).count() as f64;
        out.prw1[m] = transitions_to_dry / n;
        let wet_to_wet = wet.windows(2).filter(|w| w[0] && w[1]).count() as f64;
        out.prw2[m] = wet_to_wet / n;
    }

    out
}

fn median(mut values: Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fixed_width_row() {
        let line = "  2020   1   1  5.20 10.00 -2.50  0.00 70.00  3.10";
        let row = parse_row(Path::new("x"), 0, line).unwrap();
        assert_eq!(row.year, 2020);
        assert_eq!(row.month, 1);
        assert_eq!(row.day, 1);
        assert!((row.tmax - 10.0).abs() < 1e-9);
    }

    #[test]
    fn dedup_keeps_first() {
        let mut dly = Dly {
            rows: vec![
                DailyRow { year: 2020, month: 1, day: 1, srad: 1.0, tmax: 1.0, tmin: 1.0, prcp: 1.0, rh: 1.0, ws: 1.0 },
                DailyRow { year: 2020, month: 1, day: 1, srad: 2.0, tmax: 2.0, tmin: 2.0, prcp: 2.0, rh: 2.0, ws: 2.0 },
            ],
            basename: "1".into(),
        };
        dly.dedup_by_date();
        assert_eq!(dly.rows.len(), 1);
        assert_eq!(dly.rows[0].srad, 1.0);
    }
}
