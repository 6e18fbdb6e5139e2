//! Run roster (C3 data model): loads a site table from CSV or Shapefile,
//! validates required columns, normalizes `SiteID`, and drops records
//! whose operation-schedule file doesn't exist.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{WorkspaceError, WorkspaceResult};
use crate::site::validate_site_id;

#[derive(Debug, Clone)]
pub struct RosterRecord {
    pub site_id: String,
    pub soil: PathBuf,
    pub dly: PathBuf,
    pub opc: Option<PathBuf>,
    pub lat: f64,
    pub lon: f64,
    pub extra: BTreeMap<String, String>,
}

const CSV_REQUIRED: [&str; 5] = ["SiteID", "soil", "dly", "lat", "lon"];
const SHAPEFILE_REQUIRED: [&str; 3] = ["SiteID", "soil", "dly"];

pub fn load(path: impl AsRef<Path>, opc_dir: &Path) -> WorkspaceResult<Vec<RosterRecord>> {
    let path = path.as_ref();
    let records = match path.extension().and_then(|e| e.to_str()) {
        Some("csv") => load_csv(path)?,
        Some("shp") => load_shapefile(path)?,
        _ => return Err(WorkspaceError::UnsupportedRosterFormat(path.to_path_buf())),
    };
    Ok(filter_by_opc_existence(records, opc_dir))
}

fn load_csv(path: &Path) -> WorkspaceResult<Vec<RosterRecord>> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| WorkspaceError::io(path, std::io::Error::other(e)))?;
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| WorkspaceError::io(path, std::io::Error::other(e)))?
        .iter()
        .map(str::to_string)
        .collect();
    check_required_columns(&headers, &CSV_REQUIRED)?;

    let mut records = Vec::new();
    for result in reader.records() {
        let row = result.map_err(|e| WorkspaceError::io(path, std::io::Error::other(e)))?;
        let mut fields: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in headers.iter().zip(row.iter()) {
            fields.insert(name.clone(), value.to_string());
        }

        let site_id = normalize_site_id(fields.remove("SiteID").unwrap_or_default())?;
        let soil = PathBuf::from(fields.remove("soil").unwrap_or_default());
        let dly = PathBuf::from(fields.remove("dly").unwrap_or_default());
        let opc = fields.remove("opc").filter(|s| !s.is_empty()).map(PathBuf::from);
        let lat = fields.remove("lat").unwrap_or_default().parse().unwrap_or(0.0);
        let lon = fields.remove("lon").unwrap_or_default().parse().unwrap_or(0.0);

        records.push(RosterRecord {
            site_id,
            soil,
            dly,
            opc,
            lat,
            lon,
            extra: fields,
        });
    }
    Ok(records)
}

fn load_shapefile(path: &Path) -> WorkspaceResult<Vec<RosterRecord>> {
    let mut reader =
        shapefile::Reader::from_path(path).map_err(|e| WorkspaceError::io(path, std::io::Error::other(e)))?;

    let mut records = Vec::new();
    for shape_record in reader.iter_shapes_and_records() {
        let (shape, record) = shape_record.map_err(|e| WorkspaceError::io(path, std::io::Error::other(e)))?;
        let (lon, lat) = centroid(&shape);

        let mut fields: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in record.into_iter() {
            fields.insert(name, dbase_value_to_string(value));
        }
        check_required_columns(&fields.keys().cloned().collect::<Vec<_>>(), &SHAPEFILE_REQUIRED)?;

        let site_id = normalize_site_id(fields.remove("SiteID").unwrap_or_default())?;
        let soil = PathBuf::from(fields.remove("soil").unwrap_or_default());
        let dly = PathBuf::from(fields.remove("dly").unwrap_or_default());
        let opc = fields.remove("opc").filter(|s| !s.is_empty()).map(PathBuf::from);

        records.push(RosterRecord {
            site_id,
            soil,
            dly,
            opc,
            lat,
            lon,
            extra: fields,
        });
    }
    Ok(records)
}

fn dbase_value_to_string(value: shapefile::dbase::FieldValue) -> String {
    use shapefile::dbase::FieldValue as F;
    match value {
        F::Character(Some(s)) => s,
        F::Numeric(Some(n)) => n.to_string(),
        F::Float(Some(f)) => f.to_string(),
        F::Integer(n) => n.to_string(),
        _ => String::new(),
    }
}

/// Centroid of a shape's points, reprojection to a geographic CRS is assumed
/// to have already happened upstream of this table (the shapefile on disk
/// is expected to already carry geographic coordinates).
fn centroid(shape: &shapefile::Shape) -> (f64, f64) {
    let points: Vec<shapefile::Point> = match shape {
        shapefile::Shape::Point(p) => vec![*p],
        shapefile::Shape::Polygon(poly) => poly.rings().iter().flat_map(|r| r.points().to_vec()).collect(),
        shapefile::Shape::Polyline(line) => line.parts().iter().flatten().copied().collect(),
        _ => Vec::new(),
    };
    if points.is_empty() {
        return (0.0, 0.0);
    }
    let (sum_x, sum_y) = points.iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    let n = points.len() as f64;
    (sum_x / n, sum_y / n)
}

fn normalize_site_id(raw: String) -> WorkspaceResult<String> {
    let normalized = raw.trim().to_string();
    validate_site_id(&normalized)?;
    Ok(normalized)
}

fn check_required_columns(present: &[String], required: &[&str]) -> WorkspaceResult<()> {
    let missing: Vec<String> = required
        .iter()
        .filter(|col| !present.iter().any(|p| p == *col))
        .map(|s| s.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(WorkspaceError::MissingRosterColumns(missing))
    }
}

fn filter_by_opc_existence(records: Vec<RosterRecord>, opc_dir: &Path) -> Vec<RosterRecord> {
    records
        .into_iter()
        .filter(|r| match &r.opc {
            None => true,
            Some(opc) => {
                let candidate = opc_dir.join(opc);
                let exists = candidate.exists() || opc.exists();
                if !exists {
                    tracing::warn!(
                        site_id = %r.site_id,
                        opc = %opc.display(),
                        "dropping roster record: operation schedule file not found"
                    );
                }
                exists
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_csv_and_validates_columns() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("sites.csv");
        std::fs::write(&csv_path, "SiteID,soil,dly,lat,lon\nS1,S1.SOL,S1.DLY,10.0,20.0\n").unwrap();
        let records = load(&csv_path, dir.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].site_id, "S1");
    }

    #[test]
    fn drops_records_with_missing_opc_file() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("sites.csv");
        std::fs::write(
            &csv_path,
            "SiteID,soil,dly,lat,lon,opc\nS1,S1.SOL,S1.DLY,10.0,20.0,missing.OPC\n",
        )
        .unwrap();
        let records = load(&csv_path, dir.path()).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sites.txt");
        std::fs::write(&path, "").unwrap();
        assert!(load(&path, dir.path()).is_err());
    }
}
