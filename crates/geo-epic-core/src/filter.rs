//! Filter DSL (`Range`, `Random`, column predicates, `;`-intersection,
//! `+`-union) used to select a subset of the site roster before a run.

use std::collections::HashSet;

use rand::seq::SliceRandom;

use crate::roster::RosterRecord;

#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone)]
pub enum Clause {
    Range(f64, f64),
    Random(f64),
    Column {
        name: String,
        op: Comparison,
        value: String,
    },
}

/// One `;`-joined intersection of clauses.
#[derive(Debug, Clone)]
pub struct Expr {
    clauses: Vec<Clause>,
}

/// A full filter: `+`-joined alternatives, unioned with `SiteID` dedup
/// keeping the last occurrence across the join order.
#[derive(Debug, Clone)]
pub struct Filter {
    alternatives: Vec<Expr>,
}

impl Filter {
    pub fn parse(text: &str) -> Self {
        let alternatives = text
            .split('+')
            .map(|part| Expr {
                clauses: part.split(';').filter_map(parse_clause).collect(),
            })
            .collect();
        Self { alternatives }
    }

    pub fn apply(&self, records: &[RosterRecord]) -> Vec<RosterRecord> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut kept: Vec<RosterRecord> = Vec::new();

        for expr in &self.alternatives {
            for record in expr.evaluate(records) {
                if let Some(pos) = kept.iter().position(|r| r.site_id == record.site_id) {
                    kept.remove(pos);
                }
                seen.insert(record.site_id.clone());
                kept.push(record);
            }
        }
        kept
    }
}

impl Expr {
    fn evaluate(&self, records: &[RosterRecord]) -> Vec<RosterRecord> {
        let mut subset: Vec<RosterRecord> = records.to_vec();
        for clause in &self.clauses {
            subset = clause.apply(&subset);
        }
        subset
    }
}

impl Clause {
    fn apply(&self, records: &[RosterRecord]) -> Vec<RosterRecord> {
        match self {
            Clause::Range(lo, hi) => {
                let n = records.len() as f64;
                let start = (lo * n).floor() as usize;
                let end = ((hi * n).ceil() as usize).min(records.len());
                records.get(start.min(records.len())..end).unwrap_or(&[]).to_vec()
            }
            Clause::Random(frac) => {
                let keep = (frac * records.len() as f64).round() as usize;
                let mut rng = rand::thread_rng();
                let mut shuffled = records.to_vec();
                shuffled.shuffle(&mut rng);
                shuffled.into_iter().take(keep).collect()
            }
            Clause::Column { name, op, value } => records
                .iter()
                .filter(|r| column_matches(r, name, op, value))
                .cloned()
                .collect(),
        }
    }
}

fn column_matches(record: &RosterRecord, name: &str, op: &Comparison, value: &str) -> bool {
    let field = match name {
        "SiteID" => record.site_id.clone(),
        "lat" => record.lat.to_string(),
        "lon" => record.lon.to_string(),
        other => record.extra.get(other).cloned().unwrap_or_default(),
    };

    if let (Ok(lhs), Ok(rhs)) = (field.parse::<f64>(), value.parse::<f64>()) {
        return match op {
            Comparison::Eq => (lhs - rhs).abs() < f64::EPSILON,
            Comparison::Ne => (lhs - rhs).abs() >= f64::EPSILON,
            Comparison::Lt => lhs < rhs,
            Comparison::Le => lhs <= rhs,
            Comparison::Gt => lhs > rhs,
            Comparison::Ge => lhs >= rhs,
        };
    }

    match op {
        Comparison::Eq => field == value,
        Comparison::Ne => field != value,
        _ => false,
    }
}

fn parse_clause(text: &str) -> Option<Clause> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Some(inner) = text.strip_prefix("Range(").and_then(|s| s.strip_suffix(')')) {
        let mut parts = inner.split(',').map(|p| p.trim().parse::<f64>());
        let lo = parts.next()?.ok()?;
        let hi = parts.next()?.ok()?;
        return Some(Clause::Range(lo, hi));
    }
    if let Some(inner) = text.strip_prefix("Random(").and_then(|s| s.strip_suffix(')')) {
        let frac = inner.trim().parse::<f64>().ok()?;
        return Some(Clause::Random(frac));
    }
    for (token, op) in [
        ("==", Comparison::Eq),
        ("!=", Comparison::Ne),
        ("<=", Comparison::Le),
        (">=", Comparison::Ge),
        ("<", Comparison::Lt),
        (">", Comparison::Gt),
    ] {
        if let Some((name, value)) = text.split_once(token) {
            return Some(Clause::Column {
                name: name.trim().to_string(),
                op,
                value: value.trim().to_string(),
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn records(n: usize) -> Vec<RosterRecord> {
        (0..n)
            .map(|i| RosterRecord {
                site_id: format!("S{i}"),
                soil: format!("S{i}.SOL").into(),
                dly: format!("S{i}.DLY").into(),
                opc: None,
                lat: i as f64,
                lon: i as f64,
                extra: BTreeMap::new(),
            })
            .collect()
    }

    #[test]
    fn full_range_returns_roster_unchanged() {
        let recs = records(10);
        let filtered = Filter::parse("Range(0,1)").apply(&recs);
        assert_eq!(filtered.len(), 10);
    }

    #[test]
    fn partial_range_uses_floor_ceil_bounds() {
        let recs = records(10);
        let filtered = Filter::parse("Range(0.2,0.5)").apply(&recs);
        assert_eq!(filtered.len(), 3);
    }

    #[test]
    fn union_dedups_keeping_last_occurrence() {
        let recs = records(3);
        let filtered = Filter::parse("SiteID==S0+SiteID==S0").apply(&recs);
        assert_eq!(filtered.len(), 1);
    }
}
