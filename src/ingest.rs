use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, anyhow};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::DataError;
use crate::match_store::{FinalScore, MatchRecord, MatchStore};

pub type RawRow = HashMap<String, Value>;

const REQUIRED_COLUMNS: &[&str] = &[
    "match_id",
    "kickoff",
    "home_team_id",
    "away_team_id",
    "venue",
];

/// Set by the CSV reader on rows whose cell count differs from the header.
const CELL_MISMATCH: &str = "__cell_mismatch";

#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub accepted: usize,
    pub rejected: Vec<DataError>,
}

pub fn read_rows(path: &Path) -> anyhow::Result<Vec<RawRow>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("read match rows {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "json" => parse_json_rows(&raw),
        "csv" => parse_csv_rows(&raw),
        other => Err(anyhow!(
            "unsupported match row format `{other}` for {}",
            path.display()
        )),
    }
}

pub fn parse_json_rows(raw: &str) -> anyhow::Result<Vec<RawRow>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Vec::new());
    }
    serde_json::from_str::<Vec<RawRow>>(trimmed).context("invalid match rows json")
}

/// Plain comma-separated rows with a header line. Quoted cells are not supported.
pub fn parse_csv_rows(raw: &str) -> anyhow::Result<Vec<RawRow>> {
    let mut lines = raw.lines().filter(|l| !l.trim().is_empty());
    let Some(header) = lines.next() else {
        return Ok(Vec::new());
    };
    let columns: Vec<String> = header.split(',').map(|c| c.trim().to_string()).collect();
    for required in REQUIRED_COLUMNS {
        if !columns.iter().any(|c| c == required) {
            return Err(anyhow!("csv header is missing required column `{required}`"));
        }
    }

    let mut out = Vec::new();
    for line in lines {
        let mut row = RawRow::new();
        let cells = line.split(',').count();
        if cells != columns.len() {
            row.insert(
                CELL_MISMATCH.to_string(),
                Value::String(format!("has {cells} cells, header has {}", columns.len())),
            );
        }
        for (col, cell) in columns.iter().zip(line.split(',')) {
            let cell = cell.trim();
            if !cell.is_empty() {
                row.insert(col.clone(), Value::String(cell.to_string()));
            }
        }
        out.push(row);
    }
    Ok(out)
}

pub fn parse_row(row_idx: usize, row: &RawRow) -> Result<MatchRecord, DataError> {
    if let Some(reason) = row.get(CELL_MISMATCH).and_then(as_string_any) {
        return Err(DataError::Malformed {
            row: row_idx,
            field: "row",
            reason,
        });
    }
    let match_id = required_str(row_idx, row, "match_id")?;
    let kickoff_raw = required_str(row_idx, row, "kickoff")?;
    let kickoff = parse_kickoff(&kickoff_raw).ok_or_else(|| DataError::Malformed {
        row: row_idx,
        field: "kickoff",
        reason: format!("cannot parse `{kickoff_raw}` as a UTC timestamp"),
    })?;
    let home_team_id = required_str(row_idx, row, "home_team_id")?;
    let away_team_id = required_str(row_idx, row, "away_team_id")?;
    let venue = required_str(row_idx, row, "venue")?;

    let home_goals = goals(row_idx, row, "home_goals")?;
    let away_goals = goals(row_idx, row, "away_goals")?;
    let result = match (home_goals, away_goals) {
        (Some(home_goals), Some(away_goals)) => Some(FinalScore {
            home_goals,
            away_goals,
        }),
        (None, None) => None,
        (Some(_), None) => {
            return Err(DataError::Malformed {
                row: row_idx,
                field: "away_goals",
                reason: "missing while home_goals is present".to_string(),
            });
        }
        (None, Some(_)) => {
            return Err(DataError::Malformed {
                row: row_idx,
                field: "home_goals",
                reason: "missing while away_goals is present".to_string(),
            });
        }
    };

    let supersedes = row.get("supersedes").and_then(as_string_any);

    let record = MatchRecord {
        match_id,
        kickoff,
        home_team_id,
        away_team_id,
        venue,
        result,
        supersedes,
    };
    record.validate(row_idx)?;
    Ok(record)
}

/// Appends every row. With `partial` set, offending rows are reported and
/// skipped; otherwise the first rejection aborts.
pub fn ingest_rows(
    store: &mut MatchStore,
    rows: &[RawRow],
    partial: bool,
) -> Result<IngestReport, DataError> {
    let mut report = IngestReport::default();
    for (idx, row) in rows.iter().enumerate() {
        let outcome = parse_row(idx, row).and_then(|record| store.append(record));
        match outcome {
            Ok(()) => report.accepted += 1,
            Err(err) if partial => {
                warn!(row = idx, error = %err, "rejected match row");
                report.rejected.push(err);
            }
            Err(err) => return Err(err),
        }
    }
    info!(
        accepted = report.accepted,
        rejected = report.rejected.len(),
        "match rows ingested"
    );
    Ok(report)
}

pub fn parse_kickoff(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    None
}

fn required_str(row_idx: usize, row: &RawRow, field: &'static str) -> Result<String, DataError> {
    let value = row.get(field).and_then(as_string_any);
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(DataError::Malformed {
            row: row_idx,
            field,
            reason: "is missing".to_string(),
        }),
    }
}

fn goals(row_idx: usize, row: &RawRow, field: &'static str) -> Result<Option<u8>, DataError> {
    let Some(value) = row.get(field) else {
        return Ok(None);
    };
    if value.is_null() || value.as_str().is_some_and(|s| s.trim().is_empty()) {
        return Ok(None);
    }
    let n = as_i64_any(value).ok_or_else(|| DataError::Malformed {
        row: row_idx,
        field,
        reason: format!("`{value}` is not an integer"),
    })?;
    u8::try_from(n).map(Some).map_err(|_| DataError::Malformed {
        row: row_idx,
        field,
        reason: format!("{n} is out of range"),
    })
}

fn as_string_any(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_i64_any(v: &Value) -> Option<i64> {
    if let Some(n) = v.as_i64() {
        return Some(n);
    }
    v.as_str()?.trim().parse::<i64>().ok()
}

#[cfg(test)]
mod tests {
    use super::{ingest_rows, parse_csv_rows, parse_json_rows, parse_kickoff};
    use crate::error::DataError;
    use crate::match_store::MatchStore;

    const CSV: &str = "match_id,kickoff,home_team_id,away_team_id,venue,home_goals,away_goals
1,2024-08-16 19:00,ars,che,Emirates,2,1
2,2024-08-17T14:00:00Z,liv,mci,Anfield,,
3,2024-08-18 14:00,tot,tot,WHL,0,0
1,2024-08-19 14:00,ars,liv,Emirates,1,1
4,2024-08-20 14:00,bha,new,Amex,3,
";

    #[test]
    fn rows_wider_or_narrower_than_the_header_are_malformed() {
        let raw = "match_id,kickoff,home_team_id,away_team_id,venue,home_goals,away_goals
1,2024-08-16 19:00,ars,che,Emirates,2,1,EXTRA,JUNK
2,2024-08-17 19:00,liv,mci,Anfield
3,2024-08-18 19:00,tot,new,WHL,1,1
";
        let rows = parse_csv_rows(raw).unwrap();
        let mut store = MatchStore::new();
        let err = ingest_rows(&mut store, &rows, false).unwrap_err();
        assert!(matches!(err, DataError::Malformed { row: 0, field: "row", .. }));
        assert!(store.is_empty());

        let report = ingest_rows(&mut store, &rows, true).unwrap();
        assert_eq!(report.accepted, 1);
        assert_eq!(report.rejected.len(), 2);
        assert!(matches!(report.rejected[1], DataError::Malformed { row: 1, field: "row", .. }));
        assert!(store.get("3").is_some());
    }

    #[test]
    fn kickoff_formats() {
        assert!(parse_kickoff("2024-08-16T19:00:00+01:00").is_some());
        assert!(parse_kickoff("2024-08-16 19:00").is_some());
        assert!(parse_kickoff("16/08/2024").is_none());
    }

    #[test]
    fn partial_ingestion_reports_each_rejection() {
        let rows = parse_csv_rows(CSV).unwrap();
        assert_eq!(rows.len(), 5);
        let mut store = MatchStore::new();
        let report = ingest_rows(&mut store, &rows, true).unwrap();
        assert_eq!(report.accepted, 2);
        assert_eq!(report.rejected.len(), 3);
        assert!(matches!(report.rejected[0], DataError::Malformed { row: 2, .. }));
        assert!(matches!(
            report.rejected[1],
            DataError::DuplicateRecord { ref match_id } if match_id == "1"
        ));
        assert!(store.get("2").unwrap().result.is_none());
    }

    #[test]
    fn strict_ingestion_stops_at_first_rejection() {
        let rows = parse_csv_rows(CSV).unwrap();
        let mut store = MatchStore::new();
        let err = ingest_rows(&mut store, &rows, false).unwrap_err();
        assert!(matches!(err, DataError::Malformed { row: 2, .. }));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn json_rows_accept_numeric_cells() {
        let rows = parse_json_rows(
            r#"[{"match_id": 7, "kickoff": "2024-01-01 12:00", "home_team_id": 1,
                 "away_team_id": 2, "venue": "Ground", "home_goals": 1, "away_goals": "0"}]"#,
        )
        .unwrap();
        let mut store = MatchStore::new();
        ingest_rows(&mut store, &rows, false).unwrap();
        let rec = store.get("7").unwrap();
        assert_eq!(rec.home_team_id, "1");
        assert_eq!(rec.result.unwrap().away_goals, 0);
        assert!(parse_json_rows("null").unwrap().is_empty());
    }

    #[test]
    fn csv_header_must_carry_required_columns() {
        assert!(parse_csv_rows("match_id,kickoff\n1,2024-01-01 12:00\n").is_err());
    }
}
