use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, params};

use crate::error::DataError;
use crate::ingest::IngestReport;
use crate::match_store::{FinalScore, MatchRecord, MatchStore};

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS matches (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            match_id TEXT NOT NULL UNIQUE,
            kickoff TEXT NOT NULL,
            home_team_id TEXT NOT NULL,
            away_team_id TEXT NOT NULL,
            venue TEXT NOT NULL,
            home_goals INTEGER NULL,
            away_goals INTEGER NULL,
            supersedes TEXT NULL,
            recorded_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_matches_kickoff ON matches(kickoff, match_id);

        CREATE TABLE IF NOT EXISTS ingest_runs (
            run_id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at TEXT NOT NULL,
            finished_at TEXT NULL,
            source TEXT NOT NULL,
            accepted INTEGER NOT NULL,
            rejected INTEGER NOT NULL,
            errors_json TEXT NOT NULL
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

/// Plain INSERT: the log is append-only, so an existing id is a duplicate, never an update.
pub fn insert_match(conn: &Connection, m: &MatchRecord) -> Result<()> {
    let res = conn.execute(
        r#"
        INSERT INTO matches (
            match_id, kickoff, home_team_id, away_team_id, venue,
            home_goals, away_goals, supersedes, recorded_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            m.match_id,
            m.kickoff.to_rfc3339(),
            m.home_team_id,
            m.away_team_id,
            m.venue,
            m.result.map(|r| r.home_goals as i64),
            m.result.map(|r| r.away_goals as i64),
            m.supersedes,
            Utc::now().to_rfc3339(),
        ],
    );
    match res {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            Err(DataError::DuplicateRecord {
                match_id: m.match_id.clone(),
            }
            .into())
        }
        Err(e) => Err(e).context("insert match"),
    }
}

/// Persists the log entries of `store` from position `from` on, in one
/// transaction. Entries before `from` are assumed to be in the db already.
pub fn persist_store(
    conn: &mut Connection,
    store: &MatchStore,
    from: usize,
    source: &str,
    report: &IngestReport,
) -> Result<usize> {
    let started_at = Utc::now().to_rfc3339();
    let tx = conn.transaction().context("begin ingest transaction")?;
    let mut inserted = 0usize;
    for record in store.iter_log().skip(from) {
        insert_match(&tx, record)?;
        inserted += 1;
    }
    let errors: Vec<String> = report.rejected.iter().map(|e| e.to_string()).collect();
    let errors_json = serde_json::to_string(&errors).context("serialize ingest errors")?;
    tx.execute(
        "INSERT INTO ingest_runs(started_at, finished_at, source, accepted, rejected, errors_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            started_at,
            Utc::now().to_rfc3339(),
            source,
            report.accepted as i64,
            report.rejected.len() as i64,
            errors_json
        ],
    )
    .context("insert ingest run")?;
    tx.commit().context("commit ingest transaction")?;
    Ok(inserted)
}

pub fn load_store(conn: &Connection) -> Result<MatchStore> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT match_id, kickoff, home_team_id, away_team_id, venue,
                   home_goals, away_goals, supersedes
            FROM matches
            ORDER BY seq ASC
            "#,
        )
        .context("prepare load matches query")?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<i64>>(5)?,
                row.get::<_, Option<i64>>(6)?,
                row.get::<_, Option<String>>(7)?,
            ))
        })
        .context("query load matches")?;

    let mut store = MatchStore::new();
    for row in rows {
        let (match_id, kickoff, home, away, venue, hg, ag, supersedes) =
            row.context("decode match row")?;
        let kickoff = DateTime::parse_from_rfc3339(&kickoff)
            .with_context(|| format!("match {match_id}: bad stored kickoff {kickoff}"))?
            .with_timezone(&Utc);
        let result = match (hg, ag) {
            (Some(h), Some(a)) => Some(FinalScore {
                home_goals: u8::try_from(h).context("stored home goals out of range")?,
                away_goals: u8::try_from(a).context("stored away goals out of range")?,
            }),
            _ => None,
        };
        store.append(MatchRecord {
            match_id,
            kickoff,
            home_team_id: home,
            away_team_id: away,
            venue,
            result,
            supersedes,
        })?;
    }
    Ok(store)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rusqlite::Connection;

    use super::{init_schema, insert_match, load_store, persist_store};
    use crate::error::DataError;
    use crate::ingest::IngestReport;
    use crate::match_store::{FinalScore, MatchRecord, MatchStore};

    fn record(id: &str, day: u32) -> MatchRecord {
        MatchRecord {
            match_id: id.to_string(),
            kickoff: Utc.with_ymd_and_hms(2023, 3, day, 20, 0, 0).unwrap(),
            home_team_id: "h".to_string(),
            away_team_id: "a".to_string(),
            venue: "Ground".to_string(),
            result: Some(FinalScore {
                home_goals: 2,
                away_goals: 0,
            }),
            supersedes: None,
        }
    }

    #[test]
    fn store_round_trips_through_sqlite() {
        let mut conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let mut store = MatchStore::new();
        store.append(record("b", 2)).unwrap();
        store.append(record("a", 1)).unwrap();
        let mut fix = record("a-fix", 1);
        fix.supersedes = Some("a".to_string());
        store.append(fix).unwrap();

        let n = persist_store(&mut conn, &store, 0, "test", &IngestReport::default()).unwrap();
        assert_eq!(n, 3);
        let loaded = load_store(&conn).unwrap();
        assert_eq!(
            loaded.dataset_version().unwrap(),
            store.dataset_version().unwrap()
        );
        assert_eq!(loaded.superseded_by("a"), Some("a-fix"));
    }

    #[test]
    fn second_insert_of_same_id_is_a_duplicate() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        insert_match(&conn, &record("x", 1)).unwrap();
        let err = insert_match(&conn, &record("x", 2)).unwrap_err();
        assert_eq!(
            err.downcast_ref::<DataError>(),
            Some(&DataError::DuplicateRecord {
                match_id: "x".to_string()
            })
        );
    }
}
