use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DataError, Result};
use crate::fingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalScore {
    pub home_goals: u8,
    pub away_goals: u8,
}

impl FinalScore {
    pub fn total_goals(&self) -> u32 {
        self.home_goals as u32 + self.away_goals as u32
    }

    /// 1.0 home win, 0.5 draw, 0.0 away win.
    pub fn home_score_value(&self) -> f64 {
        if self.home_goals > self.away_goals {
            1.0
        } else if self.home_goals < self.away_goals {
            0.0
        } else {
            0.5
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: String,
    pub kickoff: DateTime<Utc>,
    pub home_team_id: String,
    pub away_team_id: String,
    pub venue: String,
    pub result: Option<FinalScore>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<String>,
}

impl MatchRecord {
    pub fn order_key(&self) -> (DateTime<Utc>, &str) {
        (self.kickoff, self.match_id.as_str())
    }

    pub fn involves(&self, team_id: &str) -> bool {
        self.home_team_id == team_id || self.away_team_id == team_id
    }

    pub fn is_finalized(&self) -> bool {
        self.result.is_some()
    }

    pub fn validate(&self, row: usize) -> Result<(), DataError> {
        if self.match_id.trim().is_empty() {
            return Err(malformed(row, "match_id", "is empty"));
        }
        if self.home_team_id.trim().is_empty() {
            return Err(malformed(row, "home_team_id", "is empty"));
        }
        if self.away_team_id.trim().is_empty() {
            return Err(malformed(row, "away_team_id", "is empty"));
        }
        if self.home_team_id == self.away_team_id {
            return Err(malformed(
                row,
                "away_team_id",
                &format!("equals home team {}", self.home_team_id),
            ));
        }
        if self.supersedes.as_deref() == Some(self.match_id.as_str()) {
            return Err(malformed(row, "supersedes", "points at itself"));
        }
        Ok(())
    }
}

fn malformed(row: usize, field: &'static str, reason: &str) -> DataError {
    DataError::Malformed {
        row,
        field,
        reason: reason.to_string(),
    }
}

type OrderKey = (DateTime<Utc>, String);

/// Append-only match log. Records are never edited; corrections are new
/// records carrying `supersedes`.
#[derive(Debug, Default)]
pub struct MatchStore {
    log: Vec<Arc<MatchRecord>>,
    by_id: HashMap<String, usize>,
    superseded_by: HashMap<String, String>,
    effective: BTreeMap<OrderKey, usize>,
}

impl MatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    pub fn append(&mut self, record: MatchRecord) -> Result<(), DataError> {
        record.validate(self.log.len())?;
        if self.by_id.contains_key(&record.match_id) {
            return Err(DataError::DuplicateRecord {
                match_id: record.match_id,
            });
        }
        if let Some(target) = record.supersedes.clone() {
            self.check_supersession(&record.match_id, &target)?;
            let old_key = self
                .by_id
                .get(&target)
                .map(|idx| (self.log[*idx].kickoff, self.log[*idx].match_id.clone()));
            if let Some(key) = old_key {
                self.effective.remove(&key);
            }
            self.superseded_by
                .insert(target, record.match_id.clone());
        }

        let idx = self.log.len();
        self.by_id.insert(record.match_id.clone(), idx);
        self.effective
            .insert((record.kickoff, record.match_id.clone()), idx);
        self.log.push(Arc::new(record));
        Ok(())
    }

    /// Appends a correction for `record.supersedes`.
    pub fn supersede(&mut self, record: MatchRecord) -> Result<(), DataError> {
        if record.supersedes.is_none() {
            return Err(DataError::InvalidSupersession {
                match_id: record.match_id,
                target: String::new(),
                reason: "correction carries no supersedes marker".to_string(),
            });
        }
        self.append(record)
    }

    fn check_supersession(&self, match_id: &str, target: &str) -> Result<(), DataError> {
        if !self.by_id.contains_key(target) {
            return Err(DataError::InvalidSupersession {
                match_id: match_id.to_string(),
                target: target.to_string(),
                reason: "target is not in the store".to_string(),
            });
        }
        if let Some(existing) = self.superseded_by.get(target) {
            return Err(DataError::InvalidSupersession {
                match_id: match_id.to_string(),
                target: target.to_string(),
                reason: format!("already superseded by {existing}"),
            });
        }
        Ok(())
    }

    pub fn get(&self, match_id: &str) -> Option<&MatchRecord> {
        self.by_id.get(match_id).map(|idx| self.log[*idx].as_ref())
    }

    pub fn superseded_by(&self, match_id: &str) -> Option<&str> {
        self.superseded_by.get(match_id).map(String::as_str)
    }

    /// Effective records with `kickoff < cutoff`, ordered by `(kickoff, match_id)`.
    pub fn query_before(&self, cutoff: DateTime<Utc>) -> impl Iterator<Item = &MatchRecord> + '_ {
        self.effective
            .range(..(cutoff, String::new()))
            .map(|(_, idx)| self.log[*idx].as_ref())
    }

    /// Every record, superseded ones included, in insertion order.
    pub fn iter_log(&self) -> impl Iterator<Item = &MatchRecord> + '_ {
        self.log.iter().map(Arc::as_ref)
    }

    pub fn iter_effective(&self) -> impl Iterator<Item = &MatchRecord> + '_ {
        self.effective.values().map(|idx| self.log[*idx].as_ref())
    }

    /// Fingerprint of the whole log, independent of insertion order.
    pub fn dataset_version(&self) -> Result<String> {
        let mut entries: Vec<&MatchRecord> = self.log.iter().map(Arc::as_ref).collect();
        entries.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        fingerprint::json_fingerprint(&entries)
    }

    pub fn snapshot(&self) -> Result<StoreSnapshot> {
        let records: Vec<MatchRecord> = self.iter_effective().cloned().collect();
        let position = records
            .iter()
            .enumerate()
            .map(|(idx, r)| (r.match_id.clone(), idx))
            .collect();
        Ok(StoreSnapshot {
            records: records.into(),
            position,
            dataset_version: self.dataset_version()?,
        })
    }
}

/// Frozen, chronologically ordered view of the effective records.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    records: Arc<[MatchRecord]>,
    position: HashMap<String, usize>,
    dataset_version: String,
}

impl StoreSnapshot {
    pub fn records(&self) -> &[MatchRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dataset_version(&self) -> &str {
        &self.dataset_version
    }

    pub fn get(&self, match_id: &str) -> Result<&MatchRecord, DataError> {
        self.position
            .get(match_id)
            .map(|idx| &self.records[*idx])
            .ok_or_else(|| DataError::UnknownMatch {
                match_id: match_id.to_string(),
            })
    }

    pub fn position(&self, match_id: &str) -> Option<usize> {
        self.position.get(match_id).copied()
    }

    pub fn query_before(&self, cutoff: DateTime<Utc>) -> std::slice::Iter<'_, MatchRecord> {
        let end = self.records.partition_point(|r| r.kickoff < cutoff);
        self.records[..end].iter()
    }

    pub fn labeled(&self) -> impl Iterator<Item = &MatchRecord> + '_ {
        self.records.iter().filter(|r| r.is_finalized())
    }
}
