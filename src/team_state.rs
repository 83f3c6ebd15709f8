use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LeakageError;
use crate::match_store::MatchRecord;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EloConfig {
    pub k: f64,
    pub home_adv_pts: f64,
    pub initial: f64,
    pub scale: f64,
}

impl Default for EloConfig {
    fn default() -> Self {
        Self {
            k: 20.0,
            home_adv_pts: 60.0,
            initial: 1500.0,
            scale: 400.0,
        }
    }
}

impl EloConfig {
    pub fn expected_home(&self, home: f64, away: f64) -> f64 {
        expected_score(home + self.home_adv_pts, away, self.scale)
    }
}

pub fn expected_score(r_a: f64, r_b: f64, scale: f64) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf(-(r_a - r_b) / scale))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureOutcome {
    pub match_id: String,
    pub kickoff: DateTime<Utc>,
    pub goals_for: u8,
    pub goals_against: u8,
    pub at_home: bool,
}

impl FixtureOutcome {
    pub fn points(&self) -> f64 {
        if self.goals_for > self.goals_against {
            3.0
        } else if self.goals_for == self.goals_against {
            1.0
        } else {
            0.0
        }
    }
}

/// A team's derived statistics right after the match played at `as_of`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamState {
    pub team_id: String,
    pub as_of: DateTime<Utc>,
    pub source_match: String,
    pub elo: f64,
    pub played: usize,
    pub recent: VecDeque<FixtureOutcome>,
    pub rest_days_total: f64,
    pub home_venues: BTreeMap<String, u32>,
}

impl TeamState {
    fn fresh(team_id: &str, elo: f64) -> Self {
        Self {
            team_id: team_id.to_string(),
            as_of: DateTime::<Utc>::MIN_UTC,
            source_match: String::new(),
            elo,
            played: 0,
            recent: VecDeque::new(),
            rest_days_total: 0.0,
            home_venues: BTreeMap::new(),
        }
    }

    pub fn last_kickoff(&self) -> Option<DateTime<Utc>> {
        self.recent.back().map(|f| f.kickoff)
    }

    /// Most frequent home venue; ties go to the lexicographically smallest name.
    pub fn home_ground(&self) -> Option<&str> {
        let mut best: Option<(&str, u32)> = None;
        for (venue, count) in &self.home_venues {
            if best.is_none_or(|(_, c)| *count > c) {
                best = Some((venue.as_str(), *count));
            }
        }
        best.map(|(v, _)| v)
    }
}

/// Per-team chronological snapshots, written by one sequential replay.
#[derive(Debug, Clone)]
pub struct TeamLedger {
    elo: EloConfig,
    memory: usize,
    timelines: HashMap<String, Vec<TeamState>>,
}

impl TeamLedger {
    /// `memory` bounds how many recent fixtures each snapshot carries.
    pub fn replay<'a, I>(records: I, elo: EloConfig, memory: usize) -> Result<Self, LeakageError>
    where
        I: IntoIterator<Item = &'a MatchRecord>,
    {
        let mut ledger = Self {
            elo,
            memory: memory.max(1),
            timelines: HashMap::new(),
        };
        let mut previous: Option<&MatchRecord> = None;
        let mut applied = 0usize;
        for record in records {
            if let Some(prev) = previous
                && prev.order_key() >= record.order_key()
            {
                return Err(LeakageError::ReplayOutOfOrder {
                    match_id: record.match_id.clone(),
                    previous: prev.match_id.clone(),
                });
            }
            previous = Some(record);
            if ledger.apply(record) {
                applied += 1;
            }
        }
        debug!(
            applied,
            teams = ledger.timelines.len(),
            "team ledger replayed"
        );
        Ok(ledger)
    }

    pub fn elo_config(&self) -> EloConfig {
        self.elo
    }

    fn apply(&mut self, record: &MatchRecord) -> bool {
        let Some(score) = record.result else {
            return false;
        };
        let home_pre = self.latest_or_fresh(&record.home_team_id);
        let away_pre = self.latest_or_fresh(&record.away_team_id);

        let expected_home = self.elo.expected_home(home_pre.elo, away_pre.elo);
        let delta = self.elo.k * (score.home_score_value() - expected_home);

        let home_post = self.advance(
            home_pre,
            record,
            delta,
            FixtureOutcome {
                match_id: record.match_id.clone(),
                kickoff: record.kickoff,
                goals_for: score.home_goals,
                goals_against: score.away_goals,
                at_home: true,
            },
        );
        let away_post = self.advance(
            away_pre,
            record,
            -delta,
            FixtureOutcome {
                match_id: record.match_id.clone(),
                kickoff: record.kickoff,
                goals_for: score.away_goals,
                goals_against: score.home_goals,
                at_home: false,
            },
        );
        self.push(home_post);
        self.push(away_post);
        true
    }

    fn latest_or_fresh(&self, team_id: &str) -> TeamState {
        self.timelines
            .get(team_id)
            .and_then(|t| t.last())
            .cloned()
            .unwrap_or_else(|| TeamState::fresh(team_id, self.elo.initial))
    }

    fn advance(
        &self,
        mut state: TeamState,
        record: &MatchRecord,
        elo_delta: f64,
        outcome: FixtureOutcome,
    ) -> TeamState {
        if let Some(last) = state.last_kickoff() {
            state.rest_days_total += days_between(last, record.kickoff);
        }
        state.elo += elo_delta;
        state.played += 1;
        state.as_of = record.kickoff;
        state.source_match = record.match_id.clone();
        if outcome.at_home && !is_neutral(&record.venue) {
            *state.home_venues.entry(record.venue.clone()).or_insert(0) += 1;
        }
        state.recent.push_back(outcome);
        while state.recent.len() > self.memory {
            state.recent.pop_front();
        }
        state
    }

    fn push(&mut self, state: TeamState) {
        self.timelines
            .entry(state.team_id.clone())
            .or_default()
            .push(state);
    }

    /// Latest snapshot strictly before `cutoff`, if the team has played.
    pub fn state_before(&self, team_id: &str, cutoff: DateTime<Utc>) -> Option<&TeamState> {
        let timeline = self.timelines.get(team_id)?;
        let idx = timeline.partition_point(|s| s.as_of < cutoff);
        idx.checked_sub(1).map(|i| &timeline[i])
    }

    /// Pre-match rating: the initial rating when nothing is visible.
    pub fn rating_before(&self, team_id: &str, cutoff: DateTime<Utc>) -> f64 {
        self.state_before(team_id, cutoff)
            .map(|s| s.elo)
            .unwrap_or(self.elo.initial)
    }

    pub fn timeline(&self, team_id: &str) -> &[TeamState] {
        self.timelines
            .get(team_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn team_count(&self) -> usize {
        self.timelines.len()
    }
}

pub fn is_neutral(venue: &str) -> bool {
    venue.trim().eq_ignore_ascii_case("neutral")
}

pub fn days_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_seconds() as f64 / 86_400.0
}
