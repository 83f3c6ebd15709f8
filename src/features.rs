use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ConfigError, InsufficientHistory, LeakageError, Result};
use crate::fingerprint;
use crate::match_store::{MatchRecord, StoreSnapshot};
use crate::team_state::{
    EloConfig, FixtureOutcome, TeamLedger, TeamState, days_between, is_neutral,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Elo,
    Form,
    RestDays,
    HomeVenue,
}

static CATALOG: Lazy<BTreeMap<FeatureKind, &'static [&'static str]>> = Lazy::new(|| {
    BTreeMap::from([
        (
            FeatureKind::Elo,
            &["home_elo", "away_elo", "elo_diff", "elo_expected_home"][..],
        ),
        (
            FeatureKind::Form,
            &[
                "home_form_points",
                "home_form_goals_for",
                "home_form_goals_against",
                "away_form_points",
                "away_form_goals_for",
                "away_form_goals_against",
            ][..],
        ),
        (
            FeatureKind::RestDays,
            &["home_rest_days", "away_rest_days", "rest_diff"][..],
        ),
        (FeatureKind::HomeVenue, &["home_venue"][..]),
    ])
});

/// A named, versioned feature configuration. Two runs with equal specs over
/// the same snapshot produce byte-identical vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureSetSpec {
    pub version: String,
    #[serde(default = "default_form_window")]
    pub form_window: usize,
    #[serde(default)]
    pub elo: EloConfig,
    #[serde(default = "default_active")]
    pub active: Vec<FeatureKind>,
}

fn default_form_window() -> usize {
    5
}

fn default_active() -> Vec<FeatureKind> {
    vec![
        FeatureKind::Elo,
        FeatureKind::Form,
        FeatureKind::RestDays,
        FeatureKind::HomeVenue,
    ]
}

impl Default for FeatureSetSpec {
    fn default() -> Self {
        Self {
            version: "fs-v1".to_string(),
            form_window: default_form_window(),
            elo: EloConfig::default(),
            active: default_active(),
        }
    }
}

impl FeatureSetSpec {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version.trim().is_empty() {
            return Err(invalid("features.version", "must not be empty"));
        }
        if self.form_window == 0 {
            return Err(invalid("features.form_window", "must be positive"));
        }
        if !(self.elo.k.is_finite() && self.elo.k > 0.0) {
            return Err(invalid("features.elo.k", "must be a positive number"));
        }
        if !(self.elo.scale.is_finite() && self.elo.scale > 0.0) {
            return Err(invalid("features.elo.scale", "must be a positive number"));
        }
        if !self.elo.initial.is_finite() || !self.elo.home_adv_pts.is_finite() {
            return Err(invalid("features.elo", "ratings must be finite"));
        }
        if self.active.is_empty() {
            return Err(invalid("features.active", "lists no features"));
        }
        Ok(())
    }

    /// Active kinds, sorted and deduplicated.
    pub fn kinds(&self) -> Vec<FeatureKind> {
        let mut kinds = self.active.clone();
        kinds.sort_unstable();
        kinds.dedup();
        kinds
    }

    pub fn feature_names(&self) -> Vec<&'static str> {
        self.kinds()
            .into_iter()
            .flat_map(|k| CATALOG.get(&k).copied().unwrap_or_default().iter().copied())
            .collect()
    }

    pub fn has(&self, kind: FeatureKind) -> bool {
        self.active.contains(&kind)
    }

    pub fn fingerprint(&self) -> Result<String> {
        let canonical = Self {
            active: self.kinds(),
            ..self.clone()
        };
        fingerprint::json_fingerprint(&canonical)
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureGap {
    pub feature: String,
    pub team_id: String,
    pub needed: usize,
    pub available: usize,
}

impl From<InsufficientHistory> for FeatureGap {
    fn from(e: InsufficientHistory) -> Self {
        Self {
            feature: e.feature,
            team_id: e.team_id,
            needed: e.needed,
            available: e.available,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub match_id: String,
    pub feature_set: String,
    pub cutoff: DateTime<Utc>,
    pub kickoff: DateTime<Utc>,
    pub values: BTreeMap<String, Option<f64>>,
    pub gaps: Vec<FeatureGap>,
}

impl FeatureVector {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied().flatten()
    }

    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// How far before kickoff features are frozen. Zero means "at kickoff".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CutoffPolicy {
    pub lead: Duration,
}

impl Default for CutoffPolicy {
    fn default() -> Self {
        Self {
            lead: Duration::zero(),
        }
    }
}

impl CutoffPolicy {
    pub fn for_match(&self, record: &MatchRecord) -> DateTime<Utc> {
        record.kickoff - self.lead
    }
}

pub struct FeatureEngine<'s> {
    snapshot: &'s StoreSnapshot,
    spec: FeatureSetSpec,
    ledger: TeamLedger,
}

impl<'s> FeatureEngine<'s> {
    pub fn new(snapshot: &'s StoreSnapshot, spec: FeatureSetSpec) -> Result<Self> {
        spec.validate()?;
        let ledger = TeamLedger::replay(snapshot.records(), spec.elo, spec.form_window)?;
        info!(
            feature_set = %spec.version,
            matches = snapshot.len(),
            teams = ledger.team_count(),
            "feature engine ready"
        );
        Ok(Self {
            snapshot,
            spec,
            ledger,
        })
    }

    pub fn spec(&self) -> &FeatureSetSpec {
        &self.spec
    }

    pub fn ledger(&self) -> &TeamLedger {
        &self.ledger
    }

    pub fn compute(&self, match_id: &str, cutoff: Option<DateTime<Utc>>) -> Result<FeatureVector> {
        let target = self.snapshot.get(match_id)?;
        let cutoff = cutoff.unwrap_or(target.kickoff);
        self.compute_for(target, cutoff)
    }

    /// Features for a fixture that need not be in the store (e.g. an upcoming match).
    pub fn compute_for(&self, target: &MatchRecord, cutoff: DateTime<Utc>) -> Result<FeatureVector> {
        assemble(&self.spec, &self.ledger, target, cutoff)
    }

    /// One vector per effective match, in store order. The ledger was
    /// written by the sequential replay; assembly only reads it.
    pub fn compute_all(&self, policy: CutoffPolicy) -> Result<Vec<FeatureVector>> {
        self.snapshot
            .records()
            .par_iter()
            .map(|record| assemble(&self.spec, &self.ledger, record, policy.for_match(record)))
            .collect()
    }

    /// Same features from an explicitly supplied history. Every history
    /// record must lie strictly before the cutoff.
    pub fn compute_from_history(
        spec: &FeatureSetSpec,
        target: &MatchRecord,
        cutoff: DateTime<Utc>,
        history: &[MatchRecord],
    ) -> Result<FeatureVector> {
        spec.validate()?;
        check_cutoff(target, cutoff)?;
        let guard_feature = spec.feature_names().first().copied().unwrap_or("history");
        for record in history {
            if record.kickoff >= cutoff {
                return Err(LeakageError::FutureInput {
                    feature: guard_feature.to_string(),
                    match_id: target.match_id.clone(),
                    input_id: record.match_id.clone(),
                    input_time: record.kickoff,
                    cutoff,
                }
                .into());
            }
        }
        let mut ordered: Vec<&MatchRecord> = history.iter().collect();
        ordered.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        let ledger = TeamLedger::replay(ordered, spec.elo, spec.form_window)?;
        assemble(spec, &ledger, target, cutoff)
    }
}

fn check_cutoff(target: &MatchRecord, cutoff: DateTime<Utc>) -> Result<(), LeakageError> {
    if cutoff > target.kickoff {
        return Err(LeakageError::CutoffAfterKickoff {
            match_id: target.match_id.clone(),
            cutoff,
            kickoff: target.kickoff,
        });
    }
    Ok(())
}

struct Assembly<'a> {
    target: &'a MatchRecord,
    cutoff: DateTime<Utc>,
    values: BTreeMap<String, Option<f64>>,
    gaps: Vec<FeatureGap>,
}

impl Assembly<'_> {
    fn set(&mut self, name: &str, value: f64) {
        self.values.insert(name.to_string(), Some(value));
    }

    fn gap(&mut self, gap: InsufficientHistory) {
        self.values.insert(gap.feature.clone(), None);
        self.gaps.push(gap.into());
    }

    fn guard(
        &self,
        feature: &str,
        input_id: &str,
        input_time: DateTime<Utc>,
    ) -> Result<(), LeakageError> {
        if input_time >= self.cutoff {
            return Err(LeakageError::FutureInput {
                feature: feature.to_string(),
                match_id: self.target.match_id.clone(),
                input_id: input_id.to_string(),
                input_time,
                cutoff: self.cutoff,
            });
        }
        Ok(())
    }

    fn guard_state(&self, feature: &str, state: Option<&TeamState>) -> Result<(), LeakageError> {
        match state {
            Some(s) => self.guard(feature, &s.source_match, s.as_of),
            None => Ok(()),
        }
    }
}

fn assemble(
    spec: &FeatureSetSpec,
    ledger: &TeamLedger,
    target: &MatchRecord,
    cutoff: DateTime<Utc>,
) -> Result<FeatureVector> {
    check_cutoff(target, cutoff)?;
    let home = ledger.state_before(&target.home_team_id, cutoff);
    let away = ledger.state_before(&target.away_team_id, cutoff);
    let mut asm = Assembly {
        target,
        cutoff,
        values: BTreeMap::new(),
        gaps: Vec::new(),
    };

    for kind in spec.kinds() {
        match kind {
            FeatureKind::Elo => elo_features(&mut asm, ledger.elo_config(), home, away)?,
            FeatureKind::Form => {
                form_features(&mut asm, "home", &target.home_team_id, home, spec.form_window)?;
                form_features(&mut asm, "away", &target.away_team_id, away, spec.form_window)?;
            }
            FeatureKind::RestDays => rest_features(&mut asm, home, away)?,
            FeatureKind::HomeVenue => venue_feature(&mut asm, home)?,
        }
    }

    Ok(FeatureVector {
        match_id: target.match_id.clone(),
        feature_set: spec.version.clone(),
        cutoff,
        kickoff: target.kickoff,
        values: asm.values,
        gaps: asm.gaps,
    })
}

fn elo_features(
    asm: &mut Assembly<'_>,
    elo: EloConfig,
    home: Option<&TeamState>,
    away: Option<&TeamState>,
) -> Result<(), LeakageError> {
    asm.guard_state("home_elo", home)?;
    asm.guard_state("away_elo", away)?;
    let home_elo = home.map(|s| s.elo).unwrap_or(elo.initial);
    let away_elo = away.map(|s| s.elo).unwrap_or(elo.initial);
    asm.set("home_elo", home_elo);
    asm.set("away_elo", away_elo);
    asm.set("elo_diff", home_elo - away_elo);
    asm.set("elo_expected_home", elo.expected_home(home_elo, away_elo));
    Ok(())
}

fn form_features(
    asm: &mut Assembly<'_>,
    side: &str,
    team_id: &str,
    state: Option<&TeamState>,
    window: usize,
) -> Result<(), LeakageError> {
    let points = format!("{side}_form_points");
    let goals_for = format!("{side}_form_goals_for");
    let goals_against = format!("{side}_form_goals_against");

    let recent: Vec<&FixtureOutcome> = state
        .map(|s| s.recent.iter().rev().take(window).collect())
        .unwrap_or_default();
    for fixture in &recent {
        asm.guard(&points, &fixture.match_id, fixture.kickoff)?;
    }
    if recent.len() < window {
        for name in [points, goals_for, goals_against] {
            asm.gap(InsufficientHistory {
                feature: name,
                team_id: team_id.to_string(),
                needed: window,
                available: recent.len(),
            });
        }
        return Ok(());
    }

    let n = recent.len() as f64;
    let pts = recent.iter().map(|f| f.points()).sum::<f64>() / n;
    let gf = recent.iter().map(|f| f.goals_for as f64).sum::<f64>() / n;
    let ga = recent.iter().map(|f| f.goals_against as f64).sum::<f64>() / n;
    asm.set(&points, pts);
    asm.set(&goals_for, gf);
    asm.set(&goals_against, ga);
    Ok(())
}

fn rest_days(
    asm: &mut Assembly<'_>,
    feature: &str,
    team_id: &str,
    state: Option<&TeamState>,
) -> Result<Option<f64>, LeakageError> {
    asm.guard_state(feature, state)?;
    match state.and_then(TeamState::last_kickoff) {
        Some(last) => {
            let days = days_between(last, asm.target.kickoff);
            asm.set(feature, days);
            Ok(Some(days))
        }
        None => {
            asm.gap(InsufficientHistory {
                feature: feature.to_string(),
                team_id: team_id.to_string(),
                needed: 1,
                available: 0,
            });
            Ok(None)
        }
    }
}

fn rest_features(
    asm: &mut Assembly<'_>,
    home: Option<&TeamState>,
    away: Option<&TeamState>,
) -> Result<(), LeakageError> {
    let home_team = asm.target.home_team_id.clone();
    let away_team = asm.target.away_team_id.clone();
    let h = rest_days(asm, "home_rest_days", &home_team, home)?;
    let a = rest_days(asm, "away_rest_days", &away_team, away)?;
    match (h, a) {
        (Some(h), Some(a)) => asm.set("rest_diff", h - a),
        (None, _) => asm.gap(InsufficientHistory {
            feature: "rest_diff".to_string(),
            team_id: home_team,
            needed: 1,
            available: 0,
        }),
        (_, None) => asm.gap(InsufficientHistory {
            feature: "rest_diff".to_string(),
            team_id: away_team,
            needed: 1,
            available: 0,
        }),
    }
    Ok(())
}

fn venue_feature(asm: &mut Assembly<'_>, home: Option<&TeamState>) -> Result<(), LeakageError> {
    asm.guard_state("home_venue", home)?;
    let venue = asm.target.venue.trim();
    let value = if is_neutral(venue) {
        0.0
    } else {
        match home.and_then(TeamState::home_ground) {
            Some(ground) if ground != venue => 0.0,
            _ => 1.0,
        }
    };
    asm.set("home_venue", value);
    Ok(())
}
