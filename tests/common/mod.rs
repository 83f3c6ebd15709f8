#![allow(dead_code)]

use std::path::Path;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use prematch_lab::config::RunConfig;
use prematch_lab::match_store::{FinalScore, MatchRecord, MatchStore};

pub const TEAMS: usize = 8;

fn team(i: usize) -> String {
    format!("t{i}")
}

/// Circle-method pairings for one round of an even-sized league.
fn round_pairs(round: usize) -> Vec<(usize, usize)> {
    let n = TEAMS;
    let mut ring: Vec<usize> = (1..n).collect();
    ring.rotate_left(round % (n - 1));
    let mut slots = vec![0];
    slots.extend(ring);
    (0..n / 2)
        .map(|i| {
            let (a, b) = (slots[i], slots[n - 1 - i]);
            if round % 2 == 0 { (a, b) } else { (b, a) }
        })
        .collect()
}

/// Double round robins, one round per week. Every match in a round shares
/// its kickoff, so ties on kickoff are the norm.
pub fn league(seasons: usize, seed: u64) -> Vec<MatchRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let strength: Vec<i32> = (0..TEAMS).map(|i| (i % 4) as i32).collect();
    let t0: DateTime<Utc> = Utc.with_ymd_and_hms(2019, 8, 3, 15, 0, 0).unwrap();
    let rounds_per_season = 2 * (TEAMS - 1);
    let mut out = Vec::new();
    for round in 0..seasons * rounds_per_season {
        let kickoff = t0 + Duration::days(7 * round as i64);
        for (slot, (h, a)) in round_pairs(round).into_iter().enumerate() {
            let edge = strength[h] - strength[a];
            let home_goals = (rng.gen_range(0..3) + edge.max(0)) as u8;
            let away_goals = (rng.gen_range(0..2) + (-edge).max(0)) as u8;
            out.push(MatchRecord {
                match_id: format!("r{round:03}-{slot}"),
                kickoff,
                home_team_id: team(h),
                away_team_id: team(a),
                venue: format!("{} ground", team(h)),
                result: Some(FinalScore {
                    home_goals,
                    away_goals,
                }),
                supersedes: None,
            });
        }
    }
    out
}

pub fn store_of(records: &[MatchRecord]) -> MatchStore {
    let mut store = MatchStore::new();
    for r in records {
        store.append(r.clone()).unwrap();
    }
    store
}

pub fn write_csv(path: &Path, records: &[MatchRecord]) {
    let mut out = String::from("match_id,kickoff,home_team_id,away_team_id,venue,home_goals,away_goals\n");
    for r in records {
        let (h, a) = r
            .result
            .map(|s| (s.home_goals.to_string(), s.away_goals.to_string()))
            .unwrap_or_default();
        out.push_str(&format!(
            "{},{},{},{},{},{},{}\n",
            r.match_id,
            r.kickoff.to_rfc3339(),
            r.home_team_id,
            r.away_team_id,
            r.venue,
            h,
            a
        ));
    }
    std::fs::write(path, out).unwrap();
}

/// A run config over `data` writing artifacts under `root`.
pub fn run_config(data: &Path, root: &Path, target: &str) -> RunConfig {
    let raw = format!(
        r#"
seed = 5

[dataset]
path = "{data}"

[target]
{target}

[cv]
strategy = "expanding"
min_train_size = 56
horizon = 28
step = 28

[models]
epochs = 20

[artifacts]
root = "{root}"
label = "test"
"#,
        data = data.display(),
        root = root.display(),
    );
    let cfg = RunConfig::from_toml_str(&raw).unwrap();
    cfg.validate().unwrap();
    cfg
}
