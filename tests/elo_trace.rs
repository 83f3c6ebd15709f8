mod common;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use prematch_lab::features::{CutoffPolicy, FeatureEngine, FeatureKind, FeatureSetSpec};
use prematch_lab::match_store::{FinalScore, MatchRecord, MatchStore};
use prematch_lab::team_state::{EloConfig, TeamLedger};

fn t(day: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 3, 1, 20, 0, 0).unwrap() + Duration::days(day)
}

fn fixture(id: &str, day: i64, home: &str, away: &str, score: Option<(u8, u8)>) -> MatchRecord {
    MatchRecord {
        match_id: id.to_string(),
        kickoff: t(day),
        home_team_id: home.to_string(),
        away_team_id: away.to_string(),
        venue: format!("{home} park"),
        result: score.map(|(home_goals, away_goals)| FinalScore {
            home_goals,
            away_goals,
        }),
        supersedes: None,
    }
}

fn flat_elo() -> EloConfig {
    EloConfig {
        home_adv_pts: 0.0,
        ..EloConfig::default()
    }
}

fn triangle() -> Vec<MatchRecord> {
    vec![
        fixture("m1", 0, "A", "B", Some((2, 0))),
        fixture("m2", 7, "B", "C", Some((1, 0))),
        fixture("m3", 14, "C", "A", Some((3, 1))),
        fixture("m4", 21, "A", "B", None),
    ]
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn ratings_follow_the_hand_trace() {
    let records = triangle();
    let ledger = TeamLedger::replay(&records, flat_elo(), 5).unwrap();

    assert_eq!(ledger.rating_before("A", t(0)), 1500.0);
    assert!(close(ledger.rating_before("A", t(1)), 1510.0));
    assert!(close(ledger.rating_before("B", t(1)), 1490.0));
    assert!(close(ledger.rating_before("B", t(8)), 1500.28774368332));
    assert!(close(ledger.rating_before("C", t(8)), 1489.71225631668));
    assert!(close(ledger.rating_before("C", t(15)), 1500.2955217453048));
    assert!(close(ledger.rating_before("A", t(15)), 1499.4167345713752));

    // ratings are zero-sum
    let total: f64 = ["A", "B", "C"].iter().map(|team| ledger.rating_before(team, t(30))).sum();
    assert!(close(total, 4500.0));
}

#[test]
fn unplayed_fixture_reads_pre_match_ratings() {
    let mut store = MatchStore::new();
    for record in triangle() {
        store.append(record).unwrap();
    }
    let snapshot = store.snapshot().unwrap();
    let spec = FeatureSetSpec {
        elo: flat_elo(),
        active: vec![FeatureKind::Elo],
        ..FeatureSetSpec::default()
    };
    let engine = FeatureEngine::new(&snapshot, spec).unwrap();
    let fv = engine.compute("m4", None).unwrap();

    assert!(close(fv.get("home_elo").unwrap(), 1499.4167345713752));
    assert!(close(fv.get("away_elo").unwrap(), 1500.28774368332));
    assert!(close(fv.get("elo_diff").unwrap(), 1499.4167345713752 - 1500.28774368332));
    assert!(close(fv.get("elo_expected_home").unwrap(), 0.4987465197528473));
    assert!(fv.gaps.is_empty());

    // m4 carries no result, so nothing after it moves
    let all = engine.compute_all(CutoffPolicy::default()).unwrap();
    assert_eq!(all.len(), 4);
    assert_eq!(all[3], fv);
}

#[test]
fn home_advantage_shifts_expectation_not_ratings_before_play() {
    let records = triangle();
    let with_adv = TeamLedger::replay(&records, EloConfig::default(), 5).unwrap();
    // first match: equal ratings, 60 point edge for the hosts
    let expected = EloConfig::default().expected_home(1500.0, 1500.0);
    assert!(expected > 0.5);
    assert!(close(
        with_adv.rating_before("A", t(1)),
        1500.0 + 20.0 * (1.0 - expected)
    ));
}

#[test]
fn insertion_order_does_not_change_features() {
    let records = common::league(2, 17);
    let reference = common::store_of(&records).snapshot().unwrap();
    let spec = FeatureSetSpec::default();
    let expected = FeatureEngine::new(&reference, spec.clone())
        .unwrap()
        .compute_all(CutoffPolicy::default())
        .unwrap();

    let mut rng = StdRng::seed_from_u64(99);
    for _ in 0..3 {
        let mut shuffled = records.clone();
        shuffled.shuffle(&mut rng);
        let snapshot = common::store_of(&shuffled).snapshot().unwrap();
        assert_eq!(snapshot.dataset_version(), reference.dataset_version());
        let got = FeatureEngine::new(&snapshot, spec.clone())
            .unwrap()
            .compute_all(CutoffPolicy::default())
            .unwrap();
        assert_eq!(got, expected);
    }
}
