use std::ops::Range;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, LeakageError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CvStrategy {
    Expanding,
    Rolling,
}

/// Sizes are counted in labeled matches along the chronological timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SplitConfig {
    pub strategy: CvStrategy,
    pub min_train_size: usize,
    pub horizon: usize,
    pub step: usize,
    /// Matches skipped between the end of training and the start of testing.
    #[serde(default)]
    pub gap: usize,
}

impl SplitConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_train_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cv.min_train_size",
                reason: "must be positive".to_string(),
            });
        }
        if self.horizon == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cv.horizon",
                reason: "must be positive".to_string(),
            });
        }
        if self.step == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cv.step",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fold {
    pub fold_id: usize,
    pub train: Range<usize>,
    pub test: Range<usize>,
    pub train_range: TimeRange,
    pub test_range: TimeRange,
}

impl Fold {
    pub fn check(&self) -> Result<(), LeakageError> {
        if self.train_range.end >= self.test_range.start || self.train.end > self.test.start {
            return Err(LeakageError::FoldOverlap {
                fold_id: self.fold_id,
                train_end: self.train_range.end,
                test_start: self.test_range.start,
            });
        }
        Ok(())
    }
}

/// Chronological folds over `kickoffs`, which must be sorted ascending.
/// Unsorted input is rejected, never reordered.
pub fn split(kickoffs: &[DateTime<Utc>], cfg: &SplitConfig) -> Result<Vec<Fold>> {
    cfg.validate()?;
    if let Some(idx) = kickoffs.windows(2).position(|w| w[0] > w[1]) {
        return Err(LeakageError::FoldOverlap {
            fold_id: 0,
            train_end: kickoffs[idx],
            test_start: kickoffs[idx + 1],
        }
        .into());
    }

    let n = kickoffs.len();
    let mut folds = Vec::new();
    let mut train_end = cfg.min_train_size;
    let mut prev_test_start: Option<usize> = None;
    while train_end <= n {
        let train_start = match cfg.strategy {
            CvStrategy::Expanding => 0,
            CvStrategy::Rolling => train_end - cfg.min_train_size,
        };
        let last_train = kickoffs[train_end - 1];
        // test windows stay at least `step` apart even after a tie shift
        let floor = prev_test_start.map_or(0, |p| p + cfg.step);
        let mut test_start = (train_end + cfg.gap).max(floor);
        while test_start < n && kickoffs[test_start] <= last_train {
            test_start += 1;
        }
        let test_end = test_start + cfg.horizon;
        if test_end > n {
            break;
        }

        let fold = Fold {
            fold_id: folds.len(),
            train: train_start..train_end,
            test: test_start..test_end,
            train_range: TimeRange {
                start: kickoffs[train_start],
                end: last_train,
            },
            test_range: TimeRange {
                start: kickoffs[test_start],
                end: kickoffs[test_end - 1],
            },
        };
        fold.check()?;
        prev_test_start = Some(test_start);
        folds.push(fold);
        train_end += cfg.step;
    }

    if folds.is_empty() {
        return Err(ConfigError::InsufficientSpan {
            available: n,
            min_train: cfg.min_train_size,
            gap: cfg.gap,
            horizon: cfg.horizon,
        }
        .into());
    }
    debug!(folds = folds.len(), strategy = ?cfg.strategy, "temporal folds generated");
    Ok(folds)
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::{CvStrategy, SplitConfig, split};
    use crate::error::{ConfigError, Error};

    fn daily(n: usize) -> Vec<DateTime<Utc>> {
        let t0 = Utc.with_ymd_and_hms(2022, 8, 1, 12, 0, 0).unwrap();
        (0..n).map(|i| t0 + Duration::days(i as i64)).collect()
    }

    fn cfg(strategy: CvStrategy, min_train: usize, horizon: usize, step: usize) -> SplitConfig {
        SplitConfig {
            strategy,
            min_train_size: min_train,
            horizon,
            step,
            gap: 0,
        }
    }

    #[test]
    fn expanding_grows_rolling_slides() {
        let t = daily(10);
        let exp = split(&t, &cfg(CvStrategy::Expanding, 4, 2, 2)).unwrap();
        assert_eq!(exp.len(), 3);
        assert_eq!(exp[0].train, 0..4);
        assert_eq!(exp[0].test, 4..6);
        assert_eq!(exp[2].train, 0..8);
        assert_eq!(exp[2].test, 8..10);

        let roll = split(&t, &cfg(CvStrategy::Rolling, 4, 2, 2)).unwrap();
        assert_eq!(roll[1].train, 2..6);
        assert_eq!(roll[2].train, 4..8);
        assert_eq!(roll[2].test, exp[2].test);
    }

    #[test]
    fn ties_at_the_boundary_stay_out_of_the_test_fold() {
        let mut t = daily(8);
        t[4] = t[3];
        let folds = split(&t, &cfg(CvStrategy::Expanding, 4, 2, 2)).unwrap();
        assert_eq!(folds[0].test, 5..7);
        assert!(folds[0].train_range.end < folds[0].test_range.start);
    }

    #[test]
    fn tie_shift_carries_into_later_folds() {
        let mut t = daily(10);
        t[4] = t[3];
        let folds = split(&t, &cfg(CvStrategy::Expanding, 4, 2, 2)).unwrap();
        assert_eq!(folds.len(), 2);
        assert_eq!(folds[0].test, 5..7);
        assert_eq!(folds[1].train, 0..6);
        assert_eq!(folds[1].test, 7..9);
    }

    #[test]
    fn gap_embargoes_matches() {
        let t = daily(10);
        let mut c = cfg(CvStrategy::Expanding, 4, 2, 3);
        c.gap = 1;
        let folds = split(&t, &c).unwrap();
        assert_eq!(folds[0].test, 5..7);
        assert_eq!(folds[1].train, 0..7);
        assert_eq!(folds[1].test, 8..10);
    }

    #[test]
    fn invalid_parameters_are_config_errors() {
        let t = daily(10);
        for bad in [
            cfg(CvStrategy::Expanding, 0, 2, 2),
            cfg(CvStrategy::Expanding, 4, 0, 2),
            cfg(CvStrategy::Rolling, 4, 2, 0),
        ] {
            assert!(matches!(split(&t, &bad), Err(Error::Config(ConfigError::InvalidValue { .. }))));
        }
        assert!(matches!(
            split(&t, &cfg(CvStrategy::Expanding, 9, 2, 2)),
            Err(Error::Config(ConfigError::InsufficientSpan { available: 10, .. }))
        ));
    }

    #[test]
    fn unsorted_timeline_is_refused() {
        let mut t = daily(6);
        t.swap(1, 2);
        assert!(matches!(
            split(&t, &cfg(CvStrategy::Expanding, 2, 1, 1)),
            Err(Error::Leakage(_))
        ));
    }
}
