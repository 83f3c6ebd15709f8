use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{CalibrationInputError, ConfigError, Result};
use crate::features::FeatureVector;
use crate::match_store::{FinalScore, StoreSnapshot};
use crate::metrics::{self, CalibrationBin, RegressionMetric, Summary};
use crate::predictor::{Prediction, PredictionOutput, Predictor, TrainingSet};
use crate::splitter::{Fold, TimeRange};
use crate::targets::Target;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    pub target: Target,
    pub calibration_bins: usize,
    pub regression_metrics: Vec<RegressionMetric>,
    pub seed: u64,
}

impl EvaluationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.target.validate()?;
        if self.calibration_bins < 2 {
            return Err(ConfigError::InvalidValue {
                field: "evaluation.calibration_bins",
                reason: format!("{} bins; need at least 2", self.calibration_bins),
            });
        }
        if !self.target.is_classification() && self.regression_metrics.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "evaluation.regression_metrics",
                reason: "goals target needs at least one metric".to_string(),
            });
        }
        Ok(())
    }
}

/// One labeled match on the evaluation timeline.
#[derive(Debug, Clone, Copy)]
pub struct Sample<'a> {
    pub features: &'a FeatureVector,
    pub score: FinalScore,
}

/// Pairs vectors with final scores; unplayed fixtures are dropped.
/// `vectors` must be in snapshot order, which keeps the timeline sorted.
pub fn labeled_timeline<'a>(
    snapshot: &StoreSnapshot,
    vectors: &'a [FeatureVector],
) -> Result<Vec<Sample<'a>>> {
    let mut samples = Vec::with_capacity(vectors.len());
    for fv in vectors {
        if let Some(score) = snapshot.get(&fv.match_id)?.result {
            samples.push(Sample {
                features: fv,
                score,
            });
        }
    }
    Ok(samples)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldReport {
    pub fold_id: usize,
    pub predictor: String,
    pub train_size: usize,
    pub test_size: usize,
    pub train_range: TimeRange,
    pub test_range: TimeRange,
    pub metrics: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reliability: Vec<CalibrationBin>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub target: Target,
    pub seed: u64,
    pub folds: Vec<Fold>,
    pub results: Vec<FoldReport>,
    /// predictor → metric → summary across folds.
    pub aggregate: BTreeMap<String, BTreeMap<String, Summary>>,
    pub predictions: Vec<Prediction>,
}

impl EvaluationReport {
    pub fn summary(&self, predictor: &str, metric: &str) -> Option<&Summary> {
        self.aggregate.get(predictor)?.get(metric)
    }
}

fn fold_seed(seed: u64, fold_id: usize) -> u64 {
    seed.wrapping_mul(6_364_136_223_846_793_005)
        .wrapping_add(fold_id as u64 + 1)
}

/// Fits and scores every predictor on every fold. Jobs share nothing
/// mutable; results come back in (fold, predictor) order.
pub fn evaluate(
    samples: &[Sample<'_>],
    folds: &[Fold],
    predictors: &[Arc<dyn Predictor>],
    feature_names: &[&'static str],
    cfg: &EvaluationConfig,
) -> Result<EvaluationReport> {
    cfg.validate()?;
    let jobs: Vec<(&Fold, &Arc<dyn Predictor>)> = folds
        .iter()
        .flat_map(|f| predictors.iter().map(move |p| (f, p)))
        .collect();

    let outcomes = jobs
        .par_iter()
        .map(|(fold, predictor)| evaluate_fold(samples, fold, predictor, feature_names, cfg))
        .collect::<Result<Vec<_>>>()?;

    let mut results = Vec::with_capacity(outcomes.len());
    let mut predictions = Vec::new();
    for (report, preds) in outcomes {
        results.push(report);
        predictions.extend(preds);
    }

    let mut per_metric: BTreeMap<String, BTreeMap<String, Vec<f64>>> = BTreeMap::new();
    for r in &results {
        let entry = per_metric.entry(r.predictor.clone()).or_default();
        for (name, value) in &r.metrics {
            entry.entry(name.clone()).or_default().push(*value);
        }
    }
    let aggregate = per_metric
        .into_iter()
        .map(|(predictor, by_metric)| {
            let summaries = by_metric
                .into_iter()
                .map(|(name, values)| (name, metrics::summarize(&values)))
                .collect();
            (predictor, summaries)
        })
        .collect();

    Ok(EvaluationReport {
        target: cfg.target,
        seed: cfg.seed,
        folds: folds.to_vec(),
        results,
        aggregate,
        predictions,
    })
}

fn evaluate_fold(
    samples: &[Sample<'_>],
    fold: &Fold,
    predictor: &Arc<dyn Predictor>,
    feature_names: &[&'static str],
    cfg: &EvaluationConfig,
) -> Result<(FoldReport, Vec<Prediction>)> {
    let train_samples = &samples[fold.train.clone()];
    let test_samples = &samples[fold.test.clone()];
    let train = TrainingSet::new(
        cfg.target,
        feature_names.to_vec(),
        train_samples.iter().map(|s| s.features).collect(),
        train_samples.iter().map(|s| s.score).collect(),
        fold_seed(cfg.seed, fold.fold_id),
    );
    let model = predictor.fit(&train)?;

    let mut predictions = Vec::with_capacity(test_samples.len());
    for s in test_samples {
        let output = model.predict(s.features)?;
        check_output(&cfg.target, &output).map_err(|reason| CalibrationInputError {
            predictor: predictor.name().to_string(),
            fold_id: fold.fold_id,
            match_id: s.features.match_id.clone(),
            reason,
        })?;
        predictions.push(Prediction {
            match_id: s.features.match_id.clone(),
            fold_id: fold.fold_id,
            predictor: predictor.name().to_string(),
            output,
        });
    }

    let mut scores = BTreeMap::new();
    let mut reliability = Vec::new();
    match cfg.target.classes() {
        Some(classes) => {
            let probs: Vec<Vec<f64>> = predictions
                .iter()
                .filter_map(|p| match &p.output {
                    PredictionOutput::Probabilities(v) => Some(v.clone()),
                    PredictionOutput::Point(_) => None,
                })
                .collect();
            let outcomes: Vec<usize> = test_samples
                .iter()
                .filter_map(|s| cfg.target.label(&s.score).class())
                .collect();
            let m = metrics::evaluate_probs(&probs, &outcomes);
            let bins: Vec<Vec<CalibrationBin>> = (0..classes.len())
                .map(|c| metrics::calibration_bins(&probs, &outcomes, c, cfg.calibration_bins))
                .collect();
            scores.insert("log_loss".to_string(), m.log_loss);
            scores.insert("brier".to_string(), m.brier);
            scores.insert("accuracy".to_string(), m.accuracy);
            scores.insert("ece".to_string(), metrics::ece(&bins, m.samples));
            reliability = bins.into_iter().flatten().collect();
        }
        None => {
            let predicted: Vec<f64> = predictions
                .iter()
                .filter_map(|p| match p.output {
                    PredictionOutput::Point(v) => Some(v),
                    PredictionOutput::Probabilities(_) => None,
                })
                .collect();
            let actual: Vec<f64> = test_samples
                .iter()
                .map(|s| cfg.target.label(&s.score).value())
                .collect();
            for metric in &cfg.regression_metrics {
                scores.insert(metric.name().to_string(), metric.compute(&predicted, &actual));
            }
        }
    }

    info!(
        fold = fold.fold_id,
        predictor = predictor.name(),
        train = train_samples.len(),
        test = test_samples.len(),
        metrics = ?scores,
        "fold evaluated"
    );

    Ok((
        FoldReport {
            fold_id: fold.fold_id,
            predictor: predictor.name().to_string(),
            train_size: train_samples.len(),
            test_size: test_samples.len(),
            train_range: fold.train_range,
            test_range: fold.test_range,
            metrics: scores,
            reliability,
        },
        predictions,
    ))
}

fn check_output(target: &Target, output: &PredictionOutput) -> std::result::Result<(), String> {
    match (target.classes(), output) {
        (Some(classes), PredictionOutput::Probabilities(p)) => metrics::validate_probs(p, classes.len()),
        (Some(_), PredictionOutput::Point(v)) => {
            Err(format!("point estimate {v} for a classification target"))
        }
        (None, PredictionOutput::Point(v)) => metrics::validate_point(*v),
        (None, PredictionOutput::Probabilities(_)) => {
            Err("probabilities for a regression target".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};

    use super::{EvaluationConfig, Sample, evaluate};
    use crate::error::{Error, Result};
    use crate::features::FeatureVector;
    use crate::match_store::FinalScore;
    use crate::metrics::RegressionMetric;
    use crate::models::Empirical;
    use crate::predictor::{FittedModel, PredictionOutput, Predictor, TrainingSet};
    use crate::splitter::{CvStrategy, SplitConfig, split};
    use crate::targets::Target;

    struct Lopsided;

    struct LopsidedFit;

    impl FittedModel for LopsidedFit {
        fn predict(&self, _features: &FeatureVector) -> Result<PredictionOutput> {
            Ok(PredictionOutput::Probabilities(vec![0.6, 0.3, 0.2]))
        }

        fn state(&self) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
    }

    impl Predictor for Lopsided {
        fn name(&self) -> &str {
            "lopsided"
        }

        fn is_baseline(&self) -> bool {
            false
        }

        fn fit(&self, _train: &TrainingSet<'_>) -> Result<Box<dyn FittedModel>> {
            Ok(Box::new(LopsidedFit))
        }
    }

    fn vectors(n: usize) -> Vec<FeatureVector> {
        let t0 = Utc.with_ymd_and_hms(2021, 3, 1, 19, 0, 0).unwrap();
        (0..n)
            .map(|i| FeatureVector {
                match_id: format!("m{i:03}"),
                feature_set: "fs-test".to_string(),
                cutoff: t0 + Duration::days(i as i64),
                kickoff: t0 + Duration::days(i as i64),
                values: BTreeMap::new(),
                gaps: Vec::new(),
            })
            .collect()
    }

    fn samples(vs: &[FeatureVector]) -> Vec<Sample<'_>> {
        vs.iter()
            .enumerate()
            .map(|(i, fv)| Sample {
                features: fv,
                score: FinalScore {
                    home_goals: (i % 3) as u8,
                    away_goals: 1,
                },
            })
            .collect()
    }

    fn cfg(target: Target) -> EvaluationConfig {
        EvaluationConfig {
            target,
            calibration_bins: 10,
            regression_metrics: RegressionMetric::ALL.to_vec(),
            seed: 11,
        }
    }

    #[test]
    fn aggregates_cover_every_fold() {
        let vs = vectors(30);
        let s = samples(&vs);
        let kickoffs: Vec<_> = vs.iter().map(|v| v.kickoff).collect();
        let folds = split(
            &kickoffs,
            &SplitConfig {
                strategy: CvStrategy::Expanding,
                min_train_size: 10,
                horizon: 5,
                step: 5,
                gap: 0,
            },
        )
        .unwrap();
        let predictors: Vec<Arc<dyn Predictor>> = vec![Arc::new(Empirical)];
        let report = evaluate(&s, &folds, &predictors, &[], &cfg(Target::OneXTwo)).unwrap();
        assert_eq!(report.results.len(), folds.len());
        assert_eq!(report.predictions.len(), folds.len() * 5);
        let ll = report.summary("empirical", "log_loss").unwrap();
        assert_eq!(ll.folds, folds.len());
        assert!(ll.min <= ll.mean && ll.mean <= ll.max);
        assert!(report.results.iter().all(|r| r.train_range.end < r.test_range.start));

        let goals = evaluate(&s, &folds, &predictors, &[], &cfg(Target::Goals)).unwrap();
        assert!(goals.summary("empirical", "poisson_deviance").is_some());
        assert!(goals.summary("empirical", "log_loss").is_none());
    }

    #[test]
    fn bad_probabilities_abort_the_run() {
        let vs = vectors(12);
        let s = samples(&vs);
        let kickoffs: Vec<_> = vs.iter().map(|v| v.kickoff).collect();
        let folds = split(
            &kickoffs,
            &SplitConfig {
                strategy: CvStrategy::Rolling,
                min_train_size: 6,
                horizon: 3,
                step: 3,
                gap: 0,
            },
        )
        .unwrap();
        let predictors: Vec<Arc<dyn Predictor>> = vec![Arc::new(Empirical), Arc::new(Lopsided)];
        let err = evaluate(&s, &folds, &predictors, &[], &cfg(Target::OneXTwo)).unwrap_err();
        match err {
            Error::CalibrationInput(e) => {
                assert_eq!(e.predictor, "lopsided");
                assert!(e.reason.contains("sum"));
            }
            other => panic!("unexpected error {other}"),
        }
        // same probabilities are a shape error for a binary target
        let err = evaluate(&s, &folds, &predictors, &[], &cfg(Target::Btts)).unwrap_err();
        assert!(matches!(err, Error::CalibrationInput(_)));
    }
}
