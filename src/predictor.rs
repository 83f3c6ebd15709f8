use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::features::FeatureVector;
use crate::match_store::FinalScore;
use crate::targets::{Label, Target};

/// Training rows for one fold, in chronological order.
pub struct TrainingSet<'a> {
    pub target: Target,
    pub feature_names: Vec<&'static str>,
    pub rows: Vec<&'a FeatureVector>,
    pub scores: Vec<FinalScore>,
    pub labels: Vec<Label>,
    pub seed: u64,
}

impl<'a> TrainingSet<'a> {
    pub fn new(
        target: Target,
        feature_names: Vec<&'static str>,
        rows: Vec<&'a FeatureVector>,
        scores: Vec<FinalScore>,
        seed: u64,
    ) -> Self {
        let labels = scores.iter().map(|s| target.label(s)).collect();
        Self {
            target,
            feature_names,
            rows,
            scores,
            labels,
            seed,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn draw_rate(&self) -> f64 {
        if self.scores.is_empty() {
            return 0.25;
        }
        let draws = self
            .scores
            .iter()
            .filter(|s| s.home_goals == s.away_goals)
            .count();
        draws as f64 / self.scores.len() as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionOutput {
    /// Aligned with `Target::classes()`.
    Probabilities(Vec<f64>),
    Point(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub match_id: String,
    pub fold_id: usize,
    pub predictor: String,
    pub output: PredictionOutput,
}

pub trait FittedModel: Send + Sync {
    fn predict(&self, features: &FeatureVector) -> Result<PredictionOutput>;

    /// Parameters as JSON, for artifact storage.
    fn state(&self) -> Result<serde_json::Value>;
}

pub trait Predictor: Send + Sync {
    fn name(&self) -> &str;

    fn is_baseline(&self) -> bool;

    fn fit(&self, train: &TrainingSet<'_>) -> Result<Box<dyn FittedModel>>;
}

#[derive(Default, Clone)]
pub struct PredictorRegistry {
    entries: Vec<Arc<dyn Predictor>>,
}

impl PredictorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any predictor already registered under the same name.
    pub fn register(&mut self, predictor: Arc<dyn Predictor>) {
        match self.entries.iter().position(|p| p.name() == predictor.name()) {
            Some(idx) => self.entries[idx] = predictor,
            None => self.entries.push(predictor),
        }
    }

    pub fn remove(&mut self, name: &str) -> Result<Arc<dyn Predictor>, ConfigError> {
        let idx = self
            .entries
            .iter()
            .position(|p| p.name() == name)
            .ok_or_else(|| ConfigError::UnknownPredictor(name.to_string()))?;
        let remaining_baselines = self
            .entries
            .iter()
            .enumerate()
            .filter(|(i, p)| *i != idx && p.is_baseline())
            .count();
        if self.entries[idx].is_baseline() && remaining_baselines == 0 {
            return Err(ConfigError::NoBaseline(Some(name.to_string())));
        }
        Ok(self.entries.remove(idx))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Predictor>> {
        self.entries.iter().find(|p| p.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|p| p.name()).collect()
    }

    pub fn baselines(&self) -> impl Iterator<Item = &Arc<dyn Predictor>> + '_ {
        self.entries.iter().filter(|p| p.is_baseline())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.baselines().next().is_none() {
            return Err(ConfigError::NoBaseline(None));
        }
        Ok(())
    }

    /// Every baseline in registration order, then the requested
    /// non-baselines in request order.
    pub fn select(&self, requested: &[String]) -> Result<Vec<Arc<dyn Predictor>>, ConfigError> {
        self.validate()?;
        let mut selected: Vec<Arc<dyn Predictor>> = self.baselines().cloned().collect();
        for name in requested {
            let predictor = self
                .get(name)
                .ok_or_else(|| ConfigError::UnknownPredictor(name.clone()))?;
            if !selected.iter().any(|p| p.name() == predictor.name()) {
                selected.push(predictor);
            }
        }
        debug!(
            predictors = ?selected.iter().map(|p| p.name()).collect::<Vec<_>>(),
            "predictors selected"
        );
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{FittedModel, Predictor, PredictorRegistry, TrainingSet};
    use crate::error::{ConfigError, Result};

    struct Stub {
        name: &'static str,
        baseline: bool,
    }

    impl Predictor for Stub {
        fn name(&self) -> &str {
            self.name
        }

        fn is_baseline(&self) -> bool {
            self.baseline
        }

        fn fit(&self, _train: &TrainingSet<'_>) -> Result<Box<dyn FittedModel>> {
            unreachable!("registry tests never fit")
        }
    }

    fn registry() -> PredictorRegistry {
        let mut r = PredictorRegistry::new();
        r.register(Arc::new(Stub {
            name: "base",
            baseline: true,
        }));
        r.register(Arc::new(Stub {
            name: "fancy",
            baseline: false,
        }));
        r
    }

    #[test]
    fn select_always_includes_baselines() {
        let r = registry();
        let names: Vec<String> = r
            .select(&["fancy".to_string()])
            .unwrap()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(names, vec!["base", "fancy"]);
        assert_eq!(r.select(&[]).unwrap().len(), 1);
        assert!(matches!(
            r.select(&["nope".to_string()]),
            Err(ConfigError::UnknownPredictor(n)) if n == "nope"
        ));
    }

    #[test]
    fn last_baseline_cannot_be_removed() {
        let mut r = registry();
        assert!(matches!(
            r.remove("base"),
            Err(ConfigError::NoBaseline(Some(ref n))) if n == "base"
        ));
        assert!(r.remove("fancy").is_ok());
        assert_eq!(r.names(), vec!["base"]);
    }

    #[test]
    fn empty_registry_fails_validation() {
        assert!(matches!(
            PredictorRegistry::new().validate(),
            Err(ConfigError::NoBaseline(None))
        ));
    }
}
