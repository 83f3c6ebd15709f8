use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Error, Result};
use crate::features::FeatureVector;
use crate::predictor::{FittedModel, PredictionOutput, Predictor, PredictorRegistry, TrainingSet};
use crate::scoreline;
use crate::targets::{Label, Target};

/// Gradient-descent settings shared by the regression-based predictors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    pub l2: f64,
    pub batch_size: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            epochs: 200,
            learning_rate: 0.05,
            l2: 1e-3,
            batch_size: 32,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.epochs == 0 {
            return Err(invalid("models.epochs", "must be positive"));
        }
        if self.batch_size == 0 {
            return Err(invalid("models.batch_size", "must be positive"));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(invalid("models.learning_rate", "must be a positive number"));
        }
        if !(self.l2.is_finite() && self.l2 >= 0.0) {
            return Err(invalid("models.l2", "must be a non-negative number"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

/// All built-in predictors: three baselines and the Dixon–Coles model.
pub fn default_registry(cfg: ModelConfig) -> PredictorRegistry {
    let mut registry = PredictorRegistry::new();
    registry.register(Arc::new(EloRule { cfg }));
    registry.register(Arc::new(Linear { cfg }));
    registry.register(Arc::new(Empirical));
    registry.register(Arc::new(PoissonDc { cfg }));
    registry
}

fn model_error(predictor: &str, reason: impl Into<String>) -> Error {
    Error::Model {
        predictor: predictor.to_string(),
        reason: reason.into(),
    }
}

fn to_state<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}

/// Train-fold z-scoring; a missing value maps to the train mean, i.e. 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Standardizer {
    names: Vec<String>,
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl Standardizer {
    fn fit(names: &[&str], rows: &[&FeatureVector]) -> Self {
        let mut means = Vec::with_capacity(names.len());
        let mut stds = Vec::with_capacity(names.len());
        for name in names {
            let seen: Vec<f64> = rows.iter().filter_map(|r| r.get(name)).collect();
            if seen.is_empty() {
                means.push(0.0);
                stds.push(1.0);
                continue;
            }
            let n = seen.len() as f64;
            let mean = seen.iter().sum::<f64>() / n;
            let var = seen.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            means.push(mean);
            stds.push(if var > 1e-12 { var.sqrt() } else { 1.0 });
        }
        Self {
            names: names.iter().map(|n| n.to_string()).collect(),
            means,
            stds,
        }
    }

    /// Leading 1.0 is the intercept column.
    fn transform(&self, fv: &FeatureVector) -> Vec<f64> {
        let mut x = Vec::with_capacity(self.names.len() + 1);
        x.push(1.0);
        for ((name, mean), std) in self.names.iter().zip(&self.means).zip(&self.stds) {
            x.push(fv.get(name).map(|v| (v - mean) / std).unwrap_or(0.0));
        }
        x
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Head {
    Softmax { weights: Vec<Vec<f64>> },
    Poisson { weights: Vec<f64> },
}

const ETA_MIN: f64 = -10.0;
const ETA_MAX: f64 = 5.0;

fn dot(w: &[f64], x: &[f64]) -> f64 {
    w.iter().zip(x).map(|(a, b)| a * b).sum()
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let mx = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|l| (l - mx).exp()).collect();
    let den: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / den).collect()
}

fn poisson_rate(w: &[f64], x: &[f64]) -> f64 {
    dot(w, x).clamp(ETA_MIN, ETA_MAX).exp()
}

impl Head {
    fn output(&self, x: &[f64]) -> PredictionOutput {
        match self {
            Head::Softmax { weights } => {
                let logits: Vec<f64> = weights.iter().map(|w| dot(w, x)).collect();
                PredictionOutput::Probabilities(softmax(&logits))
            }
            Head::Poisson { weights } => PredictionOutput::Point(poisson_rate(weights, x)),
        }
    }
}

fn batches(n: usize, cfg: &ModelConfig, rng: &mut StdRng) -> Vec<Vec<usize>> {
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);
    order.chunks(cfg.batch_size).map(<[usize]>::to_vec).collect()
}

fn fit_softmax(
    x: &[Vec<f64>],
    y: &[usize],
    classes: usize,
    cfg: &ModelConfig,
    seed: u64,
) -> Vec<Vec<f64>> {
    let d = x.first().map(Vec::len).unwrap_or(1);
    let n = x.len();
    let mut weights = vec![vec![0.0_f64; d]; classes];
    for (c, w) in weights.iter_mut().enumerate() {
        let count = y.iter().filter(|label| **label == c).count();
        w[0] = ((count as f64 + 1.0) / (n as f64 + classes as f64)).ln();
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut grad = vec![vec![0.0_f64; d]; classes];
    for _ in 0..cfg.epochs {
        for batch in batches(n, cfg, &mut rng) {
            grad.iter_mut().for_each(|g| g.fill(0.0));
            for &i in &batch {
                let logits: Vec<f64> = weights.iter().map(|w| dot(w, &x[i])).collect();
                let p = softmax(&logits);
                for c in 0..classes {
                    let err = p[c] - if y[i] == c { 1.0 } else { 0.0 };
                    for j in 0..d {
                        grad[c][j] += err * x[i][j];
                    }
                }
            }
            let m = batch.len() as f64;
            for c in 0..classes {
                for j in 0..d {
                    let penalty = if j == 0 { 0.0 } else { cfg.l2 * weights[c][j] };
                    weights[c][j] -= cfg.learning_rate * (grad[c][j] / m + penalty);
                }
            }
        }
    }
    weights
}

fn fit_poisson(x: &[Vec<f64>], y: &[f64], cfg: &ModelConfig, seed: u64) -> Vec<f64> {
    let d = x.first().map(Vec::len).unwrap_or(1);
    let n = x.len();
    let mut weights = vec![0.0_f64; d];
    let mean = if n > 0 { y.iter().sum::<f64>() / n as f64 } else { 1.0 };
    weights[0] = mean.max(0.1).ln();

    let mut rng = StdRng::seed_from_u64(seed);
    let mut grad = vec![0.0_f64; d];
    for _ in 0..cfg.epochs {
        for batch in batches(n, cfg, &mut rng) {
            grad.fill(0.0);
            for &i in &batch {
                let err = poisson_rate(&weights, &x[i]) - y[i];
                for j in 0..d {
                    grad[j] += err * x[i][j];
                }
            }
            let m = batch.len() as f64;
            for j in 0..d {
                let penalty = if j == 0 { 0.0 } else { cfg.l2 * weights[j] };
                weights[j] -= cfg.learning_rate * (grad[j] / m + penalty);
            }
        }
    }
    weights
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LinearFit {
    target: Target,
    scaler: Standardizer,
    head: Head,
}

impl FittedModel for LinearFit {
    fn predict(&self, features: &FeatureVector) -> Result<PredictionOutput> {
        Ok(self.head.output(&self.scaler.transform(features)))
    }

    fn state(&self) -> Result<serde_json::Value> {
        to_state(self)
    }
}

fn fit_linear(
    predictor: &str,
    train: &TrainingSet<'_>,
    names: &[&str],
    cfg: &ModelConfig,
) -> Result<LinearFit> {
    if train.is_empty() {
        return Err(model_error(predictor, "training fold is empty"));
    }
    let scaler = Standardizer::fit(names, &train.rows);
    let x: Vec<Vec<f64>> = train.rows.iter().map(|r| scaler.transform(r)).collect();
    let head = match train.target.classes() {
        Some(classes) => {
            let y: Vec<usize> = train.labels.iter().filter_map(|l| l.class()).collect();
            Head::Softmax {
                weights: fit_softmax(&x, &y, classes.len(), cfg, train.seed),
            }
        }
        None => {
            let y: Vec<f64> = train.labels.iter().map(|l| l.value()).collect();
            Head::Poisson {
                weights: fit_poisson(&x, &y, cfg, train.seed),
            }
        }
    };
    Ok(LinearFit {
        target: train.target,
        scaler,
        head,
    })
}

/// L2-regularized softmax regression, or Poisson regression for goals.
pub struct Linear {
    pub cfg: ModelConfig,
}

impl Predictor for Linear {
    fn name(&self) -> &str {
        "linear"
    }

    fn is_baseline(&self) -> bool {
        true
    }

    fn fit(&self, train: &TrainingSet<'_>) -> Result<Box<dyn FittedModel>> {
        Ok(Box::new(fit_linear(self.name(), train, &train.feature_names, &self.cfg)?))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EloRuleFit {
    draw_rate: f64,
}

impl FittedModel for EloRuleFit {
    fn predict(&self, features: &FeatureVector) -> Result<PredictionOutput> {
        let expected = features.get("elo_expected_home").ok_or_else(|| {
            model_error(
                "elo_rule",
                format!("{} has no elo_expected_home", features.match_id),
            )
        })?;
        let d = self.draw_rate;
        Ok(PredictionOutput::Probabilities(vec![
            expected * (1.0 - d),
            d,
            (1.0 - expected) * (1.0 - d),
        ]))
    }

    fn state(&self) -> Result<serde_json::Value> {
        to_state(self)
    }
}

/// Pre-match ELO expectation split around the training draw rate. Other
/// targets regress on `elo_diff` alone.
pub struct EloRule {
    pub cfg: ModelConfig,
}

impl Predictor for EloRule {
    fn name(&self) -> &str {
        "elo_rule"
    }

    fn is_baseline(&self) -> bool {
        true
    }

    fn fit(&self, train: &TrainingSet<'_>) -> Result<Box<dyn FittedModel>> {
        let needed = match train.target {
            Target::OneXTwo => "elo_expected_home",
            _ => "elo_diff",
        };
        if !train.feature_names.contains(&needed) {
            return Err(model_error(
                self.name(),
                format!("feature set lacks `{needed}`; activate the elo group"),
            ));
        }
        match train.target {
            Target::OneXTwo => Ok(Box::new(EloRuleFit {
                draw_rate: train.draw_rate().clamp(0.05, 0.60),
            })),
            _ => Ok(Box::new(fit_linear(self.name(), train, &["elo_diff"], &self.cfg)?)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EmpiricalFit {
    output: PredictionOutput,
}

impl FittedModel for EmpiricalFit {
    fn predict(&self, _features: &FeatureVector) -> Result<PredictionOutput> {
        Ok(self.output.clone())
    }

    fn state(&self) -> Result<serde_json::Value> {
        to_state(self)
    }
}

/// Training-fold base rates, half-count smoothed so no class gets zero.
pub struct Empirical;

impl Predictor for Empirical {
    fn name(&self) -> &str {
        "empirical"
    }

    fn is_baseline(&self) -> bool {
        true
    }

    fn fit(&self, train: &TrainingSet<'_>) -> Result<Box<dyn FittedModel>> {
        let output = match train.target.classes() {
            Some(classes) => {
                let k = classes.len();
                let mut counts = vec![0.5_f64; k];
                for label in &train.labels {
                    if let Label::Class(c) = label
                        && *c < k
                    {
                        counts[*c] += 1.0;
                    }
                }
                let total: f64 = counts.iter().sum();
                PredictionOutput::Probabilities(counts.into_iter().map(|c| c / total).collect())
            }
            None => {
                if train.is_empty() {
                    return Err(model_error(self.name(), "training fold is empty"));
                }
                let mean =
                    train.labels.iter().map(|l| l.value()).sum::<f64>() / train.len() as f64;
                PredictionOutput::Point(mean)
            }
        };
        Ok(Box::new(EmpiricalFit { output }))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PoissonDcFit {
    target: Target,
    scaler: Standardizer,
    home: Vec<f64>,
    away: Vec<f64>,
    rho: f64,
}

impl FittedModel for PoissonDcFit {
    fn predict(&self, features: &FeatureVector) -> Result<PredictionOutput> {
        let x = self.scaler.transform(features);
        let lambda_home = poisson_rate(&self.home, &x);
        let lambda_away = poisson_rate(&self.away, &x);
        let grid = || scoreline::score_grid(lambda_home, lambda_away, self.rho);
        let probs = match self.target {
            Target::Goals => return Ok(PredictionOutput::Point(lambda_home + lambda_away)),
            Target::OneXTwo => {
                let g = grid();
                vec![g.home, g.draw, g.away]
            }
            Target::Btts => {
                let btts = grid().btts;
                vec![btts, 1.0 - btts]
            }
            Target::OverUnder { line } => {
                let over = grid().over(line);
                vec![over, 1.0 - over]
            }
        };
        Ok(PredictionOutput::Probabilities(probs))
    }

    fn state(&self) -> Result<serde_json::Value> {
        to_state(self)
    }
}

/// Separate Poisson regressions for home and away goals joined through a
/// Dixon–Coles score grid.
pub struct PoissonDc {
    pub cfg: ModelConfig,
}

impl Predictor for PoissonDc {
    fn name(&self) -> &str {
        "poisson_dc"
    }

    fn is_baseline(&self) -> bool {
        false
    }

    fn fit(&self, train: &TrainingSet<'_>) -> Result<Box<dyn FittedModel>> {
        if train.is_empty() {
            return Err(model_error(self.name(), "training fold is empty"));
        }
        let scaler = Standardizer::fit(&train.feature_names, &train.rows);
        let x: Vec<Vec<f64>> = train.rows.iter().map(|r| scaler.transform(r)).collect();
        let home_goals: Vec<f64> = train.scores.iter().map(|s| s.home_goals as f64).collect();
        let away_goals: Vec<f64> = train.scores.iter().map(|s| s.away_goals as f64).collect();
        let home = fit_poisson(&x, &home_goals, &self.cfg, train.seed);
        let away = fit_poisson(&x, &away_goals, &self.cfg, train.seed.wrapping_add(1));

        let n = train.len() as f64;
        let mean_home = (home_goals.iter().sum::<f64>() / n).clamp(0.20, 3.80);
        let mean_away = (away_goals.iter().sum::<f64>() / n).clamp(0.20, 3.80);
        let rho = scoreline::fit_rho_to_draw_rate(mean_home, mean_away, train.draw_rate());

        Ok(Box::new(PoissonDcFit {
            target: train.target,
            scaler,
            home,
            away,
            rho,
        }))
    }
}
