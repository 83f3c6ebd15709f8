use serde::{Deserialize, Serialize};

/// Allowed distance of a probability vector's sum from 1.
pub const PROB_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub samples: usize,
    pub brier: f64,
    pub log_loss: f64,
    pub accuracy: f64,
}

impl Metrics {
    fn empty() -> Self {
        Self {
            samples: 0,
            brier: 0.0,
            log_loss: 0.0,
            accuracy: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBin {
    pub class: usize,
    pub bucket_start: f64,
    pub bucket_end: f64,
    pub count: usize,
    pub avg_pred: f64,
    pub actual_rate: f64,
}

/// Checks a probability vector as emitted; nothing is renormalized.
pub fn validate_probs(p: &[f64], classes: usize) -> Result<(), String> {
    if p.len() != classes {
        return Err(format!("expected {classes} probabilities, got {}", p.len()));
    }
    if let Some((idx, v)) = p.iter().enumerate().find(|(_, v)| !v.is_finite() || **v < 0.0) {
        return Err(format!("probability {idx} is {v}"));
    }
    let sum: f64 = p.iter().sum();
    if (sum - 1.0).abs() > PROB_TOLERANCE {
        return Err(format!("probabilities sum to {sum}"));
    }
    Ok(())
}

pub fn validate_point(v: f64) -> Result<(), String> {
    if !v.is_finite() || v < 0.0 {
        return Err(format!("point estimate {v} is not a non-negative number"));
    }
    Ok(())
}

pub fn argmax(p: &[f64]) -> usize {
    let mut best = 0;
    for (idx, v) in p.iter().enumerate() {
        if *v > p[best] {
            best = idx;
        }
    }
    best
}

pub fn evaluate_probs(predictions: &[Vec<f64>], outcomes: &[usize]) -> Metrics {
    if predictions.is_empty() || predictions.len() != outcomes.len() {
        return Metrics::empty();
    }

    let mut brier_sum = 0.0_f64;
    let mut log_loss_sum = 0.0_f64;
    let mut correct = 0usize;

    for (p, outcome) in predictions.iter().zip(outcomes) {
        brier_sum += p
            .iter()
            .enumerate()
            .map(|(c, v)| (v - if c == *outcome { 1.0 } else { 0.0 }).powi(2))
            .sum::<f64>();
        let actual_prob = p.get(*outcome).copied().unwrap_or(0.0).clamp(1e-12, 1.0);
        log_loss_sum += -actual_prob.ln();
        if argmax(p) == *outcome {
            correct += 1;
        }
    }

    let n = predictions.len() as f64;
    Metrics {
        samples: predictions.len(),
        brier: brier_sum / n,
        log_loss: log_loss_sum / n,
        accuracy: correct as f64 / n,
    }
}

pub fn calibration_bins(
    predictions: &[Vec<f64>],
    outcomes: &[usize],
    class: usize,
    bins: usize,
) -> Vec<CalibrationBin> {
    let bins = bins.max(2);
    let mut counts = vec![0usize; bins];
    let mut pred_sum = vec![0.0_f64; bins];
    let mut actual_sum = vec![0.0_f64; bins];

    for (p, outcome) in predictions.iter().zip(outcomes) {
        let class_prob = p.get(class).copied().unwrap_or(0.0).clamp(0.0, 1.0);
        let idx = ((class_prob * bins as f64).floor() as usize).min(bins - 1);
        counts[idx] += 1;
        pred_sum[idx] += class_prob;
        if *outcome == class {
            actual_sum[idx] += 1.0;
        }
    }

    (0..bins)
        .map(|i| {
            let count = counts[i];
            let (avg_pred, actual_rate) = if count > 0 {
                (pred_sum[i] / count as f64, actual_sum[i] / count as f64)
            } else {
                (0.0, 0.0)
            };
            CalibrationBin {
                class,
                bucket_start: i as f64 / bins as f64,
                bucket_end: (i + 1) as f64 / bins as f64,
                count,
                avg_pred,
                actual_rate,
            }
        })
        .collect()
}

/// Expected calibration error, averaged over classes.
pub fn ece(bins_per_class: &[Vec<CalibrationBin>], samples: usize) -> f64 {
    if samples == 0 || bins_per_class.is_empty() {
        return 0.0;
    }
    let n = samples as f64;
    let mut sum = 0.0;
    for rows in bins_per_class {
        for b in rows {
            if b.count == 0 {
                continue;
            }
            let w = b.count as f64 / n;
            sum += w * (b.avg_pred - b.actual_rate).abs();
        }
    }
    sum / bins_per_class.len() as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegressionMetric {
    PoissonDeviance,
    Mae,
    Rmse,
}

impl RegressionMetric {
    pub const ALL: [RegressionMetric; 3] = [
        RegressionMetric::PoissonDeviance,
        RegressionMetric::Mae,
        RegressionMetric::Rmse,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RegressionMetric::PoissonDeviance => "poisson_deviance",
            RegressionMetric::Mae => "mae",
            RegressionMetric::Rmse => "rmse",
        }
    }

    pub fn compute(self, predicted: &[f64], actual: &[f64]) -> f64 {
        match self {
            RegressionMetric::PoissonDeviance => poisson_deviance(predicted, actual),
            RegressionMetric::Mae => mae(predicted, actual),
            RegressionMetric::Rmse => rmse(predicted, actual),
        }
    }
}

/// Mean Poisson deviance; `y ln(y / mu)` is taken as 0 when `y == 0`.
pub fn poisson_deviance(predicted: &[f64], actual: &[f64]) -> f64 {
    if predicted.is_empty() || predicted.len() != actual.len() {
        return 0.0;
    }
    let total: f64 = predicted
        .iter()
        .zip(actual)
        .map(|(mu, y)| {
            let mu = mu.max(1e-12);
            let term = if *y > 0.0 { y * (y / mu).ln() } else { 0.0 };
            2.0 * (term - (y - mu))
        })
        .sum();
    total / predicted.len() as f64
}

pub fn mae(predicted: &[f64], actual: &[f64]) -> f64 {
    if predicted.is_empty() || predicted.len() != actual.len() {
        return 0.0;
    }
    predicted
        .iter()
        .zip(actual)
        .map(|(p, y)| (p - y).abs())
        .sum::<f64>()
        / predicted.len() as f64
}

pub fn rmse(predicted: &[f64], actual: &[f64]) -> f64 {
    if predicted.is_empty() || predicted.len() != actual.len() {
        return 0.0;
    }
    let mse = predicted
        .iter()
        .zip(actual)
        .map(|(p, y)| (p - y).powi(2))
        .sum::<f64>()
        / predicted.len() as f64;
    mse.sqrt()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub mean: f64,
    /// Sample standard deviation; 0 for a single fold.
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub folds: usize,
}

pub fn summarize(values: &[f64]) -> Summary {
    if values.is_empty() {
        return Summary {
            mean: 0.0,
            std: 0.0,
            min: 0.0,
            max: 0.0,
            folds: 0,
        };
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = if values.len() > 1 {
        (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
    } else {
        0.0
    };
    Summary {
        mean,
        std,
        min: values.iter().copied().fold(f64::INFINITY, f64::min),
        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        folds: values.len(),
    }
}
