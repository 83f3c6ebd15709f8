use std::fs;
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::features::{CutoffPolicy, FeatureKind, FeatureSetSpec};
use crate::harness::EvaluationConfig;
use crate::logging::LoggingConfig;
use crate::metrics::RegressionMetric;
use crate::models::{self, ModelConfig};
use crate::splitter::SplitConfig;
use crate::targets::Target;

pub const ENV_ARTIFACT_ROOT: &str = "PREMATCH_ARTIFACT_ROOT";
pub const ENV_SEED: &str = "PREMATCH_SEED";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub features: FeatureSetSpec,
    pub target: Target,
    pub cv: SplitConfig,
    #[serde(default)]
    pub evaluation: EvaluationSection,
    #[serde(default)]
    pub models: ModelConfig,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetConfig {
    /// CSV or JSON match rows.
    pub path: PathBuf,
    /// sqlite match log. When set, every command but `ingest` reads from it.
    #[serde(default)]
    pub db: Option<PathBuf>,
    #[serde(default)]
    pub partial_ingestion: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvaluationSection {
    /// Requested in addition to the baselines, which always run.
    pub predictors: Vec<String>,
    pub calibration_bins: usize,
    pub regression_metrics: Vec<RegressionMetric>,
    /// Minutes before kickoff at which features are frozen.
    pub cutoff_lead_minutes: i64,
}

impl Default for EvaluationSection {
    fn default() -> Self {
        Self {
            predictors: Vec::new(),
            calibration_bins: 10,
            regression_metrics: RegressionMetric::ALL.to_vec(),
            cutoff_lead_minutes: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArtifactsConfig {
    pub root: PathBuf,
    pub overwrite: bool,
    pub label: String,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("artifacts"),
            overwrite: false,
            label: "run".to_string(),
        }
    }
}

fn default_seed() -> u64 {
    42
}

impl RunConfig {
    /// Reads `.env`, the TOML file and the environment overrides, then validates.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut cfg = Self::from_toml_str(&raw)?;
        cfg.apply_overrides(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(ConfigError::Parse)
    }

    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(root) = lookup(ENV_ARTIFACT_ROOT).filter(|v| !v.trim().is_empty()) {
            self.artifacts.root = PathBuf::from(root.trim());
        }
        if let Some(raw) = lookup(ENV_SEED) {
            self.seed = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                field: "seed",
                reason: format!("{ENV_SEED}={raw} is not an unsigned integer"),
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dataset.path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "dataset.path",
                reason: "must not be empty".to_string(),
            });
        }
        self.features.validate()?;
        if !self.features.has(FeatureKind::Elo)
            && models::default_registry(self.models).get("elo_rule").is_some()
        {
            return Err(ConfigError::InvalidValue {
                field: "features.active",
                reason: "the elo_rule baseline needs the elo group".to_string(),
            });
        }
        self.cv.validate()?;
        self.models.validate()?;
        self.evaluation_config().validate()?;
        if self.evaluation.cutoff_lead_minutes < 0 {
            return Err(ConfigError::InvalidValue {
                field: "evaluation.cutoff_lead_minutes",
                reason: "a cutoff after kickoff would leak the result".to_string(),
            });
        }
        if self.artifacts.label.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "artifacts.label",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn evaluation_config(&self) -> EvaluationConfig {
        EvaluationConfig {
            target: self.target,
            calibration_bins: self.evaluation.calibration_bins,
            regression_metrics: self.evaluation.regression_metrics.clone(),
            seed: self.seed,
        }
    }

    pub fn cutoff_policy(&self) -> CutoffPolicy {
        CutoffPolicy {
            lead: Duration::minutes(self.evaluation.cutoff_lead_minutes),
        }
    }
}
