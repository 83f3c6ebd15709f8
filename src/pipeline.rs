use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::artifacts::{
    ArtifactStore, ArtifactVersion, KIND_EVALUATION, KIND_FEATURES, KIND_MODEL, VersionRequest,
};
use crate::config::RunConfig;
use crate::error::{ConfigError, Error, OverwriteRefusedError};
use crate::features::{FeatureEngine, FeatureSetSpec, FeatureVector};
use crate::harness::{self, EvaluationReport};
use crate::ingest::{self, IngestReport};
use crate::match_db;
use crate::match_store::{MatchStore, StoreSnapshot};
use crate::models;
use crate::predictor::TrainingSet;
use crate::splitter::{self, SplitConfig};
use crate::targets::Target;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureArtifact {
    pub dataset_version: String,
    pub feature_set: FeatureSetSpec,
    pub feature_set_fingerprint: String,
    pub cutoff_lead_minutes: i64,
    pub vectors: Vec<FeatureVector>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationArtifact {
    pub dataset_version: String,
    pub feature_set: FeatureSetSpec,
    pub feature_set_fingerprint: String,
    pub split: SplitConfig,
    pub report: EvaluationReport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub predictor: String,
    pub target: Target,
    pub dataset_version: String,
    pub feature_set: FeatureSetSpec,
    pub trained_on: usize,
    pub trained_through: DateTime<Utc>,
    pub state: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct IngestSummary {
    pub report: IngestReport,
    pub inserted: usize,
    pub dataset_version: String,
}

fn artifact_store(cfg: &RunConfig) -> ArtifactStore {
    ArtifactStore::new(&cfg.artifacts.root)
}

/// Builds the match store from the sqlite log when configured, else from
/// the row file.
pub fn load_store(cfg: &RunConfig) -> Result<MatchStore> {
    if let Some(db) = &cfg.dataset.db {
        let conn = match_db::open_db(db)?;
        let store = match_db::load_store(&conn)
            .with_context(|| format!("load match log {}", db.display()))?;
        info!(matches = store.len(), db = %db.display(), "match log loaded");
        return Ok(store);
    }
    let rows = ingest::read_rows(&cfg.dataset.path)?;
    let mut store = MatchStore::new();
    ingest::ingest_rows(&mut store, &rows, cfg.dataset.partial_ingestion)
        .with_context(|| format!("ingest {}", cfg.dataset.path.display()))?;
    Ok(store)
}

/// Appends the row file to the sqlite log. Nothing is written unless every
/// row is accepted or partial ingestion is on.
pub fn ingest_into_db(cfg: &RunConfig) -> Result<IngestSummary> {
    let Some(db) = &cfg.dataset.db else {
        return Err(ConfigError::InvalidValue {
            field: "dataset.db",
            reason: "ingest needs a sqlite path".to_string(),
        }
        .into());
    };
    let mut conn = match_db::open_db(db)?;
    let mut store = match_db::load_store(&conn)?;
    let existing = store.len();

    let rows = ingest::read_rows(&cfg.dataset.path)?;
    let report = ingest::ingest_rows(&mut store, &rows, cfg.dataset.partial_ingestion)
        .with_context(|| format!("ingest {}", cfg.dataset.path.display()))?;
    let source = cfg.dataset.path.display().to_string();
    let inserted = match_db::persist_store(&mut conn, &store, existing, &source, &report)?;
    let dataset_version = store.dataset_version()?;
    info!(inserted, dataset_version = %dataset_version, "match log updated");
    Ok(IngestSummary {
        report,
        inserted,
        dataset_version,
    })
}

fn engine_for<'s>(cfg: &RunConfig, snapshot: &'s StoreSnapshot) -> Result<FeatureEngine<'s>> {
    FeatureEngine::new(snapshot, cfg.features.clone()).context("prepare feature engine")
}

pub fn generate_features(cfg: &RunConfig) -> Result<ArtifactVersion> {
    let store = load_store(cfg)?;
    let snapshot = store.snapshot()?;
    let engine = engine_for(cfg, &snapshot)?;
    let vectors = engine
        .compute_all(cfg.cutoff_policy())
        .context("compute feature vectors")?;
    let gaps: usize = vectors.iter().map(|v| v.gaps.len()).sum();
    info!(vectors = vectors.len(), gaps, "feature vectors computed");

    let artifact = FeatureArtifact {
        dataset_version: snapshot.dataset_version().to_string(),
        feature_set: cfg.features.clone(),
        feature_set_fingerprint: cfg.features.fingerprint()?,
        cutoff_lead_minutes: cfg.evaluation.cutoff_lead_minutes,
        vectors,
    };
    let version = artifact_store(cfg)
        .save(
            KIND_FEATURES,
            &artifact,
            VersionRequest {
                label: &cfg.artifacts.label,
                dataset_version: snapshot.dataset_version(),
            },
            cfg.artifacts.overwrite,
        )
        .context("save feature artifact")?;
    Ok(version)
}

pub fn evaluate(cfg: &RunConfig) -> Result<EvaluationArtifact> {
    let store = load_store(cfg)?;
    let snapshot = store.snapshot()?;
    evaluate_snapshot(cfg, &snapshot)
}

/// Features, folds and scores for one snapshot; writes nothing.
pub fn evaluate_snapshot(cfg: &RunConfig, snapshot: &StoreSnapshot) -> Result<EvaluationArtifact> {
    cfg.validate()?;
    let registry = models::default_registry(cfg.models);
    let predictors = registry
        .select(&cfg.evaluation.predictors)
        .map_err(Error::from)?;

    let engine = engine_for(cfg, snapshot)?;
    let vectors = engine
        .compute_all(cfg.cutoff_policy())
        .context("compute feature vectors")?;
    let samples = harness::labeled_timeline(snapshot, &vectors)?;
    let kickoffs: Vec<DateTime<Utc>> = samples.iter().map(|s| s.features.kickoff).collect();
    let folds = splitter::split(&kickoffs, &cfg.cv).context("split labeled timeline")?;
    info!(
        labeled = samples.len(),
        folds = folds.len(),
        target = %cfg.target.name(),
        "evaluation starting"
    );

    let names = cfg.features.feature_names();
    let report = harness::evaluate(&samples, &folds, &predictors, &names, &cfg.evaluation_config())
        .context("evaluate folds")?;
    for (predictor, by_metric) in &report.aggregate {
        if let Some(primary) = by_metric
            .get("log_loss")
            .or_else(|| by_metric.get("poisson_deviance"))
            .or_else(|| by_metric.values().next())
        {
            info!(
                predictor = %predictor,
                mean = primary.mean,
                std = primary.std,
                folds = primary.folds,
                "aggregate"
            );
        }
    }

    Ok(EvaluationArtifact {
        dataset_version: snapshot.dataset_version().to_string(),
        feature_set: cfg.features.clone(),
        feature_set_fingerprint: cfg.features.fingerprint()?,
        split: cfg.cv,
        report,
    })
}

pub fn run_evaluation(cfg: &RunConfig) -> Result<(ArtifactVersion, EvaluationArtifact)> {
    let artifact = evaluate(cfg)?;
    let version = artifact_store(cfg)
        .save(
            KIND_EVALUATION,
            &artifact,
            VersionRequest {
                label: &cfg.artifacts.label,
                dataset_version: &artifact.dataset_version,
            },
            cfg.artifacts.overwrite,
        )
        .context("save evaluation artifact")?;
    Ok((version, artifact))
}

/// Fits baselines (or the one named) on every labeled match and stores one
/// model artifact per predictor under `{label}.{predictor}`.
pub fn train_baseline(cfg: &RunConfig, only: Option<&str>) -> Result<Vec<ArtifactVersion>> {
    cfg.validate()?;
    let registry = models::default_registry(cfg.models);
    let predictors = match only {
        Some(name) => {
            let p = registry
                .get(name)
                .ok_or_else(|| Error::from(ConfigError::UnknownPredictor(name.to_string())))?;
            vec![p]
        }
        None => registry.select(&[]).map_err(Error::from)?,
    };

    let store = load_store(cfg)?;
    let snapshot = store.snapshot()?;
    let engine = engine_for(cfg, &snapshot)?;
    let vectors = engine
        .compute_all(cfg.cutoff_policy())
        .context("compute feature vectors")?;
    let samples = harness::labeled_timeline(&snapshot, &vectors)?;
    let Some(last) = samples.last() else {
        return Err(Error::from(ConfigError::InvalidValue {
            field: "dataset.path",
            reason: "no finished matches to train on".to_string(),
        })
        .into());
    };
    let trained_through = last.features.kickoff;
    let train = TrainingSet::new(
        cfg.target,
        cfg.features.feature_names(),
        samples.iter().map(|s| s.features).collect(),
        samples.iter().map(|s| s.score).collect(),
        cfg.seed,
    );

    let mut fitted = Vec::with_capacity(predictors.len());
    for predictor in &predictors {
        let model = predictor
            .fit(&train)
            .with_context(|| format!("fit {}", predictor.name()))?;
        fitted.push(ModelArtifact {
            predictor: predictor.name().to_string(),
            target: cfg.target,
            dataset_version: snapshot.dataset_version().to_string(),
            feature_set: cfg.features.clone(),
            trained_on: train.len(),
            trained_through,
            state: model
                .state()
                .with_context(|| format!("encode {} state", predictor.name()))?,
        });
    }

    let artifacts = artifact_store(cfg);
    let labels: Vec<String> = fitted
        .iter()
        .map(|m| format!("{}.{}", cfg.artifacts.label, m.predictor))
        .collect();
    if !cfg.artifacts.overwrite {
        // refuse before anything is written
        let existing = artifacts.versions(KIND_MODEL)?;
        for label in &labels {
            let tag = VersionRequest {
                label,
                dataset_version: snapshot.dataset_version(),
            }
            .tag();
            if existing.contains(&tag) {
                return Err(Error::from(OverwriteRefusedError {
                    kind: KIND_MODEL.to_string(),
                    version_tag: tag,
                }))
                .context("save trained baselines");
            }
        }
    }

    let mut versions = Vec::with_capacity(fitted.len());
    for (model, label) in fitted.iter().zip(&labels) {
        let version = artifacts
            .save(
                KIND_MODEL,
                model,
                VersionRequest {
                    label,
                    dataset_version: snapshot.dataset_version(),
                },
                cfg.artifacts.overwrite,
            )
            .with_context(|| format!("save model {}", model.predictor))?;
        versions.push(version);
    }
    Ok(versions)
}
