use chrono::{DateTime, Utc};
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("malformed row {row}: field `{field}` {reason}")]
    Malformed {
        row: usize,
        field: &'static str,
        reason: String,
    },

    #[error("duplicate match record: {match_id}")]
    DuplicateRecord { match_id: String },

    #[error("invalid supersession of {target} by {match_id}: {reason}")]
    InvalidSupersession {
        match_id: String,
        target: String,
        reason: String,
    },

    #[error("unknown match: {match_id}")]
    UnknownMatch { match_id: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LeakageError {
    #[error("match {match_id}: cutoff {cutoff} is after kickoff {kickoff}")]
    CutoffAfterKickoff {
        match_id: String,
        cutoff: DateTime<Utc>,
        kickoff: DateTime<Utc>,
    },

    #[error(
        "feature `{feature}` for match {match_id} would read {input_id} at {input_time}, not before cutoff {cutoff}"
    )]
    FutureInput {
        feature: String,
        match_id: String,
        input_id: String,
        input_time: DateTime<Utc>,
        cutoff: DateTime<Utc>,
    },

    #[error("replay of {match_id} arrived after {previous}, out of chronological order")]
    ReplayOutOfOrder { match_id: String, previous: String },

    #[error("fold {fold_id}: train ends at {train_end}, test starts at {test_start}")]
    FoldOverlap {
        fold_id: usize,
        train_end: DateTime<Utc>,
        test_start: DateTime<Utc>,
    },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error(
        "timeline of {available} labeled matches cannot hold one fold (needs {min_train} train + {gap} gap + {horizon} test)"
    )]
    InsufficientSpan {
        available: usize,
        min_train: usize,
        gap: usize,
        horizon: usize,
    },

    #[error("unknown predictor `{0}`")]
    UnknownPredictor(String),

    #[error("predictor registry has no baseline left{}", .0.as_deref().map(|name| format!(" after removing `{name}`")).unwrap_or_default())]
    NoBaseline(Option<String>),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("predictor `{predictor}` fold {fold_id} match {match_id}: {reason}")]
pub struct CalibrationInputError {
    pub predictor: String,
    pub fold_id: usize,
    pub match_id: String,
    pub reason: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("artifact {kind}/{version_tag} already exists; pass an explicit override or a new tag")]
pub struct OverwriteRefusedError {
    pub kind: String,
    pub version_tag: String,
}

/// A rolling-window feature that cannot be filled from the visible history.
/// Non-fatal: the engine records it as a gap next to a null value.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("team {team_id}: {feature} needs {needed} prior fixtures, {available} visible")]
pub struct InsufficientHistory {
    pub feature: String,
    pub team_id: String,
    pub needed: usize,
    pub available: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Data,
    Leakage,
    Config,
    CalibrationInput,
    OverwriteRefused,
    Other,
}

impl ErrorKind {
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::Other => 1,
            ErrorKind::Data => 2,
            ErrorKind::Leakage => 3,
            ErrorKind::Config => 4,
            ErrorKind::CalibrationInput => 5,
            ErrorKind::OverwriteRefused => 6,
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Leakage(#[from] LeakageError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    CalibrationInput(#[from] CalibrationInputError),

    #[error(transparent)]
    OverwriteRefused(#[from] OverwriteRefusedError),

    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("model `{predictor}` failed: {reason}")]
    Model { predictor: String, reason: String },

    #[error("artifact {kind}/{version_tag} does not match its recorded fingerprint")]
    FingerprintMismatch { kind: String, version_tag: String },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Data(_) => ErrorKind::Data,
            Error::Leakage(_) => ErrorKind::Leakage,
            Error::Config(_) => ErrorKind::Config,
            Error::CalibrationInput(_) => ErrorKind::CalibrationInput,
            Error::OverwriteRefused(_) => ErrorKind::OverwriteRefused,
            Error::Io { .. }
            | Error::Json(_)
            | Error::Model { .. }
            | Error::FingerprintMismatch { .. } => ErrorKind::Other,
        }
    }

    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

/// Finds the most specific taxonomy kind anywhere in an anyhow chain.
pub fn classify(err: &anyhow::Error) -> ErrorKind {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<Error>() {
            let kind = e.kind();
            if kind != ErrorKind::Other {
                return kind;
            }
        }
        if cause.downcast_ref::<DataError>().is_some() {
            return ErrorKind::Data;
        }
        if cause.downcast_ref::<LeakageError>().is_some() {
            return ErrorKind::Leakage;
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return ErrorKind::Config;
        }
        if cause.downcast_ref::<CalibrationInputError>().is_some() {
            return ErrorKind::CalibrationInput;
        }
        if cause.downcast_ref::<OverwriteRefusedError>().is_some() {
            return ErrorKind::OverwriteRefused;
        }
    }
    ErrorKind::Other
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::{Error, ErrorKind, OverwriteRefusedError, classify};

    #[test]
    fn classify_sees_through_context() {
        let err: anyhow::Error = Err::<(), _>(Error::from(OverwriteRefusedError {
            kind: "model".to_string(),
            version_tag: "v1-abc".to_string(),
        }))
        .context("save trained baseline")
        .unwrap_err();
        assert_eq!(classify(&err), ErrorKind::OverwriteRefused);
        assert_eq!(classify(&err).exit_code(), 6);
        assert!(format!("{err:#}").contains("model/v1-abc"));
    }

    #[test]
    fn unknown_errors_are_other() {
        let err = anyhow::anyhow!("boom");
        assert_eq!(classify(&err), ErrorKind::Other);
        assert_eq!(ErrorKind::Other.exit_code(), 1);
    }
}
