use std::fs;
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ConfigError, Error, OverwriteRefusedError, Result};
use crate::fingerprint;

pub const KIND_FEATURES: &str = "features";
pub const KIND_EVALUATION: &str = "evaluation";
pub const KIND_MODEL: &str = "model";

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactVersion {
    pub kind: String,
    pub version_tag: String,
    pub content_fingerprint: String,
    pub dataset_version: String,
    pub created_at: DateTime<Utc>,
    /// Tag this entry was displaced from by an explicit override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_from: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: ArtifactVersion,
    payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy)]
pub struct VersionRequest<'a> {
    pub label: &'a str,
    pub dataset_version: &'a str,
}

impl VersionRequest<'_> {
    pub fn tag(&self) -> String {
        format!("{}-{}", self.label, fingerprint::short(self.dataset_version))
    }
}

/// Artifacts live at `{root}/{kind}/{version_tag}.json`. Saved entries are
/// never edited in place; `load` is the only read path.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn kind_dir(&self, kind: &str) -> Result<PathBuf> {
        check_name("artifacts.kind", kind)?;
        Ok(self.root.join(kind))
    }

    fn entry_path(&self, kind: &str, tag: &str) -> Result<PathBuf> {
        Ok(self.kind_dir(kind)?.join(format!("{tag}.json")))
    }

    pub fn save<T: Serialize + ?Sized>(
        &self,
        kind: &str,
        payload: &T,
        request: VersionRequest<'_>,
        overwrite: bool,
    ) -> Result<ArtifactVersion> {
        check_name("artifacts.label", request.label)?;
        let dir = self.kind_dir(kind)?;
        fs::create_dir_all(&dir).map_err(|e| Error::io(dir.display().to_string(), e))?;

        let payload = serde_json::to_value(payload)?;
        let tag = request.tag();
        let version = ArtifactVersion {
            kind: kind.to_string(),
            version_tag: tag.clone(),
            content_fingerprint: fingerprint::json_fingerprint(&payload)?,
            dataset_version: request.dataset_version.to_string(),
            created_at: Utc::now(),
            archived_from: None,
        };
        let path = dir.join(format!("{tag}.json"));
        let envelope = Envelope {
            version: version.clone(),
            payload,
        };

        if path.exists() {
            if !overwrite {
                return Err(refused(kind, &tag));
            }
            self.archive(&dir, &path)?;
            let tmp = write_tmp(&dir, &envelope)?;
            fs::rename(&tmp, &path).map_err(|e| Error::io(path.display().to_string(), e))?;
            info!(kind, tag = %tag, "artifact overridden");
            return Ok(version);
        }

        let tmp = write_tmp(&dir, &envelope)?;
        let linked = fs::hard_link(&tmp, &path);
        let _ = fs::remove_file(&tmp);
        match linked {
            Ok(()) => {}
            Err(e) if e.kind() == IoErrorKind::AlreadyExists => return Err(refused(kind, &tag)),
            Err(e) => return Err(Error::io(path.display().to_string(), e)),
        }
        info!(
            kind,
            tag = %tag,
            fingerprint = fingerprint::short(&version.content_fingerprint),
            "artifact saved"
        );
        Ok(version)
    }

    /// Re-keys the current entry under `{tag}~{fingerprint}` before an override.
    fn archive(&self, dir: &Path, path: &Path) -> Result<()> {
        let mut old = read_envelope(path)?;
        let from = old.version.version_tag.clone();
        let archived_tag = format!("{from}~{}", fingerprint::short(&old.version.content_fingerprint));
        let archived_path = dir.join(format!("{archived_tag}.json"));
        if archived_path.exists() {
            // identical content was archived by an earlier override
            return Ok(());
        }
        old.version.version_tag = archived_tag.clone();
        old.version.archived_from = Some(from);
        let tmp = write_tmp(dir, &old)?;
        let linked = fs::hard_link(&tmp, &archived_path);
        let _ = fs::remove_file(&tmp);
        linked.map_err(|e| Error::io(archived_path.display().to_string(), e))?;
        warn!(kind = %old.version.kind, archived = %archived_tag, "previous artifact archived");
        Ok(())
    }

    pub fn load<T: DeserializeOwned>(&self, kind: &str, tag: &str) -> Result<(ArtifactVersion, T)> {
        let path = self.entry_path(kind, tag)?;
        let envelope = read_envelope(&path)?;
        let actual = fingerprint::json_fingerprint(&envelope.payload)?;
        if actual != envelope.version.content_fingerprint
            || envelope.version.kind != kind
            || envelope.version.version_tag != tag
        {
            return Err(Error::FingerprintMismatch {
                kind: kind.to_string(),
                version_tag: tag.to_string(),
            });
        }
        let payload = serde_json::from_value(envelope.payload)?;
        Ok((envelope.version, payload))
    }

    /// Every stored tag of `kind`, archived ones included, sorted.
    pub fn versions(&self, kind: &str) -> Result<Vec<String>> {
        let dir = self.kind_dir(kind)?;
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(dir.display().to_string(), e)),
        };
        let mut tags = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(dir.display().to_string(), e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            if let Some(tag) = name.strip_suffix(".json") {
                tags.push(tag.to_string());
            }
        }
        tags.sort();
        Ok(tags)
    }
}

fn refused(kind: &str, tag: &str) -> Error {
    OverwriteRefusedError {
        kind: kind.to_string(),
        version_tag: tag.to_string(),
    }
    .into()
}

fn check_name(field: &'static str, name: &str) -> Result<(), ConfigError> {
    let ok = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !ok {
        return Err(ConfigError::InvalidValue {
            field,
            reason: format!("`{name}` must be non-empty ASCII letters, digits, '-', '_' or '.'"),
        });
    }
    Ok(())
}

fn read_envelope(path: &Path) -> Result<Envelope> {
    let raw = fs::read(path).map_err(|e| Error::io(path.display().to_string(), e))?;
    Ok(serde_json::from_slice(&raw)?)
}

fn write_tmp(dir: &Path, envelope: &Envelope) -> Result<PathBuf> {
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let tmp = dir.join(format!(".{}-{seq}.tmp", std::process::id()));
    let bytes = serde_json::to_vec_pretty(envelope)?;
    let mut file = fs::File::create(&tmp).map_err(|e| Error::io(tmp.display().to_string(), e))?;
    file.write_all(&bytes)
        .and_then(|_| file.sync_all())
        .map_err(|e| Error::io(tmp.display().to_string(), e))?;
    Ok(tmp)
}
