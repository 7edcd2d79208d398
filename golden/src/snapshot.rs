use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::GoldenError;
use crate::projection::StableProjection;

/// Diff paths reported per mismatch; the rest are summarized.
pub const MAX_DIFF_PATHS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotStatus {
    Match,
    Missing,
    /// Snapshot was produced from a different fixture or projection shape
    Stale { reason: String },
    Mismatch { paths: Vec<String> },
}

impl SnapshotStatus {
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Match)
    }
}

pub fn snapshot_path(dir: &Path, fixture_id: &str) -> PathBuf {
    dir.join(format!("{fixture_id}.json"))
}

pub fn save(path: &Path, projection: &StableProjection) -> Result<(), GoldenError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| GoldenError::io(parent, e))?;
    }
    let mut body = serde_json::to_string_pretty(projection)?;
    body.push('\n');
    std::fs::write(path, body).map_err(|e| GoldenError::io(path, e))?;
    tracing::info!(path = %path.display(), "snapshot written");
    Ok(())
}

/// `None` when no snapshot exists at `path`.
pub fn load(path: &Path) -> Result<Option<StableProjection>, GoldenError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(GoldenError::io(path, e)),
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| GoldenError::json(path, e))
}

pub fn compare(
    stored: Option<&StableProjection>,
    fresh: &StableProjection,
) -> Result<SnapshotStatus, GoldenError> {
    let Some(stored) = stored else {
        return Ok(SnapshotStatus::Missing);
    };
    if stored.config.snapshot_version != fresh.config.snapshot_version {
        return Ok(SnapshotStatus::Stale {
            reason: format!(
                "snapshot_version {} != {}",
                stored.config.snapshot_version, fresh.config.snapshot_version
            ),
        });
    }
    if stored.config.fixture_hash != fresh.config.fixture_hash {
        return Ok(SnapshotStatus::Stale {
            reason: "fixture changed since the snapshot was written".to_string(),
        });
    }
    if stored.config.config_hash != fresh.config.config_hash {
        return Ok(SnapshotStatus::Stale {
            reason: "resolved session config changed since the snapshot was written".to_string(),
        });
    }

    let paths = diff_paths(&serde_json::to_value(stored)?, &serde_json::to_value(fresh)?);
    if paths.is_empty() {
        Ok(SnapshotStatus::Match)
    } else {
        Ok(SnapshotStatus::Mismatch { paths })
    }
}

/// Paths where `expected` and `actual` differ, capped at `MAX_DIFF_PATHS`.
pub fn diff_paths(expected: &Value, actual: &Value) -> Vec<String> {
    let mut out = Vec::new();
    walk("$", expected, actual, &mut out);
    if out.len() > MAX_DIFF_PATHS {
        let more = out.len() - MAX_DIFF_PATHS;
        out.truncate(MAX_DIFF_PATHS);
        out.push(format!("... and {more} more"));
    }
    out
}

fn walk(path: &str, expected: &Value, actual: &Value, out: &mut Vec<String>) {
    match (expected, actual) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, av) in a {
                match b.get(key) {
                    Some(bv) => walk(&format!("{path}.{key}"), av, bv, out),
                    None => out.push(format!("{path}.{key} (removed)")),
                }
            }
            for key in b.keys().filter(|k| !a.contains_key(*k)) {
                out.push(format!("{path}.{key} (added)"));
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            for (idx, (av, bv)) in a.iter().zip(b).enumerate() {
                walk(&format!("{path}[{idx}]"), av, bv, out);
            }
            if a.len() != b.len() {
                out.push(format!("{path} (length {} -> {})", a.len(), b.len()));
            }
        }
        _ if expected != actual => out.push(path.to_string()),
        _ => {}
    }
}
