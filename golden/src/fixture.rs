use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use cardflow_core::{BaselineMetrics, Choice, SessionConfig, SessionConfigOverrides, SessionError};
use serde::{Deserialize, Serialize};

use crate::error::GoldenError;
use crate::hash::content_hash;

/// How answers are chosen for cards the fixture does not force.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnswerPolicy {
    /// Sampling profile; falls back to the session config's profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    /// Card id -> answer, applied before any sampling
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub forced_answers: BTreeMap<String, Choice>,
}

/// One golden session: seed, baseline and answer policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Fixture {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub seed: u64,
    #[serde(default)]
    pub baseline_metrics: BaselineMetrics,
    /// Extra tags injected with the baseline evidence
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub flow_config_overrides: SessionConfigOverrides,
    #[serde(default)]
    pub answer_policy: AnswerPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forced_l1_card_order: Option<Vec<String>>,
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Self, GoldenError> {
        let raw = std::fs::read_to_string(path).map_err(|e| GoldenError::io(path, e))?;
        let fixture: Self = serde_json::from_str(&raw).map_err(|e| GoldenError::json(path, e))?;
        if fixture.id.trim().is_empty() {
            return Err(GoldenError::fixture("", format!("{} has an empty id", path.display())));
        }
        Ok(fixture)
    }

    /// Every `*.json` fixture in `dir`, sorted by id. Ids must be unique.
    pub fn load_dir(dir: &Path) -> Result<Vec<Self>, GoldenError> {
        let entries = std::fs::read_dir(dir).map_err(|e| GoldenError::io(dir, e))?;
        let mut fixtures = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| GoldenError::io(dir, e))?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                fixtures.push(Self::load(&path)?);
            }
        }
        fixtures.sort_by(|a, b| a.id.cmp(&b.id));

        let mut seen = BTreeSet::new();
        for fixture in &fixtures {
            if !seen.insert(fixture.id.as_str()) {
                return Err(GoldenError::fixture(&fixture.id, "duplicate fixture id"));
            }
        }
        tracing::debug!(dir = %dir.display(), count = fixtures.len(), "fixtures loaded");
        Ok(fixtures)
    }

    /// Default config with this fixture's overrides applied.
    pub fn session_config(&self) -> Result<SessionConfig, GoldenError> {
        let mut overrides = self.flow_config_overrides.clone();
        if let Some(profile) = &self.answer_policy.profile {
            overrides.profile = Some(profile.clone());
        }
        SessionConfig::default()
            .with_overrides(&overrides)
            .map_err(|e| GoldenError::Session(SessionError::from(e)))
    }

    /// Content hash of the fixture as written. Snapshots are stale once it changes.
    pub fn fixture_hash(&self) -> Result<String, GoldenError> {
        Ok(content_hash(self)?)
    }
}
