use std::path::PathBuf;

use cardflow_core::{DeckError, SessionError, SessionEvent};
use thiserror::Error;

use crate::invariants::InvariantReport;

#[derive(Debug, Error)]
pub enum GoldenError {
    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("serialization failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Deck(#[from] DeckError),

    #[error(transparent)]
    Session(#[from] SessionError),

    /// A session error raised mid-run. Carries the events logged up to the failure.
    #[error("fixture '{fixture_id}' aborted: {source}")]
    Aborted {
        fixture_id: String,
        #[source]
        source: SessionError,
        events: Vec<SessionEvent>,
    },

    #[error("fixture '{id}': {reason}")]
    Fixture { id: String, reason: String },

    #[error(transparent)]
    Invariants(#[from] InvariantReport),
}

impl GoldenError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn fixture(id: &str, reason: impl Into<String>) -> Self {
        Self::Fixture {
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    /// Events logged before the failure, when the run got that far.
    pub fn trail(&self) -> &[SessionEvent] {
        match self {
            Self::Aborted { events, .. } => events,
            _ => &[],
        }
    }
}
