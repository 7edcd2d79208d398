use thiserror::Error;

use crate::cards::Layer;
use crate::state::{MicroSource, Phase};

/// Invalid session configuration. Names the offending field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid session config: {field} {reason}")]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: &'static str,
}

impl ConfigError {
    pub fn new(field: &'static str, reason: &'static str) -> Self {
        Self { field, reason }
    }
}

/// Contract violations raised by the runner.
///
/// Expected terminal outcomes (no more cards, gates closed, quota reached)
/// are `EndedReason` values, never errors. Everything here means a caller
/// or collaborator broke the protocol and the run must be aborted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("session has not been initialized")]
    NotInitialized,

    #[error("session already ended")]
    SessionEnded,

    #[error("no card is pending; cannot commit answer for '{card_id}'")]
    NoPendingCard { card_id: String },

    #[error("answer committed for '{got}' but pending card is '{expected}'")]
    PendingCardMismatch { expected: String, got: String },

    #[error("{layer} card '{card_id}' was already asked")]
    CardAlreadyAsked { layer: Layer, card_id: String },

    #[error("card '{card_id}' does not belong to the {layer} deck")]
    CardNotInDeck { layer: Layer, card_id: String },

    #[error("cannot show a {layer} card while in phase {phase}")]
    WrongPhase { layer: Layer, phase: Phase },

    #[error("inconsistent micro state: selected={selected:?} source={micro_source}")]
    MicroInvariant {
        selected: Option<String>,
        micro_source: MicroSource,
    },

    #[error("step cap {cap} exceeded without reaching ENDED")]
    StepCapExceeded { cap: u32 },

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    #[error("invalid baseline metric {field}: {value} is outside 1..=9")]
    InvalidBaseline { field: &'static str, value: u8 },
}

impl SessionError {
    /// Machine-readable code, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotInitialized => codes::NOT_INITIALIZED,
            Self::SessionEnded => codes::SESSION_ENDED,
            Self::NoPendingCard { .. } => codes::NO_PENDING_CARD,
            Self::PendingCardMismatch { .. } => codes::PENDING_CARD_MISMATCH,
            Self::CardAlreadyAsked { .. } => codes::CARD_ALREADY_ASKED,
            Self::CardNotInDeck { .. } => codes::CARD_NOT_IN_DECK,
            Self::WrongPhase { .. } => codes::WRONG_PHASE,
            Self::MicroInvariant { .. } => codes::MICRO_INVARIANT,
            Self::StepCapExceeded { .. } => codes::STEP_CAP_EXCEEDED,
            Self::InvalidConfig(_) => codes::INVALID_CONFIG,
            Self::InvalidBaseline { .. } => codes::INVALID_BASELINE,
        }
    }
}

/// Error codes used across the engine and harness
pub mod codes {
    pub const NOT_INITIALIZED: &str = "not_initialized";
    pub const SESSION_ENDED: &str = "session_ended";
    pub const NO_PENDING_CARD: &str = "no_pending_card";
    pub const PENDING_CARD_MISMATCH: &str = "pending_card_mismatch";
    pub const CARD_ALREADY_ASKED: &str = "card_already_asked";
    pub const CARD_NOT_IN_DECK: &str = "card_not_in_deck";
    pub const WRONG_PHASE: &str = "wrong_phase";
    pub const MICRO_INVARIANT: &str = "micro_invariant";
    pub const STEP_CAP_EXCEEDED: &str = "step_cap_exceeded";
    pub const INVALID_CONFIG: &str = "invalid_config";
    pub const INVALID_BASELINE: &str = "invalid_baseline";
}
