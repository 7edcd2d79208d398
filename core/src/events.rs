use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cards::Layer;

/// Kinds of session events. The set is closed: the golden tooling relies on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SessionStart,
    BaselineInjected,
    CardShown,
    AnswerCommitted,
    EvidenceAdded,
    GateHit,
    MacroUpdated,
    MicroSelected,
    ExpectedMacroComputed,
    SessionEnd,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionStart => "session_start",
            Self::BaselineInjected => "baseline_injected",
            Self::CardShown => "card_shown",
            Self::AnswerCommitted => "answer_committed",
            Self::EvidenceAdded => "evidence_added",
            Self::GateHit => "gate_hit",
            Self::MacroUpdated => "macro_updated",
            Self::MicroSelected => "micro_selected",
            Self::ExpectedMacroComputed => "expected_macro_computed",
            Self::SessionEnd => "session_end",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single event in a session. Events are immutable and append-only;
/// their order is part of the contract and is never re-sorted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Runner step at the time the event was appended
    pub step: u32,
    /// Layer of the card involved, if any
    pub layer: Option<Layer>,
    pub card_id: Option<String>,
    /// Event payload; structure depends on event_type
    pub payload: serde_json::Value,
    /// Wall-clock time. Telemetry only, excluded from every projection.
    pub timestamp: DateTime<Utc>,
}

/// Append-only event sequence owned by a runner.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<SessionEvent>,
}

impl EventLog {
    pub fn append(
        &mut self,
        event_type: EventType,
        step: u32,
        layer: Option<Layer>,
        card_id: Option<&str>,
        payload: serde_json::Value,
    ) {
        self.events.push(SessionEvent {
            event_type,
            step,
            layer,
            card_id: card_id.map(str::to_string),
            payload,
            timestamp: Utc::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn as_slice(&self) -> &[SessionEvent] {
        &self.events
    }

    /// Events appended at or after `mark`.
    pub fn since(&self, mark: usize) -> Vec<SessionEvent> {
        self.events.get(mark..).map(<[_]>::to_vec).unwrap_or_default()
    }

    pub fn last(&self) -> Option<&SessionEvent> {
        self.events.last()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
