//! Stable projection: the comparison-ready rendering of a finished run.
//!
//! Event order is preserved exactly. Timestamps are dropped, tag arrays are
//! sorted and deduplicated, and the headline counts are recomputed from the
//! event stream so that state/event drift shows up as a diff.

use std::collections::BTreeSet;

use cardflow_core::{
    Choice, EndedBy, EventType, GateFlags, Layer, MacroResult, MicroState, Phase, SessionConfig,
    SessionEvent, SessionState, SignalQuality,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::GoldenError;
use crate::hash::content_hash;
use crate::run::RunOutput;

/// Bump whenever the projection shape changes; older snapshots become stale.
pub const PROJECTION_VERSION: &str = "golden.v1";

/// Payload keys whose string arrays are order-insensitive.
const SORTED_ARRAY_KEYS: [&str; 2] = ["tags", "raw"];
const VOLATILE_KEYS: [&str; 1] = ["timestamp"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionConfig {
    #[serde(flatten)]
    pub session: SessionConfig,
    pub seed: u64,
    pub fixture_hash: String,
    pub snapshot_version: String,
    pub config_hash: String,
}

/// Counts that can be derived from events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub asked_l1: u32,
    pub asked_l2: u32,
    pub not_sure: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalProjection {
    pub phase: Phase,
    /// Kept as text so a stored snapshot with an unknown reason still loads
    pub ended_reason: Option<String>,
    pub ended_by: Option<EndedBy>,
    /// Recomputed from events
    pub asked_l1_count: u32,
    pub asked_l2_count: u32,
    pub not_sure_count: u32,
    /// The runner's own counters, kept to be checked against the event counts
    pub state_counts: Counts,
    pub asked_l1_ids: Vec<String>,
    pub asked_l2_ids: Vec<String>,
    pub macro_before_cards: Option<MacroResult>,
    pub macro_after_l1: Option<MacroResult>,
    pub macro_after_l2: Option<MacroResult>,
    pub final_macro: Option<MacroResult>,
    pub micro: MicroState,
    pub gates_hit_any: GateFlags,
    pub gates_hit_cards_only: GateFlags,
    pub baseline_evidence_tags: Vec<String>,
    pub card_evidence_tags: Vec<String>,
    pub evidence_tags: Vec<String>,
    pub l2_plan: Option<Vec<String>>,
    pub coverage_first_picks: Vec<String>,
    pub signal_quality: Option<SignalQuality>,
}

/// One event minus its timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDigest {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub step: u32,
    pub layer: Option<Layer>,
    pub card_id: Option<String>,
    pub payload: Value,
}

impl EventDigest {
    pub fn from_event(event: &SessionEvent) -> Self {
        Self {
            event_type: event.event_type,
            step: event.step,
            layer: event.layer,
            card_id: event.card_id.clone(),
            payload: normalize_payload(&event.payload),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StableProjection {
    pub config: ProjectionConfig,
    #[serde(rename = "final")]
    pub final_state: FinalProjection,
    pub events: Vec<EventDigest>,
}

impl StableProjection {
    pub fn from_run(run: &RunOutput) -> Result<Self, GoldenError> {
        let events: Vec<EventDigest> = run.events.iter().map(EventDigest::from_event).collect();
        let counts = event_counts(&events);
        Ok(Self {
            config: ProjectionConfig {
                session: run.config.clone(),
                seed: run.seed,
                fixture_hash: run.fixture_hash.clone(),
                snapshot_version: PROJECTION_VERSION.to_string(),
                config_hash: content_hash(&run.config)?,
            },
            final_state: project_state(&run.state, counts),
            events,
        })
    }

    /// Hash of the whole projection; equal hashes mean identical runs.
    pub fn projection_hash(&self) -> Result<String, GoldenError> {
        Ok(content_hash(self)?)
    }

    /// The last `n` events, oldest first.
    pub fn tail(&self, n: usize) -> &[EventDigest] {
        let start = self.events.len().saturating_sub(n);
        &self.events[start..]
    }
}

fn project_state(state: &SessionState, counts: Counts) -> FinalProjection {
    FinalProjection {
        phase: state.phase,
        ended_reason: state.ended_reason.map(|r| r.as_str().to_string()),
        ended_by: state.ended_by,
        asked_l1_count: counts.asked_l1,
        asked_l2_count: counts.asked_l2,
        not_sure_count: counts.not_sure,
        state_counts: Counts {
            asked_l1: state.asked_count(Layer::L1),
            asked_l2: state.asked_count(Layer::L2),
            not_sure: state.not_sure_count,
        },
        asked_l1_ids: state.asked_l1_ids.clone(),
        asked_l2_ids: state.asked_l2_ids.clone(),
        macro_before_cards: state.macro_before_cards.clone(),
        macro_after_l1: state.macro_after_l1.clone(),
        macro_after_l2: state.macro_after_l2.clone(),
        final_macro: state.current_macro.clone(),
        micro: state.micro.clone(),
        gates_hit_any: state.gates_hit_any.clone(),
        gates_hit_cards_only: state.gates_hit_cards_only.clone(),
        baseline_evidence_tags: sorted_unique(&state.baseline_evidence_tags),
        card_evidence_tags: sorted_unique(&state.card_evidence_tags),
        evidence_tags: sorted_unique(&state.evidence_tags),
        l2_plan: state.l2_plan.clone(),
        coverage_first_picks: state.coverage_first_picks.clone(),
        signal_quality: state.signal_quality.clone(),
    }
}

/// Shown cards per layer and "not sure" answers, counted from the event stream.
pub fn event_counts(events: &[EventDigest]) -> Counts {
    let mut counts = Counts::default();
    for event in events {
        match (event.event_type, event.layer) {
            (EventType::CardShown, Some(Layer::L1)) => counts.asked_l1 += 1,
            (EventType::CardShown, Some(Layer::L2)) => counts.asked_l2 += 1,
            (EventType::AnswerCommitted, _)
                if event.payload.get("choice").and_then(Value::as_str)
                    == Some(Choice::NS.as_str()) =>
            {
                counts.not_sure += 1
            }
            _ => {}
        }
    }
    counts
}

fn sorted_unique(tags: &[String]) -> Vec<String> {
    tags.iter()
        .cloned()
        .collect::<BTreeSet<String>>()
        .into_iter()
        .collect()
}

/// Strip volatile keys and sort tag arrays, recursively. Other arrays keep their order.
pub fn normalize_payload(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, entry) in map {
                if VOLATILE_KEYS.contains(&key.as_str()) {
                    continue;
                }
                let normalized = match entry {
                    Value::Array(items)
                        if SORTED_ARRAY_KEYS.contains(&key.as_str())
                            && items.iter().all(Value::is_string) =>
                    {
                        let unique: BTreeSet<&str> = items.iter().filter_map(Value::as_str).collect();
                        Value::Array(unique.into_iter().map(Value::from).collect())
                    }
                    _ => normalize_payload(entry),
                };
                out.insert(key.clone(), normalized);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize_payload).collect()),
        _ => value.clone(),
    }
}
