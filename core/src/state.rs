use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cards::Layer;
use crate::error::SessionError;
use crate::gates::{Gate, GateFlags};
use crate::signal::SignalQuality;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    L1,
    L2,
    Ended,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::L1 => write!(f, "L1"),
            Self::L2 => write!(f, "L2"),
            Self::Ended => write!(f, "ENDED"),
        }
    }
}

/// Why a session ended. These are expected terminal states, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndedReason {
    GatesClosed,
    MaxL2,
    NoL2Candidates,
    L2PlanCompleted,
    MaxStepsReached,
}

impl EndedReason {
    pub const ALL: [EndedReason; 5] = [
        EndedReason::GatesClosed,
        EndedReason::MaxL2,
        EndedReason::NoL2Candidates,
        EndedReason::L2PlanCompleted,
        EndedReason::MaxStepsReached,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GatesClosed => "gates_closed",
            Self::MaxL2 => "max_l2",
            Self::NoL2Candidates => "no_l2_candidates",
            Self::L2PlanCompleted => "l2_plan_completed",
            Self::MaxStepsReached => "max_steps_reached",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == raw)
    }
}

impl fmt::Display for EndedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndedBy {
    L1,
    L2,
}

impl From<Layer> for EndedBy {
    fn from(layer: Layer) -> Self {
        match layer {
            Layer::L1 => Self::L1,
            Layer::L2 => Self::L2,
        }
    }
}

/// Coarse classification as produced by a macro engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroResult {
    #[serde(rename = "macro")]
    pub macro_state: String,
    /// Per-state scores that led to the decision
    #[serde(default)]
    pub scores: BTreeMap<String, f64>,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MicroSource {
    /// Picked from scoring evidence
    Selected,
    /// Engine's documented default for the macro, evidence was insufficient
    Fallback,
    /// Nothing computed yet
    NotComputed,
}

impl fmt::Display for MicroSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Selected => write!(f, "selected"),
            Self::Fallback => write!(f, "fallback"),
            Self::NotComputed => write!(f, "not_computed"),
        }
    }
}

/// Fine classification. Always written as one consistent tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MicroState {
    pub selected: Option<String>,
    pub source: MicroSource,
    pub reason: String,
    pub top_candidate: Option<String>,
}

impl Default for MicroState {
    fn default() -> Self {
        Self {
            selected: None,
            source: MicroSource::NotComputed,
            reason: "no_answers_yet".to_string(),
            top_candidate: None,
        }
    }
}

impl MicroState {
    /// `selected` source needs a non-empty id; a missing id means `not_computed`.
    pub fn check_invariant(&self) -> Result<(), SessionError> {
        let selected = self.selected.as_deref();
        let consistent = match (selected, self.source) {
            (None, MicroSource::NotComputed) => true,
            (None, _) => false,
            (Some(_), MicroSource::NotComputed) => false,
            (Some(id), _) => !id.trim().is_empty(),
        };
        if consistent {
            Ok(())
        } else {
            Err(SessionError::MicroInvariant {
                selected: self.selected.clone(),
                micro_source: self.source,
            })
        }
    }
}

/// The one card currently awaiting an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCard {
    pub card_id: String,
    pub layer: Layer,
    pub reason: String,
}

/// Materialized view of a session. Owned and mutated only by the runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub step: u32,
    pub phase: Phase,
    pub current_card: Option<PendingCard>,
    /// Asked ids in show order; membership is what matters
    pub asked_l1_ids: Vec<String>,
    pub asked_l2_ids: Vec<String>,
    pub baseline_evidence_tags: Vec<String>,
    pub card_evidence_tags: Vec<String>,
    pub evidence_tags: Vec<String>,
    pub gates_hit_any: GateFlags,
    pub gates_hit_cards_only: GateFlags,
    pub macro_before_cards: Option<MacroResult>,
    pub macro_after_l1: Option<MacroResult>,
    pub macro_after_l2: Option<MacroResult>,
    pub current_macro: Option<MacroResult>,
    pub micro: MicroState,
    pub ended_by: Option<EndedBy>,
    pub ended_reason: Option<EndedReason>,
    pub l2_plan: Option<Vec<String>>,
    pub l2_plan_reason: Option<String>,
    pub l2_plan_cursor: usize,
    pub not_sure_count: u32,
    pub gate_first_hit_step: BTreeMap<Gate, u32>,
    pub gate_hit_card_ids: BTreeMap<Gate, String>,
    pub coverage_first_picks: Vec<String>,
    pub signal_quality: Option<SignalQuality>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            step: 0,
            phase: Phase::L1,
            current_card: None,
            asked_l1_ids: Vec::new(),
            asked_l2_ids: Vec::new(),
            baseline_evidence_tags: Vec::new(),
            card_evidence_tags: Vec::new(),
            evidence_tags: Vec::new(),
            gates_hit_any: GateFlags::default(),
            gates_hit_cards_only: GateFlags::default(),
            macro_before_cards: None,
            macro_after_l1: None,
            macro_after_l2: None,
            current_macro: None,
            micro: MicroState::default(),
            ended_by: None,
            ended_reason: None,
            l2_plan: None,
            l2_plan_reason: None,
            l2_plan_cursor: 0,
            not_sure_count: 0,
            gate_first_hit_step: BTreeMap::new(),
            gate_hit_card_ids: BTreeMap::new(),
            coverage_first_picks: Vec::new(),
            signal_quality: None,
        }
    }
}

impl SessionState {
    pub fn is_ended(&self) -> bool {
        self.phase == Phase::Ended
    }

    pub fn current_card_id(&self) -> Option<&str> {
        self.current_card.as_ref().map(|p| p.card_id.as_str())
    }

    pub fn asked(&self, layer: Layer) -> &[String] {
        match layer {
            Layer::L1 => &self.asked_l1_ids,
            Layer::L2 => &self.asked_l2_ids,
        }
    }

    pub fn asked_count(&self, layer: Layer) -> u32 {
        self.asked(layer).len() as u32
    }

    pub fn has_asked(&self, layer: Layer, card_id: &str) -> bool {
        self.asked(layer).iter().any(|id| id == card_id)
    }

    pub(crate) fn mark_asked(&mut self, layer: Layer, card_id: &str) {
        let asked = match layer {
            Layer::L1 => &mut self.asked_l1_ids,
            Layer::L2 => &mut self.asked_l2_ids,
        };
        if !asked.iter().any(|id| id == card_id) {
            asked.push(card_id.to_string());
        }
    }

    /// All evidence tags with duplicates removed.
    pub fn evidence_set(&self) -> BTreeSet<String> {
        self.evidence_tags.iter().cloned().collect()
    }

    pub fn card_evidence_set(&self) -> BTreeSet<String> {
        self.card_evidence_tags.iter().cloned().collect()
    }

    /// Layer served by the current phase, `None` once ended.
    pub fn active_layer(&self) -> Option<Layer> {
        match self.phase {
            Phase::L1 => Some(Layer::L1),
            Phase::L2 => Some(Layer::L2),
            Phase::Ended => None,
        }
    }
}
