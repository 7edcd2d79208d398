//! Collaborator contracts injected into the runner.
//!
//! Each trait is one seam for swapping domain data or strategy. The runner
//! never reaches for a concrete implementation; tests plug in small mocks.

use std::collections::BTreeSet;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::baseline::BaselineMetrics;
use crate::cards::{Card, Choice, Deck, Decks};
use crate::config::SessionConfig;
use crate::gates::{Gate, GateFlags};
use crate::state::{MacroResult, MicroState};

/// Source of randomness for every choice that is allowed to be random.
pub trait RandomSource {
    /// Uniform value in `[0, 1)`.
    fn next_f64(&mut self) -> f64;

    /// Uniform index in `0..len`. `len` must be non-zero.
    fn pick_index(&mut self, len: usize) -> usize {
        let idx = (self.next_f64() * len as f64) as usize;
        idx.min(len.saturating_sub(1))
    }

    /// Rewind to the start of the stream. Called on every session `init`.
    fn reset(&mut self) {}
}

/// Seeded generator. Same seed, same stream.
pub struct SeededRng {
    seed: u64,
    rng: StdRng,
}

impl SeededRng {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl RandomSource for SeededRng {
    fn next_f64(&mut self) -> f64 {
        self.rng.r#gen::<f64>()
    }

    fn reset(&mut self) {
        self.rng = StdRng::seed_from_u64(self.seed);
    }
}

/// Everything an L1 selector may look at.
pub struct L1SelectionContext<'a> {
    pub deck: &'a Deck,
    pub asked: &'a [String],
    pub evidence_tags: &'a BTreeSet<String>,
    pub gates_hit_any: &'a GateFlags,
    pub gates_hit_cards_only: &'a GateFlags,
    pub step: u32,
    pub coverage_first: bool,
}

impl L1SelectionContext<'_> {
    pub fn is_asked(&self, card_id: &str) -> bool {
        self.asked.iter().any(|id| id == card_id)
    }

    pub fn unasked(&self) -> impl Iterator<Item = &Card> {
        self.deck.cards().iter().filter(|c| !self.is_asked(&c.id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L1Pick {
    pub card_id: String,
    pub reason: String,
}

pub trait L1Selector {
    /// Next L1 card, or `None` when nothing is eligible.
    fn select(&self, ctx: &L1SelectionContext<'_>, rng: &mut dyn RandomSource) -> Option<L1Pick>;
}

/// Inputs for building the L2 probe plan.
pub struct L2PlanContext<'a> {
    pub deck: &'a Deck,
    pub asked_l2: &'a [String],
    pub current_macro: Option<&'a MacroResult>,
    pub micro: &'a MicroState,
    pub evidence_tags: &'a BTreeSet<String>,
    pub gates_hit_any: &'a GateFlags,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct L2Plan {
    pub plan: Vec<String>,
    pub reason: String,
}

pub trait L2Planner {
    fn plan(&self, ctx: &L2PlanContext<'_>) -> L2Plan;
}

pub trait AnswerTagger {
    /// Raw tags for a committed choice.
    fn tags_for(&self, card: &Card, choice: Choice) -> Vec<String>;
}

/// One tag's pull toward a macro state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroContribution {
    pub tag: String,
    pub macro_state: String,
    pub weight: f64,
}

pub trait MacroEngine {
    fn compute_macro(&self, baseline: &BaselineMetrics, evidence_tags: &[String]) -> MacroResult;

    /// Evidence-only contributions, used for the end-of-session signal summary.
    fn evidence_contributions(&self, scoring_tags: &[String]) -> Vec<MacroContribution>;
}

pub trait MicroEngine {
    fn select_micro(&self, macro_result: &MacroResult, scoring_tags: &[String]) -> MicroState;
}

pub trait TagPipeline {
    fn canonicalize_tags(&self, raw: &[String]) -> Vec<String>;
    /// Signal tags implied by canonical tags. Must not repeat its input.
    fn derive_sig_tags(&self, tags: &[String]) -> Vec<String>;
    /// Subset relevant for scoring; contextual noise removed.
    fn build_scoring_tags(&self, tags: &[String]) -> Vec<String>;
    fn derive_baseline_tags(&self, metrics: &BaselineMetrics) -> Vec<String>;
}

pub trait GateEngine {
    fn allow_list(&self, gate: Gate) -> &[String];

    fn has_gate_match(&self, gate: Gate, tags: &BTreeSet<String>) -> bool {
        self.allow_list(gate).iter().any(|t| tags.contains(t))
    }
}

/// Bundle of everything a runner needs. One bundle per session.
pub struct SessionDeps {
    pub config: SessionConfig,
    pub decks: Arc<Decks>,
    pub rng: Box<dyn RandomSource>,
    pub l1_selector: Box<dyn L1Selector>,
    pub l2_planner: Box<dyn L2Planner>,
    pub answer_tagger: Box<dyn AnswerTagger>,
    pub macro_engine: Box<dyn MacroEngine>,
    pub micro_engine: Box<dyn MicroEngine>,
    pub tag_pipeline: Box<dyn TagPipeline>,
    pub gate_engine: Box<dyn GateEngine>,
}
