//! Bundled domain pack: decks, tag vocabulary, gates and classifiers.
//!
//! Everything here plugs into the runner through the traits in
//! [`crate::deps`]; swap any piece without touching the session protocol.

mod classify;
mod gates;
mod selection;
mod tags;

use std::sync::Arc;

pub use classify::{
    DEPLETED, ENERGIZED, MACRO_STATES, MIN_MICRO_SUPPORT, OVERWHELMED, STEADY, SupportMicroEngine,
    WeightedMacroEngine,
};
pub use gates::{AllowListGateEngine, GATE_ALLOW_LISTS};
pub use selection::{
    CoverageSelector, FORCED_ORDER_REASON, ForcedOrderSelector, MacroProbePlanner, RANDOM_REASON,
};
pub use tags::{
    BASELINE_TAG_PREFIX, CONTEXT_TAG_PREFIX, NOT_SURE_TAG, OptionTagger, ReferenceTagPipeline,
    canonicalize_tag,
};

use crate::cards::{DeckError, Decks};
use crate::config::SessionConfig;
use crate::deps::{L1Selector, SeededRng, SessionDeps};

const DECKS_JSON: &str = include_str!("../../data/decks.json");

/// Parse the bundled decks.
pub fn decks() -> Result<Arc<Decks>, DeckError> {
    Decks::from_json(DECKS_JSON).map(Arc::new)
}

/// Collaborator bundle over the bundled pack with a seeded random source.
pub fn reference_deps(
    config: SessionConfig,
    decks: Arc<Decks>,
    seed: u64,
    forced_l1_order: Option<Vec<String>>,
) -> SessionDeps {
    let l1_selector: Box<dyn L1Selector> = match forced_l1_order {
        Some(order) if !order.is_empty() => {
            Box::new(ForcedOrderSelector::new(order, Box::new(CoverageSelector)))
        }
        _ => Box::new(CoverageSelector),
    };
    SessionDeps {
        config,
        decks,
        rng: Box::new(SeededRng::new(seed)),
        l1_selector,
        l2_planner: Box::new(MacroProbePlanner),
        answer_tagger: Box::new(OptionTagger),
        macro_engine: Box::new(WeightedMacroEngine),
        micro_engine: Box::new(SupportMicroEngine),
        tag_pipeline: Box::new(ReferenceTagPipeline),
        gate_engine: Box::new(AllowListGateEngine::default()),
    }
}
