use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::deps::MacroEngine;

pub const SIGNAL_TAG_PREFIX: &str = "sig.";
pub const CONTRADICTION_MIN_SCORING_TAGS: usize = 3;
pub const CONTRADICTION_MIN_SIGNAL_SCORE: f64 = 1.0;
pub const TOP_SIGNALS: usize = 3;

/// End-of-session summary of how strongly the evidence points somewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalQuality {
    /// Macro state the evidence alone points to, if any evidence scored
    pub expected_macro: Option<String>,
    /// Margin between the best and second-best evidence score
    pub signal_score: f64,
    pub scoring_tag_count: usize,
    pub signal_tag_count: usize,
    pub eligible_for_contradiction: bool,
    /// Tags pulling hardest toward `expected_macro`
    pub top_signals: Vec<String>,
    /// Evidence points somewhere other than the final macro
    pub has_contradiction: bool,
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Pure function of the final scoring tags and the final macro.
pub fn compute_signal_quality(
    macro_engine: &dyn MacroEngine,
    scoring_tags: &[String],
    final_macro: Option<&str>,
) -> SignalQuality {
    let contributions = macro_engine.evidence_contributions(scoring_tags);

    let mut totals: BTreeMap<&str, f64> = BTreeMap::new();
    for c in &contributions {
        *totals.entry(c.macro_state.as_str()).or_insert(0.0) += c.weight;
    }

    // BTreeMap iteration is name-ordered, so ties resolve to the smaller name.
    let mut ranked: Vec<(&str, f64)> = totals.into_iter().filter(|(_, v)| *v > 0.0).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let expected_macro = ranked.first().map(|(name, _)| name.to_string());
    let signal_score = match ranked.as_slice() {
        [] => 0.0,
        [(_, top)] => round3(*top),
        [(_, top), (_, second), ..] => round3(top - second),
    };

    let mut top: Vec<(&str, f64)> = match &expected_macro {
        Some(name) => contributions
            .iter()
            .filter(|c| &c.macro_state == name && c.weight > 0.0)
            .map(|c| (c.tag.as_str(), c.weight))
            .collect(),
        None => Vec::new(),
    };
    top.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    top.dedup_by(|a, b| a.0 == b.0);
    let top_signals = top
        .into_iter()
        .take(TOP_SIGNALS)
        .map(|(tag, _)| tag.to_string())
        .collect();

    let scoring_tag_count = scoring_tags.len();
    let signal_tag_count = scoring_tags
        .iter()
        .filter(|t| t.starts_with(SIGNAL_TAG_PREFIX))
        .count();
    let eligible_for_contradiction = scoring_tag_count >= CONTRADICTION_MIN_SCORING_TAGS
        && signal_score >= CONTRADICTION_MIN_SIGNAL_SCORE;
    let has_contradiction = eligible_for_contradiction
        && match (&expected_macro, final_macro) {
            (Some(expected), Some(actual)) => expected != actual,
            _ => false,
        };

    SignalQuality {
        expected_macro,
        signal_score,
        scoring_tag_count,
        signal_tag_count,
        eligible_for_contradiction,
        top_signals,
        has_contradiction,
    }
}
