use std::collections::{BTreeMap, BTreeSet};

use crate::baseline::BaselineMetrics;
use crate::deps::{MacroContribution, MacroEngine, MicroEngine};
use crate::state::{MacroResult, MicroSource, MicroState};

pub const DEPLETED: &str = "depleted";
pub const OVERWHELMED: &str = "overwhelmed";
pub const ENERGIZED: &str = "energized";
pub const STEADY: &str = "steady";

/// Tie-break order for macro states.
pub const MACRO_STATES: [&str; 4] = [STEADY, DEPLETED, OVERWHELMED, ENERGIZED];

const STEADY_PRIOR: f64 = 0.2;

const EVIDENCE_WEIGHTS: [(&str, &[(&str, f64)]); 12] = [
    ("sig.valence.neg", &[(DEPLETED, 1.0), (OVERWHELMED, 1.0)]),
    ("sig.valence.pos", &[(STEADY, 1.5), (ENERGIZED, 1.0)]),
    ("sig.arousal.high", &[(OVERWHELMED, 1.0), (ENERGIZED, 1.5)]),
    ("sig.arousal.low", &[(DEPLETED, 1.5), (STEADY, 0.5)]),
    ("sig.agency.low", &[(DEPLETED, 1.0), (OVERWHELMED, 0.5)]),
    ("sig.agency.high", &[(STEADY, 1.0), (ENERGIZED, 0.5)]),
    ("sig.clarity.low", &[(OVERWHELMED, 1.0)]),
    ("sig.clarity.high", &[(STEADY, 1.0)]),
    ("sig.social.low", &[(DEPLETED, 0.5)]),
    ("sig.social.high", &[(ENERGIZED, 0.5)]),
    ("sig.load.high", &[(OVERWHELMED, 1.5)]),
    ("sig.load.low", &[(STEADY, 0.5)]),
];

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn centered(value: u8) -> f64 {
    f64::from(value) - 5.0
}

fn baseline_scores(metrics: &BaselineMetrics) -> BTreeMap<&'static str, f64> {
    let v = centered(metrics.valence);
    let e = centered(metrics.energy);
    let t = centered(metrics.tension);
    let c = centered(metrics.clarity);
    let k = centered(metrics.control);
    let s = centered(metrics.social);

    BTreeMap::from([
        (
            DEPLETED,
            (-v).max(0.0) * 0.25 + (-e).max(0.0) * 0.25 + (-k).max(0.0) * 0.15,
        ),
        (
            OVERWHELMED,
            t.max(0.0) * 0.3 + (-c).max(0.0) * 0.15 + (-v).max(0.0) * 0.1,
        ),
        (
            ENERGIZED,
            e.max(0.0) * 0.25 + v.max(0.0) * 0.15 + s.max(0.0) * 0.1,
        ),
        (
            STEADY,
            STEADY_PRIOR + v.max(0.0) * 0.2 + (-t).max(0.0) * 0.2 + c.max(0.0) * 0.15,
        ),
    ])
}

/// Weighted-table macro engine: baseline prior plus evidence weights.
#[derive(Debug, Clone, Default)]
pub struct WeightedMacroEngine;

impl MacroEngine for WeightedMacroEngine {
    fn compute_macro(&self, baseline: &BaselineMetrics, evidence_tags: &[String]) -> MacroResult {
        let mut scores = baseline_scores(baseline);
        for c in self.evidence_contributions(evidence_tags) {
            if let Some(score) = scores.get_mut(c.macro_state.as_str()) {
                *score += c.weight;
            }
        }

        let mut ranked: Vec<(&str, f64)> = MACRO_STATES
            .iter()
            .map(|name| (*name, scores.get(name).copied().unwrap_or(0.0)))
            .collect();
        // Stable sort keeps MACRO_STATES order for ties.
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let (top_name, top) = ranked[0];
        let second = ranked.get(1).map(|(_, v)| *v).unwrap_or(0.0);
        let confidence = if top > 0.0 { round3((top - second) / top) } else { 0.0 };

        MacroResult {
            macro_state: top_name.to_string(),
            scores: scores
                .into_iter()
                .map(|(name, v)| (name.to_string(), round3(v)))
                .collect(),
            confidence,
        }
    }

    fn evidence_contributions(&self, scoring_tags: &[String]) -> Vec<MacroContribution> {
        let unique: BTreeSet<&str> = scoring_tags.iter().map(String::as_str).collect();
        let mut out = Vec::new();
        for (tag, weights) in EVIDENCE_WEIGHTS {
            if !unique.contains(tag) {
                continue;
            }
            for (macro_state, weight) in weights {
                out.push(MacroContribution {
                    tag: tag.to_string(),
                    macro_state: macro_state.to_string(),
                    weight: *weight,
                });
            }
        }
        out
    }
}

/// Scoring-tag support needed before a micro counts as selected.
pub const MIN_MICRO_SUPPORT: usize = 2;

const MICRO_CANDIDATES: [(&str, &str, &[(&str, &str)]); 4] = [
    (
        DEPLETED,
        "depleted_general",
        &[
            ("drained", "sig.arousal.low"),
            ("stuck", "sig.agency.low"),
            ("lonely", "sig.social.low"),
        ],
    ),
    (
        OVERWHELMED,
        "overwhelmed_general",
        &[
            ("overloaded", "sig.load.high"),
            ("scattered", "sig.clarity.low"),
            ("tense", "sig.arousal.high"),
        ],
    ),
    (
        ENERGIZED,
        "energized_general",
        &[
            ("driven", "sig.agency.high"),
            ("social_spark", "sig.social.high"),
            ("buzzing", "sig.arousal.high"),
        ],
    ),
    (
        STEADY,
        "steady_general",
        &[
            ("calm", "sig.load.low"),
            ("clear", "sig.clarity.high"),
            ("content", "sig.valence.pos"),
        ],
    ),
];

/// Picks the micro whose key signal appears most often in scoring evidence.
///
/// Support is counted over the raw scoring list, so the same signal seen on
/// two answers counts twice. Below `MIN_MICRO_SUPPORT` the macro's general
/// micro is used as a documented fallback.
#[derive(Debug, Clone, Default)]
pub struct SupportMicroEngine;

impl MicroEngine for SupportMicroEngine {
    fn select_micro(&self, macro_result: &MacroResult, scoring_tags: &[String]) -> MicroState {
        if scoring_tags.is_empty() {
            return MicroState {
                selected: None,
                source: MicroSource::NotComputed,
                reason: "no_scoring_tags".to_string(),
                top_candidate: None,
            };
        }
        let Some((_, fallback, candidates)) = MICRO_CANDIDATES
            .iter()
            .find(|(m, _, _)| *m == macro_result.macro_state)
        else {
            return MicroState {
                selected: None,
                source: MicroSource::NotComputed,
                reason: format!("unknown_macro:{}", macro_result.macro_state),
                top_candidate: None,
            };
        };

        let mut best: Option<(&str, usize)> = None;
        for &(micro, signal) in candidates.iter() {
            let support = scoring_tags.iter().filter(|t| t.as_str() == signal).count();
            if support > 0 && best.is_none_or(|(_, s)| support > s) {
                best = Some((micro, support));
            }
        }

        match best {
            Some((micro, support)) if support >= MIN_MICRO_SUPPORT => MicroState {
                selected: Some(micro.to_string()),
                source: MicroSource::Selected,
                reason: format!("support:{support}"),
                top_candidate: Some(micro.to_string()),
            },
            Some((micro, support)) => MicroState {
                selected: Some(fallback.to_string()),
                source: MicroSource::Fallback,
                reason: format!("insufficient_support:{support}"),
                top_candidate: Some(micro.to_string()),
            },
            None => MicroState {
                selected: Some(fallback.to_string()),
                source: MicroSource::Fallback,
                reason: "no_candidate_match".to_string(),
                top_candidate: None,
            },
        }
    }
}
