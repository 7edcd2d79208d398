use std::sync::LazyLock;

use regex::Regex;

use crate::baseline::BaselineMetrics;
use crate::cards::{Card, Choice};
use crate::deps::{AnswerTagger, TagPipeline};

/// Sentinel tag for a "not sure" answer.
pub const NOT_SURE_TAG: &str = "not_sure";
pub const CONTEXT_TAG_PREFIX: &str = "ctx_";
pub const BASELINE_TAG_PREFIX: &str = "baseline.";

const BAND_LOW_MAX: u8 = 3;
const BAND_HIGH_MIN: u8 = 7;

static SEPARATOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s\-]+").expect("valid separator regex"));
static INVALID_CHARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9_.]").expect("valid tag charset regex"));

/// Spelling variants folded onto canonical tags.
const ALIASES: [(&str, &str); 8] = [
    ("tired", "flat"),
    ("exhausted", "flat"),
    ("anxious", "wired"),
    ("restless", "wired"),
    ("busy", "overloaded"),
    ("lonely", "withdrawn"),
    ("confused", "foggy"),
    ("unsure", NOT_SURE_TAG),
];

/// Canonical tag -> derived signal tag.
const SIGNALS: [(&str, &str); 12] = [
    ("mood_low", "sig.valence.neg"),
    ("mood_high", "sig.valence.pos"),
    ("wired", "sig.arousal.high"),
    ("flat", "sig.arousal.low"),
    ("stuck", "sig.agency.low"),
    ("in_control", "sig.agency.high"),
    ("foggy", "sig.clarity.low"),
    ("focused", "sig.clarity.high"),
    ("withdrawn", "sig.social.low"),
    ("connected", "sig.social.high"),
    ("overloaded", "sig.load.high"),
    ("spacious", "sig.load.low"),
];

/// Baseline axis -> (low band tag, high band tag).
const BASELINE_AXES: [(&str, &str, &str); 6] = [
    ("valence", "mood_low", "mood_high"),
    ("energy", "flat", "wired"),
    ("tension", "spacious", "overloaded"),
    ("clarity", "foggy", "focused"),
    ("control", "stuck", "in_control"),
    ("social", "withdrawn", "connected"),
];

pub fn canonicalize_tag(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_lowercase();
    let joined = SEPARATOR_RE.replace_all(&lowered, "_");
    let cleaned = INVALID_CHARS_RE.replace_all(&joined, "");
    let cleaned = cleaned.trim_matches(|c| c == '_' || c == '.');
    if cleaned.is_empty() {
        return None;
    }
    let tag = ALIASES
        .iter()
        .find(|(alias, _)| *alias == cleaned)
        .map(|(_, canonical)| (*canonical).to_string())
        .unwrap_or_else(|| cleaned.to_string());
    Some(tag)
}

fn signal_for(tag: &str) -> Option<&'static str> {
    if let Some(rest) = tag.strip_prefix(BASELINE_TAG_PREFIX) {
        // baseline.<axis>.<low|high>
        let (axis, band) = rest.split_once('.')?;
        let (_, low, high) = BASELINE_AXES.iter().find(|(name, _, _)| *name == axis)?;
        let source = match band {
            "low" => low,
            "high" => high,
            _ => return None,
        };
        return signal_for(source);
    }
    SIGNALS.iter().find(|(t, _)| *t == tag).map(|(_, s)| *s)
}

/// Tag pipeline backing the bundled decks.
#[derive(Debug, Clone, Default)]
pub struct ReferenceTagPipeline;

impl TagPipeline for ReferenceTagPipeline {
    fn canonicalize_tags(&self, raw: &[String]) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(raw.len());
        for tag in raw.iter().filter_map(|t| canonicalize_tag(t)) {
            if !out.contains(&tag) {
                out.push(tag);
            }
        }
        out
    }

    fn derive_sig_tags(&self, tags: &[String]) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for sig in tags.iter().filter_map(|t| signal_for(t)) {
            if !tags.iter().any(|t| t == sig) && !out.iter().any(|t| t == sig) {
                out.push(sig.to_string());
            }
        }
        out
    }

    fn build_scoring_tags(&self, tags: &[String]) -> Vec<String> {
        tags.iter()
            .filter(|t| {
                !t.starts_with(CONTEXT_TAG_PREFIX)
                    && !t.starts_with(BASELINE_TAG_PREFIX)
                    && t.as_str() != NOT_SURE_TAG
            })
            .cloned()
            .collect()
    }

    fn derive_baseline_tags(&self, metrics: &BaselineMetrics) -> Vec<String> {
        metrics
            .fields()
            .into_iter()
            .filter_map(|(axis, value)| {
                if value <= BAND_LOW_MAX {
                    Some(format!("{BASELINE_TAG_PREFIX}{axis}.low"))
                } else if value >= BAND_HIGH_MIN {
                    Some(format!("{BASELINE_TAG_PREFIX}{axis}.high"))
                } else {
                    None
                }
            })
            .collect()
    }
}

/// Tags of the chosen option, or the not-sure sentinel.
#[derive(Debug, Clone, Default)]
pub struct OptionTagger;

impl AnswerTagger for OptionTagger {
    fn tags_for(&self, card: &Card, choice: Choice) -> Vec<String> {
        match card.option(choice) {
            Some(option) => option.tags.clone(),
            None => vec![NOT_SURE_TAG.to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{NOT_SURE_TAG, OptionTagger, ReferenceTagPipeline, canonicalize_tag};
    use crate::baseline::BaselineMetrics;
    use crate::cards::{Card, CardOption, Choice};
    use crate::deps::{AnswerTagger, TagPipeline};

    fn tags(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn canonicalize_normalizes_case_separators_and_aliases() {
        assert_eq!(canonicalize_tag("  Mood Low ").as_deref(), Some("mood_low"));
        assert_eq!(canonicalize_tag("in-control").as_deref(), Some("in_control"));
        assert_eq!(canonicalize_tag("Tired!").as_deref(), Some("flat"));
        assert_eq!(canonicalize_tag("sig.load.high").as_deref(), Some("sig.load.high"));
        assert_eq!(canonicalize_tag(" -- "), None);
    }

    #[test]
    fn canonicalize_tags_drops_duplicates_in_order() {
        let out = ReferenceTagPipeline.canonicalize_tags(&tags(&["Wired", "anxious", "flat"]));
        assert_eq!(out, tags(&["wired", "flat"]));
    }

    #[test]
    fn derive_maps_card_and_baseline_tags() {
        let out = ReferenceTagPipeline
            .derive_sig_tags(&tags(&["mood_low", "baseline.tension.high", "ctx_work"]));
        assert_eq!(out, tags(&["sig.valence.neg", "sig.load.high"]));
    }

    #[test]
    fn derive_does_not_repeat_input() {
        let out = ReferenceTagPipeline.derive_sig_tags(&tags(&["wired", "sig.arousal.high"]));
        assert!(out.is_empty());
    }

    #[test]
    fn scoring_tags_exclude_context_and_sentinels() {
        let out = ReferenceTagPipeline.build_scoring_tags(&tags(&[
            "ctx_work",
            "baseline.social.low",
            NOT_SURE_TAG,
            "stuck",
            "sig.agency.low",
        ]));
        assert_eq!(out, tags(&["stuck", "sig.agency.low"]));
    }

    #[test]
    fn baseline_tags_only_for_extreme_bands() {
        let metrics = BaselineMetrics {
            valence: 2,
            energy: 5,
            tension: 8,
            clarity: 4,
            control: 7,
            social: 3,
        };
        assert_eq!(
            ReferenceTagPipeline.derive_baseline_tags(&metrics),
            tags(&[
                "baseline.valence.low",
                "baseline.tension.high",
                "baseline.control.high",
                "baseline.social.low",
            ])
        );
    }

    #[test]
    fn option_tagger_uses_sentinel_for_not_sure() {
        let card = Card {
            id: "c".to_string(),
            title: "t".to_string(),
            card_type: "binary".to_string(),
            options: vec![
                CardOption {
                    label: "a".to_string(),
                    tags: tags(&["wired"]),
                },
                CardOption {
                    label: "b".to_string(),
                    tags: tags(&["flat"]),
                },
            ],
            cluster: "arousal".to_string(),
            meta: serde_json::Value::Null,
        };
        assert_eq!(OptionTagger.tags_for(&card, Choice::B), tags(&["flat"]));
        assert_eq!(OptionTagger.tags_for(&card, Choice::NS), tags(&[NOT_SURE_TAG]));
    }
}
