use std::collections::BTreeMap;

use crate::deps::GateEngine;
use crate::gates::Gate;

/// Gate allow-lists over the reference signal tags.
pub const GATE_ALLOW_LISTS: [(Gate, &[&str]); 6] = [
    (Gate::Valence, &["sig.valence.neg", "sig.valence.pos"]),
    (Gate::Arousal, &["sig.arousal.high", "sig.arousal.low"]),
    (Gate::Agency, &["sig.agency.low", "sig.agency.high"]),
    (Gate::Clarity, &["sig.clarity.low", "sig.clarity.high"]),
    (Gate::Social, &["sig.social.low", "sig.social.high"]),
    (Gate::Load, &["sig.load.high", "sig.load.low"]),
];

#[derive(Debug, Clone)]
pub struct AllowListGateEngine {
    lists: BTreeMap<Gate, Vec<String>>,
}

impl Default for AllowListGateEngine {
    fn default() -> Self {
        Self::new(
            GATE_ALLOW_LISTS
                .iter()
                .map(|(gate, tags)| (*gate, tags.iter().map(|t| t.to_string()).collect())),
        )
    }
}

impl AllowListGateEngine {
    pub fn new(lists: impl IntoIterator<Item = (Gate, Vec<String>)>) -> Self {
        Self {
            lists: lists.into_iter().collect(),
        }
    }
}

impl GateEngine for AllowListGateEngine {
    fn allow_list(&self, gate: Gate) -> &[String] {
        self.lists.get(&gate).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::AllowListGateEngine;
    use crate::deps::GateEngine;
    use crate::gates::Gate;

    #[test]
    fn every_gate_has_an_allow_list() {
        let engine = AllowListGateEngine::default();
        for gate in Gate::ALL {
            assert!(!engine.allow_list(gate).is_empty(), "{gate} has no allow-list");
        }
    }

    #[test]
    fn match_requires_allow_listed_tag() {
        let engine = AllowListGateEngine::default();
        let tags: BTreeSet<String> = ["wired", "sig.load.low"].iter().map(|t| t.to_string()).collect();
        assert!(engine.has_gate_match(Gate::Load, &tags));
        assert!(!engine.has_gate_match(Gate::Arousal, &tags));
    }

    #[test]
    fn missing_list_never_matches() {
        let engine = AllowListGateEngine::new(Vec::new());
        let tags: BTreeSet<String> = ["sig.load.low".to_string()].into_iter().collect();
        assert!(!engine.has_gate_match(Gate::Load, &tags));
    }
}
