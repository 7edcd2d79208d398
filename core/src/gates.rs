use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Evidence gates. A gate is satisfied once a matching tag has been observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    Valence,
    Arousal,
    Agency,
    Clarity,
    Social,
    Load,
}

impl Gate {
    pub const ALL: [Gate; 6] = [
        Gate::Valence,
        Gate::Arousal,
        Gate::Agency,
        Gate::Clarity,
        Gate::Social,
        Gate::Load,
    ];

    /// Gates that must be confirmed by card answers before an early stop.
    pub const CORE: [Gate; 4] = [Gate::Valence, Gate::Arousal, Gate::Agency, Gate::Clarity];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valence => "valence",
            Self::Arousal => "arousal",
            Self::Agency => "agency",
            Self::Clarity => "clarity",
            Self::Social => "social",
            Self::Load => "load",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.as_str() == raw)
    }
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monotone gate map: entries go false -> true and never back.
///
/// There is deliberately no way to clear a gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GateFlags(BTreeMap<Gate, bool>);

impl Default for GateFlags {
    fn default() -> Self {
        Self(Gate::ALL.into_iter().map(|g| (g, false)).collect())
    }
}

impl GateFlags {
    pub fn is_open(&self, gate: Gate) -> bool {
        self.0.get(&gate).copied().unwrap_or(false)
    }

    /// Mark a gate as hit. Returns true only when it was not hit before.
    pub fn hit(&mut self, gate: Gate) -> bool {
        let slot = self.0.entry(gate).or_insert(false);
        if *slot {
            return false;
        }
        *slot = true;
        true
    }

    pub fn all(&self, gates: &[Gate]) -> bool {
        gates.iter().all(|g| self.is_open(*g))
    }

    pub fn open_gates(&self) -> Vec<Gate> {
        Gate::ALL.into_iter().filter(|g| self.is_open(*g)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Gate, bool)> + '_ {
        Gate::ALL.into_iter().map(|g| (g, self.is_open(g)))
    }
}

#[cfg(test)]
mod tests {
    use super::{Gate, GateFlags};

    #[test]
    fn hit_reports_only_first_transition() {
        let mut flags = GateFlags::default();
        assert!(!flags.is_open(Gate::Load));
        assert!(flags.hit(Gate::Load));
        assert!(!flags.hit(Gate::Load));
        assert!(flags.is_open(Gate::Load));
    }

    #[test]
    fn serializes_as_named_map() {
        let mut flags = GateFlags::default();
        flags.hit(Gate::Social);
        let value = serde_json::to_value(&flags).unwrap();
        assert_eq!(value["social"], true);
        assert_eq!(value["valence"], false);
        assert_eq!(value.as_object().unwrap().len(), 6);
    }

    #[test]
    fn all_checks_subset() {
        let mut flags = GateFlags::default();
        for gate in Gate::CORE {
            flags.hit(gate);
        }
        assert!(flags.all(&Gate::CORE));
        assert!(!flags.all(&Gate::ALL));
        assert_eq!(flags.open_gates().len(), 4);
    }

    #[test]
    fn parse_round_trips_names() {
        for gate in Gate::ALL {
            assert_eq!(Gate::parse(gate.as_str()), Some(gate));
        }
        assert_eq!(Gate::parse("mood"), None);
    }
}
