use std::collections::BTreeMap;
use std::fmt;

use cardflow_core::{Card, Choice, RandomSource};

use crate::fixture::Fixture;

/// Answer-sampling behavior named by `SessionConfig::profile`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerProfile {
    Balanced,
    LeanA,
    LeanB,
    AlwaysA,
    AlwaysB,
}

impl AnswerProfile {
    pub const ALL: [AnswerProfile; 5] = [
        AnswerProfile::Balanced,
        AnswerProfile::LeanA,
        AnswerProfile::LeanB,
        AnswerProfile::AlwaysA,
        AnswerProfile::AlwaysB,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Balanced => "balanced",
            Self::LeanA => "lean_a",
            Self::LeanB => "lean_b",
            Self::AlwaysA => "always_a",
            Self::AlwaysB => "always_b",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == raw)
    }

    /// Probability of answering A once "not sure" was ruled out.
    fn a_probability(&self) -> Option<f64> {
        match self {
            Self::Balanced => Some(0.5),
            Self::LeanA => Some(0.75),
            Self::LeanB => Some(0.25),
            Self::AlwaysA | Self::AlwaysB => None,
        }
    }
}

impl fmt::Display for AnswerProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chooses answers for a fixture run.
///
/// Forced answers never touch the random source. Every sampled answer rolls
/// once for "not sure" and, for the mixed profiles, once more for A vs B.
#[derive(Debug, Clone)]
pub struct AnswerSampler {
    profile: AnswerProfile,
    not_sure_rate: f64,
    forced: BTreeMap<String, Choice>,
}

impl AnswerSampler {
    pub fn new(profile: AnswerProfile, not_sure_rate: f64, forced: BTreeMap<String, Choice>) -> Self {
        Self {
            profile,
            not_sure_rate,
            forced,
        }
    }

    /// Sampler for `fixture`, using the profile and rate of its effective config.
    pub fn for_fixture(fixture: &Fixture, profile: &str, not_sure_rate: f64) -> Option<Self> {
        let profile = AnswerProfile::parse(profile)?;
        Some(Self::new(
            profile,
            not_sure_rate,
            fixture.answer_policy.forced_answers.clone(),
        ))
    }

    pub fn profile(&self) -> AnswerProfile {
        self.profile
    }

    pub fn choose(&self, card: &Card, rng: &mut dyn RandomSource) -> Choice {
        if let Some(choice) = self.forced.get(&card.id) {
            return *choice;
        }
        if rng.next_f64() < self.not_sure_rate {
            return Choice::NS;
        }
        match (self.profile, self.profile.a_probability()) {
            (AnswerProfile::AlwaysA, _) => Choice::A,
            (AnswerProfile::AlwaysB, _) => Choice::B,
            (_, Some(p)) if rng.next_f64() < p => Choice::A,
            _ => Choice::B,
        }
    }
}
