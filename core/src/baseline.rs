use serde::{Deserialize, Serialize};

use crate::error::SessionError;

pub const METRIC_MIN: u8 = 1;
pub const METRIC_MAX: u8 = 9;

/// Self-reported 1-9 scale values captured before any card is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineMetrics {
    pub valence: u8,
    pub energy: u8,
    pub tension: u8,
    pub clarity: u8,
    pub control: u8,
    pub social: u8,
}

impl Default for BaselineMetrics {
    /// Scale midpoint on every axis.
    fn default() -> Self {
        Self {
            valence: 5,
            energy: 5,
            tension: 5,
            clarity: 5,
            control: 5,
            social: 5,
        }
    }
}

impl BaselineMetrics {
    pub fn fields(&self) -> [(&'static str, u8); 6] {
        [
            ("valence", self.valence),
            ("energy", self.energy),
            ("tension", self.tension),
            ("clarity", self.clarity),
            ("control", self.control),
            ("social", self.social),
        ]
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        for (field, value) in self.fields() {
            if !(METRIC_MIN..=METRIC_MAX).contains(&value) {
                return Err(SessionError::InvalidBaseline { field, value });
            }
        }
        Ok(())
    }
}
