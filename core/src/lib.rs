pub mod baseline;
pub mod cards;
pub mod config;
pub mod deps;
pub mod error;
pub mod events;
pub mod gates;
pub mod reference;
pub mod runner;
pub mod signal;
pub mod state;

pub use baseline::BaselineMetrics;
pub use cards::{Card, CardOption, Choice, Deck, DeckError, Decks, Layer};
pub use config::{SessionConfig, SessionConfigOverrides};
pub use deps::{RandomSource, SeededRng, SessionDeps};
pub use error::{ConfigError, SessionError};
pub use events::{EventLog, EventType, SessionEvent};
pub use gates::{Gate, GateFlags};
pub use runner::{CommitAnswer, CommitOutcome, NextCard, SessionRunner};
pub use signal::SignalQuality;
pub use state::{EndedBy, EndedReason, MacroResult, MicroSource, MicroState, Phase, SessionState};
