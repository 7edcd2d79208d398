use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Question tier. L1 cards are broad, L2 cards are targeted probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Layer {
    L1,
    L2,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::L1 => write!(f, "L1"),
            Self::L2 => write!(f, "L2"),
        }
    }
}

/// Answer to a card. `NS` is "not sure".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Choice {
    A,
    B,
    NS,
}

impl Choice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::NS => "NS",
        }
    }

    /// Option index for a concrete choice. `NS` has no option.
    pub fn option_index(&self) -> Option<usize> {
        match self {
            Self::A => Some(0),
            Self::B => Some(1),
            Self::NS => None,
        }
    }
}

impl fmt::Display for Choice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardOption {
    pub label: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A single question card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub card_type: String,
    pub options: Vec<CardOption>,
    /// Grouping used by selection strategies (usually the gate a card probes)
    #[serde(default)]
    pub cluster: String,
    /// Free-form strategy hints (e.g. target macro states for L2 probes)
    #[serde(default)]
    pub meta: serde_json::Value,
}

impl Card {
    pub fn option(&self, choice: Choice) -> Option<&CardOption> {
        choice.option_index().and_then(|idx| self.options.get(idx))
    }

    /// String entries of a `meta` array field, empty when absent.
    pub fn meta_strings(&self, key: &str) -> Vec<&str> {
        self.meta
            .get(key)
            .and_then(|v| v.as_array())
            .map(|items| items.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeckError {
    #[error("{layer} deck contains duplicate card id '{card_id}'")]
    DuplicateId { layer: Layer, card_id: String },
    #[error("{layer} card '{card_id}' needs at least two options")]
    TooFewOptions { layer: Layer, card_id: String },
    #[error("invalid deck JSON: {0}")]
    Parse(String),
}

/// Immutable card collection for one layer, indexed by id.
#[derive(Debug, Clone)]
pub struct Deck {
    layer: Layer,
    cards: Vec<Card>,
    by_id: BTreeMap<String, usize>,
}

impl Deck {
    pub fn new(layer: Layer, cards: Vec<Card>) -> Result<Self, DeckError> {
        let mut by_id = BTreeMap::new();
        for (idx, card) in cards.iter().enumerate() {
            if card.options.len() < 2 {
                return Err(DeckError::TooFewOptions {
                    layer,
                    card_id: card.id.clone(),
                });
            }
            if by_id.insert(card.id.clone(), idx).is_some() {
                return Err(DeckError::DuplicateId {
                    layer,
                    card_id: card.id.clone(),
                });
            }
        }
        Ok(Self {
            layer,
            cards,
            by_id,
        })
    }

    pub fn layer(&self) -> Layer {
        self.layer
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    pub fn get(&self, card_id: &str) -> Option<&Card> {
        self.by_id.get(card_id).map(|&idx| &self.cards[idx])
    }

    pub fn contains(&self, card_id: &str) -> bool {
        self.by_id.contains_key(card_id)
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

/// Both decks of a session. Shared read-only between runners.
#[derive(Debug, Clone)]
pub struct Decks {
    pub l1: Deck,
    pub l2: Deck,
}

#[derive(Deserialize)]
struct DecksFile {
    l1: Vec<Card>,
    l2: Vec<Card>,
}

impl Decks {
    pub fn new(l1: Vec<Card>, l2: Vec<Card>) -> Result<Self, DeckError> {
        Ok(Self {
            l1: Deck::new(Layer::L1, l1)?,
            l2: Deck::new(Layer::L2, l2)?,
        })
    }

    /// Parse `{"l1": [...], "l2": [...]}`.
    pub fn from_json(raw: &str) -> Result<Self, DeckError> {
        let file: DecksFile =
            serde_json::from_str(raw).map_err(|e| DeckError::Parse(e.to_string()))?;
        Self::new(file.l1, file.l2)
    }

    pub fn deck(&self, layer: Layer) -> &Deck {
        match layer {
            Layer::L1 => &self.l1,
            Layer::L2 => &self.l2,
        }
    }
}
