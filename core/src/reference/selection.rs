use crate::cards::Card;
use crate::deps::{L1Pick, L1Selector, L1SelectionContext, L2Plan, L2PlanContext, L2Planner, RandomSource};
use crate::gates::Gate;
use crate::runner::COVERAGE_FIRST_REASON_PREFIX;

pub const RANDOM_REASON: &str = "random";
pub const FORCED_ORDER_REASON: &str = "forced_order";

fn pick<'a>(cards: &[&'a Card], rng: &mut dyn RandomSource) -> Option<&'a Card> {
    if cards.is_empty() {
        return None;
    }
    Some(cards[rng.pick_index(cards.len())])
}

/// Prefers cards probing a gate no card has confirmed yet, then falls back
/// to a uniform pick over the rest of the deck.
#[derive(Debug, Clone, Default)]
pub struct CoverageSelector;

impl L1Selector for CoverageSelector {
    fn select(&self, ctx: &L1SelectionContext<'_>, rng: &mut dyn RandomSource) -> Option<L1Pick> {
        let unasked: Vec<&Card> = ctx.unasked().collect();

        if ctx.coverage_first {
            let uncovered: Vec<&Card> = unasked
                .iter()
                .copied()
                .filter(|card| {
                    Gate::parse(&card.cluster)
                        .is_some_and(|gate| !ctx.gates_hit_cards_only.is_open(gate))
                })
                .collect();
            if let Some(card) = pick(&uncovered, rng) {
                return Some(L1Pick {
                    card_id: card.id.clone(),
                    reason: format!("{COVERAGE_FIRST_REASON_PREFIX}:{}", card.cluster),
                });
            }
        }

        pick(&unasked, rng).map(|card| L1Pick {
            card_id: card.id.clone(),
            reason: RANDOM_REASON.to_string(),
        })
    }
}

/// Serves a fixed id order first, then hands off to another selector.
///
/// Ids are passed through unchecked so an unknown id surfaces as a runner
/// error instead of being skipped silently.
pub struct ForcedOrderSelector {
    order: Vec<String>,
    fallback: Box<dyn L1Selector>,
}

impl ForcedOrderSelector {
    pub fn new(order: Vec<String>, fallback: Box<dyn L1Selector>) -> Self {
        Self { order, fallback }
    }
}

impl L1Selector for ForcedOrderSelector {
    fn select(&self, ctx: &L1SelectionContext<'_>, rng: &mut dyn RandomSource) -> Option<L1Pick> {
        if let Some(id) = self.order.iter().find(|id| !ctx.is_asked(id)) {
            return Some(L1Pick {
                card_id: id.clone(),
                reason: FORCED_ORDER_REASON.to_string(),
            });
        }
        self.fallback.select(ctx, rng)
    }
}

/// Plans L2 probes for the current macro, micro candidate first.
#[derive(Debug, Clone, Default)]
pub struct MacroProbePlanner;

impl L2Planner for MacroProbePlanner {
    fn plan(&self, ctx: &L2PlanContext<'_>) -> L2Plan {
        let Some(current) = ctx.current_macro else {
            return L2Plan {
                plan: Vec::new(),
                reason: "no_macro".to_string(),
            };
        };
        let macro_state = current.macro_state.as_str();
        let top_micro = ctx.micro.top_candidate.as_deref();

        let (mut first, mut rest): (Vec<&Card>, Vec<&Card>) = (Vec::new(), Vec::new());
        for card in ctx.deck.cards() {
            if ctx.asked_l2.iter().any(|id| *id == card.id) {
                continue;
            }
            if !card.meta_strings("macros").contains(&macro_state) {
                continue;
            }
            let targets_micro = top_micro.is_some_and(|m| card.meta_strings("micros").contains(&m));
            if targets_micro {
                first.push(card);
            } else {
                rest.push(card);
            }
        }

        let reason = match top_micro {
            Some(micro) if !first.is_empty() => format!("macro:{macro_state}+micro:{micro}"),
            _ => format!("macro:{macro_state}"),
        };
        L2Plan {
            plan: first.into_iter().chain(rest).map(|c| c.id.clone()).collect(),
            reason,
        }
    }
}
