//! Structural checks over a finished projection, independent of outcome.
//!
//! Every check runs; failures are collected into one report.

use std::collections::BTreeMap;
use std::fmt;

use cardflow_core::{EndedReason, EventType, Layer, Phase};
use serde::Serialize;

use crate::projection::{EventDigest, StableProjection, event_counts};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// Stable check identifier
    pub check: &'static str,
    pub detail: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.check, self.detail)
    }
}

/// All violations found in one projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvariantReport {
    pub violations: Vec<Violation>,
}

impl InvariantReport {
    pub fn checks(&self) -> Vec<&'static str> {
        self.violations.iter().map(|v| v.check).collect()
    }
}

impl fmt::Display for InvariantReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} invariant violation(s)", self.violations.len())?;
        for violation in &self.violations {
            write!(f, "\n  {violation}")?;
        }
        Ok(())
    }
}

impl std::error::Error for InvariantReport {}

pub fn validate(projection: &StableProjection) -> Result<(), InvariantReport> {
    let violations = check(projection);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(InvariantReport { violations })
    }
}

/// Run every check and return what failed.
pub fn check(projection: &StableProjection) -> Vec<Violation> {
    let mut out = Vec::new();
    let events = &projection.events;
    session_bounds(events, &mut out);
    nothing_after_end(events, &mut out);
    unique_card_shown(events, &mut out);
    answers_match_shown(events, &mut out);
    terminal_state(projection, &mut out);
    phase_monotonic(events, &mut out);
    asked_within_caps(projection, &mut out);
    plan_completed_nonempty(projection, &mut out);
    micro_consistent(projection, &mut out);
    steps_non_decreasing(events, &mut out);
    card_shown_fields(events, &mut out);
    counts_match_events(projection, &mut out);
    out
}

fn fail(out: &mut Vec<Violation>, check: &'static str, detail: impl Into<String>) {
    out.push(Violation {
        check,
        detail: detail.into(),
    });
}

fn positions(events: &[EventDigest], event_type: EventType) -> Vec<usize> {
    events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.event_type == event_type)
        .map(|(i, _)| i)
        .collect()
}

fn session_bounds(events: &[EventDigest], out: &mut Vec<Violation>) {
    const CHECK: &str = "session_bounds";
    let starts = positions(events, EventType::SessionStart);
    let ends = positions(events, EventType::SessionEnd);
    if starts != [0] {
        fail(out, CHECK, format!("session_start expected once at index 0, found at {starts:?}"));
    }
    let last = events.len().saturating_sub(1);
    if events.is_empty() || ends != [last] {
        fail(out, CHECK, format!("session_end expected once at index {last}, found at {ends:?}"));
    }
}

fn nothing_after_end(events: &[EventDigest], out: &mut Vec<Violation>) {
    if let Some(end) = events.iter().position(|e| e.event_type == EventType::SessionEnd) {
        let trailing = events.len() - end - 1;
        if trailing > 0 {
            fail(
                out,
                "nothing_after_end",
                format!("{trailing} event(s) after session_end at index {end}"),
            );
        }
    }
}

fn unique_card_shown(events: &[EventDigest], out: &mut Vec<Violation>) {
    let mut seen: BTreeMap<(u32, &str), usize> = BTreeMap::new();
    for event in events.iter().filter(|e| e.event_type == EventType::CardShown) {
        let Some(card_id) = event.card_id.as_deref() else {
            continue;
        };
        *seen.entry((event.step, card_id)).or_insert(0) += 1;
    }
    for ((step, card_id), n) in seen {
        if n > 1 {
            fail(
                out,
                "unique_card_shown",
                format!("card_shown for '{card_id}' at step {step} appears {n} times"),
            );
        }
    }
}

fn answers_match_shown(events: &[EventDigest], out: &mut Vec<Violation>) {
    const CHECK: &str = "answer_matches_shown";
    for (idx, answer) in events.iter().enumerate() {
        if answer.event_type != EventType::AnswerCommitted {
            continue;
        }
        let Some(card_id) = answer.card_id.as_deref() else {
            fail(out, CHECK, format!("answer_committed at index {idx} has no card_id"));
            continue;
        };
        let shown: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| {
                e.event_type == EventType::CardShown
                    && e.card_id.as_deref() == Some(card_id)
                    && e.layer == answer.layer
            })
            .map(|(i, _)| i)
            .collect();
        match shown.as_slice() {
            [at] if *at < idx => {}
            [at] => fail(
                out,
                CHECK,
                format!("answer for '{card_id}' at index {idx} precedes its card_shown at {at}"),
            ),
            _ => fail(
                out,
                CHECK,
                format!(
                    "answer for '{card_id}' at index {idx} has {} matching card_shown events",
                    shown.len()
                ),
            ),
        }
    }
}

fn terminal_state(projection: &StableProjection, out: &mut Vec<Violation>) {
    const CHECK: &str = "terminal_state";
    let fin = &projection.final_state;
    if fin.phase != Phase::Ended {
        fail(out, CHECK, format!("final phase is {}, expected ENDED", fin.phase));
    }
    match fin.ended_reason.as_deref() {
        None | Some("") => fail(out, CHECK, "ended_reason is missing"),
        Some(reason) if EndedReason::parse(reason).is_none() => {
            fail(out, CHECK, format!("unknown ended_reason '{reason}'"))
        }
        Some(_) => {}
    }
}

fn phase_monotonic(events: &[EventDigest], out: &mut Vec<Violation>) {
    let is_card = |e: &EventDigest, layer: Layer| e.layer == Some(layer) && e.card_id.is_some();
    let Some(first_l2) = events.iter().position(|e| is_card(e, Layer::L2)) else {
        return;
    };
    for (idx, event) in events.iter().enumerate().skip(first_l2 + 1) {
        if is_card(event, Layer::L1) {
            fail(
                out,
                "phase_monotonic",
                format!(
                    "L1 card '{}' at index {idx} after first L2 card at index {first_l2}",
                    event.card_id.as_deref().unwrap_or_default()
                ),
            );
        }
    }
}

fn asked_within_caps(projection: &StableProjection, out: &mut Vec<Violation>) {
    const CHECK: &str = "asked_within_caps";
    let fin = &projection.final_state;
    let config = &projection.config.session;
    if fin.asked_l1_count > config.max_l1 {
        fail(
            out,
            CHECK,
            format!("asked_l1_count {} exceeds max_l1 {}", fin.asked_l1_count, config.max_l1),
        );
    }
    if fin.asked_l2_count > config.max_l2 {
        fail(
            out,
            CHECK,
            format!("asked_l2_count {} exceeds max_l2 {}", fin.asked_l2_count, config.max_l2),
        );
    }
}

fn plan_completed_nonempty(projection: &StableProjection, out: &mut Vec<Violation>) {
    let fin = &projection.final_state;
    if fin.ended_reason.as_deref() == Some(EndedReason::L2PlanCompleted.as_str())
        && fin.asked_l2_count == 0
    {
        fail(
            out,
            "plan_completed_nonempty",
            "l2_plan_completed with no L2 card asked; expected no_l2_candidates",
        );
    }
}

fn micro_consistent(projection: &StableProjection, out: &mut Vec<Violation>) {
    if let Err(e) = projection.final_state.micro.check_invariant() {
        fail(out, "micro_consistent", e.to_string());
    }
}

fn steps_non_decreasing(events: &[EventDigest], out: &mut Vec<Violation>) {
    for (idx, pair) in events.windows(2).enumerate() {
        if pair[1].step < pair[0].step {
            fail(
                out,
                "steps_non_decreasing",
                format!(
                    "step drops from {} to {} at index {}",
                    pair[0].step,
                    pair[1].step,
                    idx + 1
                ),
            );
        }
    }
}

fn card_shown_fields(events: &[EventDigest], out: &mut Vec<Violation>) {
    for (idx, event) in events.iter().enumerate() {
        if event.event_type == EventType::CardShown
            && (event.layer.is_none() || event.card_id.is_none())
        {
            fail(
                out,
                "card_shown_fields",
                format!("card_shown at index {idx} lacks a layer or card_id"),
            );
        }
    }
}

fn counts_match_events(projection: &StableProjection, out: &mut Vec<Violation>) {
    const CHECK: &str = "counts_match_events";
    let fin = &projection.final_state;
    let derived = event_counts(&projection.events);
    let reported = [
        ("asked_l1_count", fin.asked_l1_count, derived.asked_l1),
        ("asked_l2_count", fin.asked_l2_count, derived.asked_l2),
        ("not_sure_count", fin.not_sure_count, derived.not_sure),
        ("state asked_l1", fin.state_counts.asked_l1, derived.asked_l1),
        ("state asked_l2", fin.state_counts.asked_l2, derived.asked_l2),
        ("state not_sure", fin.state_counts.not_sure, derived.not_sure),
        ("asked_l1_ids", fin.asked_l1_ids.len() as u32, derived.asked_l1),
        ("asked_l2_ids", fin.asked_l2_ids.len() as u32, derived.asked_l2),
    ];
    for (name, value, expected) in reported {
        if value != expected {
            fail(
                out,
                CHECK,
                format!("{name} is {value} but events give {expected}"),
            );
        }
    }
}
