//! Session runner: the pull-based card protocol.
//!
//! Callers alternate `get_next_card` and `commit_answer` until the session
//! reports ENDED. The pending card in `SessionState::current_card` is the
//! suspension point and is at most one card wide.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::baseline::BaselineMetrics;
use crate::cards::{Card, Choice, Decks, Layer};
use crate::config::SessionConfig;
use crate::deps::{L1SelectionContext, L2PlanContext, RandomSource, SessionDeps};
use crate::error::SessionError;
use crate::events::{EventLog, EventType, SessionEvent};
use crate::gates::Gate;
use crate::signal::compute_signal_quality;
use crate::state::{EndedBy, EndedReason, MicroState, PendingCard, Phase, SessionState};

/// Prefix of L1 selection reasons that count as coverage-first picks.
pub const COVERAGE_FIRST_REASON_PREFIX: &str = "coverage_first";

/// A card handed to the caller, with the reason it was chosen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NextCard {
    pub layer: Layer,
    pub card: Card,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAnswer {
    pub card_id: String,
    pub choice: Choice,
}

/// Result of one commit: events appended by this call and the state after it.
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub events: Vec<SessionEvent>,
    pub state: SessionState,
    pub next_card: Option<NextCard>,
    pub ended: bool,
}

#[derive(Debug, Clone, Copy)]
enum EvidenceSource<'a> {
    Baseline,
    Card { layer: Layer, card_id: &'a str },
}

impl EvidenceSource<'_> {
    fn label(&self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Card { .. } => "card",
        }
    }

    fn layer(&self) -> Option<Layer> {
        match self {
            Self::Baseline => None,
            Self::Card { layer, .. } => Some(*layer),
        }
    }

    fn card_id(&self) -> Option<&str> {
        match self {
            Self::Baseline => None,
            Self::Card { card_id, .. } => Some(*card_id),
        }
    }
}

/// Drives exactly one session. Never share a runner between sessions.
pub struct SessionRunner {
    deps: SessionDeps,
    baseline: Option<BaselineMetrics>,
    state: SessionState,
    log: EventLog,
}

impl SessionRunner {
    pub fn new(deps: SessionDeps) -> Result<Self, SessionError> {
        deps.config.validate()?;
        Ok(Self {
            deps,
            baseline: None,
            state: SessionState::default(),
            log: EventLog::default(),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.deps.config
    }

    pub fn decks(&self) -> &Arc<Decks> {
        &self.deps.decks
    }

    /// Read-only view of the live state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Owned copy of the state, detached from the runner.
    pub fn snapshot(&self) -> SessionState {
        self.state.clone()
    }

    pub fn events(&self) -> &[SessionEvent] {
        self.log.as_slice()
    }

    /// The injected random source, shared with harness-side answer sampling.
    pub fn rng(&mut self) -> &mut dyn RandomSource {
        self.deps.rng.as_mut()
    }

    /// Reset and start a session. Returns the full event log so far.
    pub fn init(
        &mut self,
        baseline: BaselineMetrics,
        fixture_tags: &[String],
    ) -> Result<Vec<SessionEvent>, SessionError> {
        baseline.validate()?;
        self.state = SessionState::default();
        self.log.clear();
        self.deps.rng.reset();
        self.baseline = Some(baseline);

        let macro_before = self.deps.macro_engine.compute_macro(&baseline, &[]);
        self.state.macro_before_cards = Some(macro_before.clone());
        self.state.current_macro = Some(macro_before.clone());

        let injection_enabled = self.deps.config.baseline_injection_enabled;
        self.log.append(
            EventType::SessionStart,
            self.state.step,
            None,
            None,
            json!({
                "config": self.deps.config,
                "baseline_metrics": baseline,
                "macro_before_cards": macro_before,
                "baseline_injection": injection_enabled,
            }),
        );

        if injection_enabled {
            let mut baseline_tags = self.deps.tag_pipeline.derive_baseline_tags(&baseline);
            baseline_tags.extend(fixture_tags.iter().cloned());
            self.log.append(
                EventType::BaselineInjected,
                self.state.step,
                None,
                None,
                json!({ "tags": baseline_tags }),
            );
            self.add_evidence(&baseline_tags, EvidenceSource::Baseline);
        }

        tracing::info!(
            macro_state = %macro_before.macro_state,
            baseline_injection = injection_enabled,
            "session started"
        );
        Ok(self.log.as_slice().to_vec())
    }

    /// Idempotent while a card is pending: returns it again and logs nothing.
    /// `None` means the session is ENDED.
    pub fn get_next_card(&mut self) -> Result<Option<NextCard>, SessionError> {
        self.ensure_initialized()?;
        if self.state.is_ended() {
            return Ok(None);
        }
        if let Some(pending) = &self.state.current_card {
            return self.resolve_pending(pending).map(Some);
        }
        if self.state.step >= self.deps.config.step_cap() {
            tracing::warn!(step = self.state.step, "step cap reached");
            self.end(EndedReason::MaxStepsReached);
            return Ok(None);
        }

        loop {
            match self.state.phase {
                Phase::L1 => {
                    if self.state.asked_count(Layer::L1) >= self.deps.config.max_l1 {
                        self.enter_l2()?;
                        continue;
                    }
                    match self.select_l1()? {
                        Some(next) => return Ok(Some(next)),
                        None => self.enter_l2()?,
                    }
                }
                Phase::L2 => return self.next_l2(),
                Phase::Ended => return Ok(None),
            }
        }
    }

    pub fn commit_answer(&mut self, answer: CommitAnswer) -> Result<CommitOutcome, SessionError> {
        self.ensure_initialized()?;
        if self.state.is_ended() {
            return Err(SessionError::SessionEnded);
        }
        let pending = match &self.state.current_card {
            None => {
                return Err(SessionError::NoPendingCard {
                    card_id: answer.card_id,
                });
            }
            Some(p) if p.card_id != answer.card_id => {
                return Err(SessionError::PendingCardMismatch {
                    expected: p.card_id.clone(),
                    got: answer.card_id,
                });
            }
            Some(p) => p.clone(),
        };

        let mark = self.log.len();
        let layer = pending.layer;
        let card = self.card(layer, &pending.card_id)?.clone();

        if answer.choice == Choice::NS {
            self.state.not_sure_count += 1;
        }
        self.log.append(
            EventType::AnswerCommitted,
            self.state.step,
            Some(layer),
            Some(&card.id),
            json!({
                "choice": answer.choice,
                "label": card.option(answer.choice).map(|o| o.label.as_str()),
            }),
        );
        tracing::debug!(card_id = %card.id, %layer, choice = %answer.choice, "answer committed");

        let raw_tags = self.deps.answer_tagger.tags_for(&card, answer.choice);
        self.add_evidence(
            &raw_tags,
            EvidenceSource::Card {
                layer,
                card_id: &card.id,
            },
        );

        // Gates may have just closed. Decide before any phase bookkeeping so a
        // run satisfied during L1 never spills into L2.
        let gates_closed = self.should_stop_early(layer);

        self.state.current_card = None;
        self.state.step += 1;
        self.update_macro(layer)?;
        self.update_micro(layer)?;

        let next_card = if gates_closed {
            self.end(EndedReason::GatesClosed);
            None
        } else {
            self.get_next_card()?
        };

        Ok(CommitOutcome {
            events: self.log.since(mark),
            state: self.state.clone(),
            next_card,
            ended: self.state.is_ended(),
        })
    }

    fn ensure_initialized(&self) -> Result<(), SessionError> {
        if self.baseline.is_none() {
            return Err(SessionError::NotInitialized);
        }
        Ok(())
    }

    fn card(&self, layer: Layer, card_id: &str) -> Result<&Card, SessionError> {
        self.deps
            .decks
            .deck(layer)
            .get(card_id)
            .ok_or_else(|| SessionError::CardNotInDeck {
                layer,
                card_id: card_id.to_string(),
            })
    }

    fn resolve_pending(&self, pending: &PendingCard) -> Result<NextCard, SessionError> {
        Ok(NextCard {
            layer: pending.layer,
            card: self.card(pending.layer, &pending.card_id)?.clone(),
            reason: pending.reason.clone(),
        })
    }

    fn select_l1(&mut self) -> Result<Option<NextCard>, SessionError> {
        let evidence = self.state.evidence_set();
        let pick = {
            let ctx = L1SelectionContext {
                deck: &self.deps.decks.l1,
                asked: &self.state.asked_l1_ids,
                evidence_tags: &evidence,
                gates_hit_any: &self.state.gates_hit_any,
                gates_hit_cards_only: &self.state.gates_hit_cards_only,
                step: self.state.step,
                coverage_first: self.deps.config.coverage_first_enabled,
            };
            self.deps.l1_selector.select(&ctx, self.deps.rng.as_mut())
        };
        let Some(pick) = pick else {
            tracing::debug!(step = self.state.step, "L1 selector has no eligible card");
            return Ok(None);
        };

        let next = self.show(Layer::L1, pick.card_id, pick.reason)?;
        if next.reason.starts_with(COVERAGE_FIRST_REASON_PREFIX) {
            self.state.coverage_first_picks.push(next.card.id.clone());
        }
        Ok(Some(next))
    }

    fn enter_l2(&mut self) -> Result<(), SessionError> {
        if self.deps.config.max_l2 == 0 {
            self.end(EndedReason::NoL2Candidates);
            return Ok(());
        }
        self.state.phase = Phase::L2;
        if self.state.l2_plan.is_none() {
            self.build_l2_plan()?;
        }
        Ok(())
    }

    fn build_l2_plan(&mut self) -> Result<(), SessionError> {
        let evidence = self.state.evidence_set();
        let plan = {
            let ctx = L2PlanContext {
                deck: &self.deps.decks.l2,
                asked_l2: &self.state.asked_l2_ids,
                current_macro: self.state.current_macro.as_ref(),
                micro: &self.state.micro,
                evidence_tags: &evidence,
                gates_hit_any: &self.state.gates_hit_any,
            };
            self.deps.l2_planner.plan(&ctx)
        };
        if let Some(unknown) = plan.plan.iter().find(|id| !self.deps.decks.l2.contains(id)) {
            return Err(SessionError::CardNotInDeck {
                layer: Layer::L2,
                card_id: unknown.clone(),
            });
        }
        tracing::debug!(
            plan_len = plan.plan.len(),
            reason = %plan.reason,
            "L2 plan built"
        );
        self.state.l2_plan = Some(plan.plan);
        self.state.l2_plan_reason = Some(plan.reason);
        self.state.l2_plan_cursor = 0;
        Ok(())
    }

    fn next_l2(&mut self) -> Result<Option<NextCard>, SessionError> {
        let plan = self.state.l2_plan.clone().unwrap_or_default();
        let mut cursor = self.state.l2_plan_cursor;
        while cursor < plan.len() && self.state.has_asked(Layer::L2, &plan[cursor]) {
            cursor += 1;
        }
        self.state.l2_plan_cursor = cursor;

        if cursor >= plan.len() {
            let reason = if self.state.asked_count(Layer::L2) > 0 {
                EndedReason::L2PlanCompleted
            } else {
                EndedReason::NoL2Candidates
            };
            self.end(reason);
            return Ok(None);
        }
        if self.state.asked_count(Layer::L2) >= self.deps.config.max_l2 {
            self.end(EndedReason::MaxL2);
            return Ok(None);
        }

        self.state.l2_plan_cursor = cursor + 1;
        let reason = format!(
            "l2_plan[{cursor}]:{}",
            self.state.l2_plan_reason.as_deref().unwrap_or("")
        );
        self.show(Layer::L2, plan[cursor].clone(), reason).map(Some)
    }

    /// Mark the card asked, make it pending, then log `card_shown`.
    fn show(&mut self, layer: Layer, card_id: String, reason: String) -> Result<NextCard, SessionError> {
        if self.state.active_layer() != Some(layer) {
            return Err(SessionError::WrongPhase {
                layer,
                phase: self.state.phase,
            });
        }
        let card = self.card(layer, &card_id)?.clone();
        if self.state.has_asked(layer, &card_id) {
            return Err(SessionError::CardAlreadyAsked { layer, card_id });
        }

        self.state.mark_asked(layer, &card_id);
        self.state.current_card = Some(PendingCard {
            card_id: card_id.clone(),
            layer,
            reason: reason.clone(),
        });
        self.log.append(
            EventType::CardShown,
            self.state.step,
            Some(layer),
            Some(&card_id),
            json!({
                "reason": reason,
                "cluster": card.cluster,
            }),
        );
        tracing::debug!(%card_id, %layer, step = self.state.step, %reason, "card shown");

        Ok(NextCard {
            layer,
            card,
            reason,
        })
    }

    /// Canonicalize, derive, append, then check gates. The only way evidence
    /// enters a session.
    fn add_evidence(&mut self, raw: &[String], source: EvidenceSource<'_>) {
        let canonical = self.deps.tag_pipeline.canonicalize_tags(raw);
        let derived = self.deps.tag_pipeline.derive_sig_tags(&canonical);
        let mut added: Vec<String> = Vec::with_capacity(canonical.len() + derived.len());
        for tag in canonical.into_iter().chain(derived) {
            if !added.contains(&tag) {
                added.push(tag);
            }
        }

        self.state.evidence_tags.extend(added.iter().cloned());
        match source {
            EvidenceSource::Baseline => self.state.baseline_evidence_tags.extend(added.iter().cloned()),
            EvidenceSource::Card { .. } => self.state.card_evidence_tags.extend(added.iter().cloned()),
        }
        self.log.append(
            EventType::EvidenceAdded,
            self.state.step,
            source.layer(),
            source.card_id(),
            json!({
                "source": source.label(),
                "raw": raw,
                "tags": added,
            }),
        );
        self.check_gates(source);
    }

    fn check_gates(&mut self, source: EvidenceSource<'_>) {
        let any_tags = self.state.evidence_set();
        let card_tags = self.state.card_evidence_set();
        let step = self.state.step;

        for gate in Gate::ALL {
            if !self.state.gates_hit_any.is_open(gate)
                && self.deps.gate_engine.has_gate_match(gate, &any_tags)
                && self.state.gates_hit_any.hit(gate)
            {
                self.state.gate_first_hit_step.entry(gate).or_insert(step);
                self.log.append(
                    EventType::GateHit,
                    step,
                    source.layer(),
                    source.card_id(),
                    json!({ "gate": gate, "scope": "any", "source": source.label() }),
                );
            }
            if !self.state.gates_hit_cards_only.is_open(gate)
                && self.deps.gate_engine.has_gate_match(gate, &card_tags)
                && self.state.gates_hit_cards_only.hit(gate)
            {
                if let Some(card_id) = source.card_id() {
                    self.state
                        .gate_hit_card_ids
                        .entry(gate)
                        .or_insert_with(|| card_id.to_string());
                }
                self.log.append(
                    EventType::GateHit,
                    step,
                    source.layer(),
                    source.card_id(),
                    json!({ "gate": gate, "scope": "cards_only", "source": source.label() }),
                );
            }
        }
    }

    /// Core gates must be confirmed by cards; load and social may come from baseline.
    fn should_stop_early(&self, layer: Layer) -> bool {
        let config = &self.deps.config;
        if !config.stop_on_gates {
            return false;
        }
        let quota_met = match layer {
            Layer::L1 => self.state.asked_count(Layer::L1) >= config.min_l1,
            Layer::L2 => self.state.asked_count(Layer::L2) >= config.min_l2,
        };
        quota_met
            && self.state.gates_hit_cards_only.all(&Gate::CORE)
            && self.state.gates_hit_any.is_open(Gate::Load)
            && self.state.gates_hit_any.is_open(Gate::Social)
    }

    fn update_macro(&mut self, layer: Layer) -> Result<(), SessionError> {
        let baseline = self.baseline.ok_or(SessionError::NotInitialized)?;
        let result = self
            .deps
            .macro_engine
            .compute_macro(&baseline, &self.state.evidence_tags);

        let slot = match layer {
            Layer::L1 => &mut self.state.macro_after_l1,
            Layer::L2 => &mut self.state.macro_after_l2,
        };
        if slot.is_none() {
            *slot = Some(result.clone());
        }

        self.log.append(
            EventType::MacroUpdated,
            self.state.step,
            Some(layer),
            None,
            json!(result),
        );
        self.state.current_macro = Some(result);
        Ok(())
    }

    fn update_micro(&mut self, layer: Layer) -> Result<(), SessionError> {
        let scoring = self
            .deps
            .tag_pipeline
            .build_scoring_tags(&self.state.evidence_tags);
        let micro = match &self.state.current_macro {
            Some(macro_result) => self.deps.micro_engine.select_micro(macro_result, &scoring),
            None => MicroState::default(),
        };
        micro.check_invariant()?;

        self.log.append(
            EventType::MicroSelected,
            self.state.step,
            Some(layer),
            None,
            json!(micro),
        );
        self.state.micro = micro;
        Ok(())
    }

    /// Compute the signal summary, then close the log with `session_end`.
    fn end(&mut self, reason: EndedReason) {
        let layer = self.state.active_layer();
        let scoring = self
            .deps
            .tag_pipeline
            .build_scoring_tags(&self.state.evidence_tags);
        let quality = compute_signal_quality(
            self.deps.macro_engine.as_ref(),
            &scoring,
            self.state
                .current_macro
                .as_ref()
                .map(|m| m.macro_state.as_str()),
        );
        self.log.append(
            EventType::ExpectedMacroComputed,
            self.state.step,
            layer,
            None,
            json!(quality),
        );
        self.state.signal_quality = Some(quality);

        self.state.phase = Phase::Ended;
        self.state.current_card = None;
        self.state.ended_reason = Some(reason);
        self.state.ended_by = layer.map(EndedBy::from);

        self.log.append(
            EventType::SessionEnd,
            self.state.step,
            layer,
            None,
            json!({
                "ended_reason": reason,
                "ended_by": self.state.ended_by,
                "asked_l1_count": self.state.asked_count(Layer::L1),
                "asked_l2_count": self.state.asked_count(Layer::L2),
                "not_sure_count": self.state.not_sure_count,
                "macro": self.state.current_macro.as_ref().map(|m| m.macro_state.as_str()),
                "micro": self.state.micro,
            }),
        );
        tracing::info!(
            ended_reason = %reason,
            step = self.state.step,
            asked_l1 = self.state.asked_count(Layer::L1),
            asked_l2 = self.state.asked_count(Layer::L2),
            "session ended"
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{CommitAnswer, NextCard, SessionRunner};
    use crate::baseline::BaselineMetrics;
    use crate::cards::{Card, CardOption, Choice, Decks, Layer};
    use crate::config::SessionConfig;
    use crate::deps::{
        AnswerTagger, GateEngine, L1Pick, L1SelectionContext, L1Selector, L2Plan, L2PlanContext,
        L2Planner, MacroContribution, MacroEngine, MicroEngine, RandomSource, SeededRng,
        SessionDeps, TagPipeline,
    };
    use crate::error::SessionError;
    use crate::events::{EventType, SessionEvent};
    use crate::gates::Gate;
    use crate::state::{EndedBy, EndedReason, MacroResult, MicroSource, MicroState, Phase};

    const GATE_TAG_PREFIX: &str = "g:";
    const NS_TAG: &str = "ns";

    struct InOrder;

    impl L1Selector for InOrder {
        fn select(&self, ctx: &L1SelectionContext<'_>, _: &mut dyn RandomSource) -> Option<L1Pick> {
            ctx.unasked().next().map(|card| L1Pick {
                card_id: card.id.clone(),
                reason: "in_order".to_string(),
            })
        }
    }

    struct Always(&'static str);

    impl L1Selector for Always {
        fn select(&self, _: &L1SelectionContext<'_>, _: &mut dyn RandomSource) -> Option<L1Pick> {
            Some(L1Pick {
                card_id: self.0.to_string(),
                reason: "always".to_string(),
            })
        }
    }

    struct FixedPlan(Vec<&'static str>);

    impl L2Planner for FixedPlan {
        fn plan(&self, _: &L2PlanContext<'_>) -> L2Plan {
            L2Plan {
                plan: self.0.iter().map(|id| id.to_string()).collect(),
                reason: "fixed".to_string(),
            }
        }
    }

    struct Tagger;

    impl AnswerTagger for Tagger {
        fn tags_for(&self, card: &Card, choice: Choice) -> Vec<String> {
            card.option(choice)
                .map(|o| o.tags.clone())
                .unwrap_or_else(|| vec![NS_TAG.to_string()])
        }
    }

    struct Pipeline {
        baseline: Vec<String>,
    }

    impl TagPipeline for Pipeline {
        fn canonicalize_tags(&self, raw: &[String]) -> Vec<String> {
            let mut out: Vec<String> = Vec::new();
            for tag in raw {
                if !out.contains(tag) {
                    out.push(tag.clone());
                }
            }
            out
        }

        fn derive_sig_tags(&self, _: &[String]) -> Vec<String> {
            Vec::new()
        }

        fn build_scoring_tags(&self, tags: &[String]) -> Vec<String> {
            tags.iter()
                .filter(|t| t.as_str() != NS_TAG && !t.starts_with("bl:"))
                .cloned()
                .collect()
        }

        fn derive_baseline_tags(&self, _: &BaselineMetrics) -> Vec<String> {
            self.baseline.clone()
        }
    }

    /// "active" once any gate tag is in evidence, "idle" before.
    struct CountingMacro;

    impl MacroEngine for CountingMacro {
        fn compute_macro(&self, _: &BaselineMetrics, evidence_tags: &[String]) -> MacroResult {
            let active = evidence_tags
                .iter()
                .filter(|t| t.starts_with(GATE_TAG_PREFIX))
                .count();
            MacroResult {
                macro_state: if active > 0 { "active" } else { "idle" }.to_string(),
                scores: [("active".to_string(), active as f64)].into_iter().collect(),
                confidence: 1.0,
            }
        }

        fn evidence_contributions(&self, scoring_tags: &[String]) -> Vec<MacroContribution> {
            scoring_tags
                .iter()
                .filter(|t| t.starts_with(GATE_TAG_PREFIX))
                .map(|t| MacroContribution {
                    tag: t.clone(),
                    macro_state: "active".to_string(),
                    weight: 1.0,
                })
                .collect()
        }
    }

    struct Micro {
        broken: bool,
    }

    impl MicroEngine for Micro {
        fn select_micro(&self, _: &MacroResult, scoring_tags: &[String]) -> MicroState {
            if self.broken {
                return MicroState {
                    selected: Some("ghost".to_string()),
                    source: MicroSource::NotComputed,
                    reason: "broken".to_string(),
                    top_candidate: None,
                };
            }
            if scoring_tags.is_empty() {
                return MicroState::default();
            }
            MicroState {
                selected: Some("focus".to_string()),
                source: MicroSource::Selected,
                reason: "any_evidence".to_string(),
                top_candidate: Some("focus".to_string()),
            }
        }
    }

    struct PrefixGates {
        lists: Vec<(Gate, Vec<String>)>,
    }

    impl PrefixGates {
        fn new() -> Self {
            Self {
                lists: Gate::ALL
                    .into_iter()
                    .map(|g| (g, vec![format!("{GATE_TAG_PREFIX}{g}")]))
                    .collect(),
            }
        }
    }

    impl GateEngine for PrefixGates {
        fn allow_list(&self, gate: Gate) -> &[String] {
            self.lists
                .iter()
                .find(|(g, _)| *g == gate)
                .map(|(_, tags)| tags.as_slice())
                .unwrap_or(&[])
        }
    }

    fn card(id: &str, cluster: &str, a_tags: &[&str]) -> Card {
        Card {
            id: id.to_string(),
            title: id.to_string(),
            card_type: "binary".to_string(),
            options: vec![
                CardOption {
                    label: "yes".to_string(),
                    tags: a_tags.iter().map(|t| t.to_string()).collect(),
                },
                CardOption {
                    label: "no".to_string(),
                    tags: vec!["other".to_string()],
                },
            ],
            cluster: cluster.to_string(),
            meta: serde_json::Value::Null,
        }
    }

    fn decks() -> Arc<Decks> {
        let l1 = Gate::ALL
            .into_iter()
            .map(|g| {
                let tag = format!("{GATE_TAG_PREFIX}{g}");
                card(&format!("l1_{g}"), g.as_str(), &[tag.as_str()])
            })
            .collect();
        let core_tags = ["g:valence", "g:arousal", "g:agency", "g:clarity"];
        let l2 = ["l2_a", "l2_b", "l2_c"]
            .into_iter()
            .map(|id| card(id, "probe", &core_tags))
            .collect();
        Arc::new(Decks::new(l1, l2).unwrap())
    }

    fn config() -> SessionConfig {
        SessionConfig {
            max_l1: 6,
            max_l2: 3,
            min_l1: 4,
            min_l2: 1,
            not_sure_rate: 0.0,
            coverage_first_enabled: false,
            ..SessionConfig::default()
        }
    }

    fn deps(config: SessionConfig) -> SessionDeps {
        SessionDeps {
            config,
            decks: decks(),
            rng: Box::new(SeededRng::new(11)),
            l1_selector: Box::new(InOrder),
            l2_planner: Box::new(FixedPlan(vec!["l2_a", "l2_b", "l2_c"])),
            answer_tagger: Box::new(Tagger),
            macro_engine: Box::new(CountingMacro),
            micro_engine: Box::new(Micro { broken: false }),
            tag_pipeline: Box::new(Pipeline {
                baseline: Vec::new(),
            }),
            gate_engine: Box::new(PrefixGates::new()),
        }
    }

    fn started(deps: SessionDeps) -> SessionRunner {
        let mut runner = SessionRunner::new(deps).unwrap();
        runner.init(BaselineMetrics::default(), &[]).unwrap();
        runner
    }

    fn drive(
        runner: &mut SessionRunner,
        choose: impl Fn(&NextCard) -> Choice,
    ) -> Result<Vec<String>, SessionError> {
        let mut shown = Vec::new();
        let mut next = runner.get_next_card()?;
        while let Some(card) = next {
            assert!(shown.len() < 50, "runaway session");
            shown.push(card.card.id.clone());
            let answer = CommitAnswer {
                card_id: card.card.id.clone(),
                choice: choose(&card),
            };
            next = runner.commit_answer(answer)?.next_card;
        }
        Ok(shown)
    }

    fn count(events: &[SessionEvent], event_type: EventType) -> usize {
        events.iter().filter(|e| e.event_type == event_type).count()
    }

    fn with_baseline_gates(mut deps: SessionDeps) -> SessionDeps {
        deps.tag_pipeline = Box::new(Pipeline {
            baseline: vec!["g:load".to_string(), "g:social".to_string()],
        });
        deps
    }

    #[test]
    fn new_rejects_invalid_config() {
        let bad = SessionConfig {
            min_l1: 9,
            ..config()
        };
        let err = SessionRunner::new(deps(bad)).err().unwrap();
        assert!(matches!(err, SessionError::InvalidConfig(_)));
    }

    #[test]
    fn calls_before_init_are_rejected() {
        let mut runner = SessionRunner::new(deps(config())).unwrap();
        assert_eq!(runner.get_next_card().unwrap_err(), SessionError::NotInitialized);
    }

    #[test]
    fn init_logs_start_then_baseline_evidence() {
        let mut runner = SessionRunner::new(with_baseline_gates(deps(config()))).unwrap();
        let events = runner
            .init(BaselineMetrics::default(), &["extra".to_string()])
            .unwrap();

        assert_eq!(events[0].event_type, EventType::SessionStart);
        assert_eq!(events[1].event_type, EventType::BaselineInjected);
        assert_eq!(
            events[1].payload["tags"],
            serde_json::json!(["g:load", "g:social", "extra"])
        );
        assert_eq!(events[2].event_type, EventType::EvidenceAdded);
        assert_eq!(events[2].payload["source"], "baseline");
        assert_eq!(count(&events, EventType::GateHit), 2);

        let state = runner.state();
        assert!(state.gates_hit_any.is_open(Gate::Load));
        assert!(!state.gates_hit_cards_only.is_open(Gate::Load));
        assert_eq!(state.gate_first_hit_step.get(&Gate::Social), Some(&0));
        assert!(state.macro_before_cards.is_some());
        assert_eq!(state.baseline_evidence_tags.len(), 3);
        assert!(state.card_evidence_tags.is_empty());
    }

    #[test]
    fn init_without_injection_adds_no_evidence() {
        let cfg = SessionConfig {
            baseline_injection_enabled: false,
            ..config()
        };
        let mut runner = SessionRunner::new(with_baseline_gates(deps(cfg))).unwrap();
        let events = runner.init(BaselineMetrics::default(), &[]).unwrap();
        assert_eq!(events.len(), 1);
        assert!(runner.state().evidence_tags.is_empty());
        assert!(runner.state().gates_hit_any.open_gates().is_empty());
    }

    #[test]
    fn init_rejects_out_of_range_baseline() {
        let mut runner = SessionRunner::new(deps(config())).unwrap();
        let baseline = BaselineMetrics {
            energy: 0,
            ..BaselineMetrics::default()
        };
        assert!(matches!(
            runner.init(baseline, &[]),
            Err(SessionError::InvalidBaseline { .. })
        ));
    }

    #[test]
    fn get_next_card_is_idempotent_while_pending() {
        let mut runner = started(deps(config()));
        let first = runner.get_next_card().unwrap().unwrap();
        let logged = runner.events().len();
        let again = runner.get_next_card().unwrap().unwrap();

        assert_eq!(first, again);
        assert_eq!(runner.events().len(), logged);
        assert_eq!(count(runner.events(), EventType::CardShown), 1);
        assert_eq!(runner.state().current_card_id(), Some("l1_valence"));
    }

    #[test]
    fn commit_requires_matching_pending_card() {
        let mut runner = started(deps(config()));
        let err = runner
            .commit_answer(CommitAnswer {
                card_id: "l1_valence".to_string(),
                choice: Choice::A,
            })
            .unwrap_err();
        assert!(matches!(err, SessionError::NoPendingCard { .. }));

        runner.get_next_card().unwrap();
        let err = runner
            .commit_answer(CommitAnswer {
                card_id: "l1_arousal".to_string(),
                choice: Choice::A,
            })
            .unwrap_err();
        assert_eq!(
            err,
            SessionError::PendingCardMismatch {
                expected: "l1_valence".to_string(),
                got: "l1_arousal".to_string(),
            }
        );
        assert_eq!(runner.state().step, 0);
    }

    #[test]
    fn commit_outcome_reports_this_call_only() {
        let mut runner = started(deps(config()));
        let card = runner.get_next_card().unwrap().unwrap();
        let outcome = runner
            .commit_answer(CommitAnswer {
                card_id: card.card.id,
                choice: Choice::A,
            })
            .unwrap();

        assert_eq!(outcome.events[0].event_type, EventType::AnswerCommitted);
        assert_eq!(outcome.events[0].payload["choice"], "A");
        assert_eq!(outcome.events[0].payload["label"], "yes");
        assert_eq!(outcome.state.step, 1);
        assert!(!outcome.ended);
        let next = outcome.next_card.unwrap();
        assert_eq!(next.card.id, "l1_arousal");
        assert_eq!(outcome.events.last().unwrap().event_type, EventType::CardShown);
    }

    #[test]
    fn max_l2_zero_ends_after_l1() {
        let cfg = SessionConfig {
            max_l1: 3,
            min_l1: 3,
            max_l2: 0,
            min_l2: 0,
            stop_on_gates: false,
            ..config()
        };
        let mut runner = started(deps(cfg));
        let shown = drive(&mut runner, |_| Choice::A).unwrap();

        assert_eq!(shown.len(), 3);
        let state = runner.state();
        assert_eq!(state.phase, Phase::Ended);
        assert_eq!(state.ended_reason, Some(EndedReason::NoL2Candidates));
        assert_eq!(state.ended_by, Some(EndedBy::L1));
        assert!(state.asked_l2_ids.is_empty());
        assert!(state.l2_plan.is_none());
        assert!(
            runner
                .events()
                .iter()
                .all(|e| e.layer != Some(Layer::L2))
        );
    }

    #[test]
    fn gates_closed_at_min_l1_never_enters_l2() {
        let mut runner = started(with_baseline_gates(deps(config())));
        let shown = drive(&mut runner, |_| Choice::A).unwrap();

        assert_eq!(shown, ["l1_valence", "l1_arousal", "l1_agency", "l1_clarity"]);
        let state = runner.state();
        assert_eq!(state.ended_reason, Some(EndedReason::GatesClosed));
        assert_eq!(state.ended_by, Some(EndedBy::L1));
        assert!(state.asked_l2_ids.is_empty());
        assert!(state.l2_plan.is_none());
        assert_eq!(state.gate_hit_card_ids.get(&Gate::Valence).map(String::as_str), Some("l1_valence"));
        assert_eq!(state.gate_first_hit_step.get(&Gate::Clarity), Some(&3));
    }

    #[test]
    fn gates_wait_for_min_l1() {
        let cfg = SessionConfig {
            min_l1: 5,
            ..config()
        };
        let mut runner = started(with_baseline_gates(deps(cfg)));
        let shown = drive(&mut runner, |_| Choice::A).unwrap();

        assert_eq!(shown.len(), 5);
        assert_eq!(runner.state().ended_reason, Some(EndedReason::GatesClosed));
    }

    #[test]
    fn baseline_alone_never_closes_core_gates() {
        let mut d = deps(SessionConfig {
            max_l2: 0,
            min_l2: 0,
            ..config()
        });
        d.tag_pipeline = Box::new(Pipeline {
            baseline: Gate::ALL.iter().map(|g| format!("{GATE_TAG_PREFIX}{g}")).collect(),
        });
        let mut runner = started(d);
        let shown = drive(&mut runner, |_| Choice::B).unwrap();

        assert_eq!(shown.len(), 6);
        assert_eq!(runner.state().ended_reason, Some(EndedReason::NoL2Candidates));
    }

    #[test]
    fn gates_closed_during_l2_ends_by_l2() {
        let mut runner = started(with_baseline_gates(deps(config())));
        let shown = drive(&mut runner, |card| match card.layer {
            Layer::L1 => Choice::B,
            Layer::L2 => Choice::A,
        })
        .unwrap();

        assert_eq!(shown.len(), 7);
        let state = runner.state();
        assert_eq!(state.asked_l2_ids, ["l2_a"]);
        assert_eq!(state.ended_reason, Some(EndedReason::GatesClosed));
        assert_eq!(state.ended_by, Some(EndedBy::L2));
    }

    #[test]
    fn empty_plan_ends_with_no_l2_candidates() {
        let mut d = deps(SessionConfig {
            max_l1: 2,
            min_l1: 0,
            ..config()
        });
        d.l2_planner = Box::new(FixedPlan(Vec::new()));
        let mut runner = started(d);
        drive(&mut runner, |_| Choice::B).unwrap();

        let state = runner.state();
        assert_eq!(state.ended_reason, Some(EndedReason::NoL2Candidates));
        assert_eq!(state.ended_by, Some(EndedBy::L2));
        assert_eq!(state.l2_plan.as_deref(), Some(&[][..]));
    }

    #[test]
    fn duplicate_plan_entries_are_skipped() {
        let mut d = deps(SessionConfig {
            max_l1: 1,
            min_l1: 0,
            ..config()
        });
        d.l2_planner = Box::new(FixedPlan(vec!["l2_a", "l2_a"]));
        let mut runner = started(d);
        let shown = drive(&mut runner, |_| Choice::B).unwrap();

        assert_eq!(shown, ["l1_valence", "l2_a"]);
        assert_eq!(runner.state().ended_reason, Some(EndedReason::L2PlanCompleted));
        assert_eq!(runner.state().l2_plan_cursor, 2);
    }

    #[test]
    fn l2_stops_at_max_l2() {
        let mut runner = started(deps(SessionConfig {
            max_l1: 1,
            min_l1: 0,
            max_l2: 2,
            stop_on_gates: false,
            ..config()
        }));
        let shown = drive(&mut runner, |_| Choice::A).unwrap();

        assert_eq!(shown, ["l1_valence", "l2_a", "l2_b"]);
        assert_eq!(runner.state().ended_reason, Some(EndedReason::MaxL2));
        assert_eq!(runner.state().ended_by, Some(EndedBy::L2));
    }

    #[test]
    fn exhausted_plan_completes() {
        let mut runner = started(deps(SessionConfig {
            max_l1: 1,
            min_l1: 0,
            max_l2: 5,
            stop_on_gates: false,
            ..config()
        }));
        let shown = drive(&mut runner, |_| Choice::A).unwrap();
        assert_eq!(shown.len(), 4);
        assert_eq!(runner.state().ended_reason, Some(EndedReason::L2PlanCompleted));
    }

    #[test]
    fn selector_repeating_a_card_is_an_error() {
        let mut d = deps(config());
        d.l1_selector = Box::new(Always("l1_valence"));
        let mut runner = started(d);
        let err = drive(&mut runner, |_| Choice::B).unwrap_err();
        assert_eq!(
            err,
            SessionError::CardAlreadyAsked {
                layer: Layer::L1,
                card_id: "l1_valence".to_string(),
            }
        );
    }

    #[test]
    fn selector_picking_from_wrong_deck_is_an_error() {
        let mut d = deps(config());
        d.l1_selector = Box::new(Always("l2_a"));
        let mut runner = started(d);
        assert!(matches!(
            runner.get_next_card(),
            Err(SessionError::CardNotInDeck {
                layer: Layer::L1,
                ..
            })
        ));
        assert!(runner.state().asked_l1_ids.is_empty());
    }

    #[test]
    fn plan_with_unknown_card_is_an_error() {
        let mut d = deps(SessionConfig {
            max_l1: 1,
            min_l1: 0,
            ..config()
        });
        d.l2_planner = Box::new(FixedPlan(vec!["l2_a", "missing"]));
        let mut runner = started(d);
        let err = drive(&mut runner, |_| Choice::B).unwrap_err();
        assert_eq!(
            err,
            SessionError::CardNotInDeck {
                layer: Layer::L2,
                card_id: "missing".to_string(),
            }
        );
    }

    #[test]
    fn inconsistent_micro_aborts_commit() {
        let mut d = deps(config());
        d.micro_engine = Box::new(Micro { broken: true });
        let mut runner = started(d);
        let err = drive(&mut runner, |_| Choice::A).unwrap_err();
        assert!(matches!(err, SessionError::MicroInvariant { .. }));
    }

    #[test]
    fn commit_after_end_is_rejected() {
        let mut runner = started(with_baseline_gates(deps(config())));
        let shown = drive(&mut runner, |_| Choice::A).unwrap();
        assert!(runner.get_next_card().unwrap().is_none());

        let err = runner
            .commit_answer(CommitAnswer {
                card_id: shown[0].clone(),
                choice: Choice::A,
            })
            .unwrap_err();
        assert_eq!(err, SessionError::SessionEnded);
    }

    #[test]
    fn not_sure_answers_are_counted() {
        let mut runner = started(deps(SessionConfig {
            max_l2: 0,
            min_l2: 0,
            ..config()
        }));
        drive(&mut runner, |card| {
            if card.card.id == "l1_agency" {
                Choice::NS
            } else {
                Choice::B
            }
        })
        .unwrap();

        let state = runner.state();
        assert_eq!(state.not_sure_count, 1);
        assert!(state.card_evidence_tags.iter().any(|t| t == NS_TAG));
        let committed: Vec<&SessionEvent> = runner
            .events()
            .iter()
            .filter(|e| e.event_type == EventType::AnswerCommitted && e.payload["choice"] == "NS")
            .collect();
        assert_eq!(committed.len(), 1);
        assert!(committed[0].payload["label"].is_null());
    }

    #[test]
    fn macro_after_l1_is_captured_once() {
        let mut runner = started(deps(SessionConfig {
            max_l2: 0,
            min_l2: 0,
            stop_on_gates: false,
            ..config()
        }));
        drive(&mut runner, |card| {
            if card.card.id == "l1_valence" {
                Choice::B
            } else {
                Choice::A
            }
        })
        .unwrap();

        let state = runner.state();
        assert_eq!(
            state.macro_after_l1.as_ref().map(|m| m.macro_state.as_str()),
            Some("idle")
        );
        assert_eq!(
            state.current_macro.as_ref().map(|m| m.macro_state.as_str()),
            Some("active")
        );
        assert!(state.macro_after_l2.is_none());
        assert_eq!(state.micro.selected.as_deref(), Some("focus"));
    }

    #[test]
    fn event_log_is_well_formed() {
        let mut runner = started(with_baseline_gates(deps(config())));
        drive(&mut runner, |card| match card.layer {
            Layer::L1 => Choice::B,
            Layer::L2 => Choice::A,
        })
        .unwrap();
        let events = runner.events();

        assert_eq!(count(events, EventType::SessionStart), 1);
        assert_eq!(count(events, EventType::SessionEnd), 1);
        assert_eq!(count(events, EventType::ExpectedMacroComputed), 1);
        assert_eq!(events[0].event_type, EventType::SessionStart);
        let n = events.len();
        assert_eq!(events[n - 1].event_type, EventType::SessionEnd);
        assert_eq!(events[n - 2].event_type, EventType::ExpectedMacroComputed);
        assert!(events.windows(2).all(|w| w[0].step <= w[1].step));
        assert!(
            events
                .iter()
                .filter(|e| e.event_type == EventType::CardShown)
                .all(|e| e.layer.is_some() && e.card_id.is_some())
        );

        let end = &events[n - 1].payload;
        assert_eq!(end["ended_reason"], "gates_closed");
        assert_eq!(end["ended_by"], "l2");
        assert_eq!(end["asked_l1_count"], 6);
        assert_eq!(end["asked_l2_count"], 1);

        let quality = runner.state().signal_quality.as_ref().unwrap();
        assert_eq!(quality.expected_macro.as_deref(), Some("active"));
        assert!(!quality.has_contradiction);
    }

    #[test]
    fn init_resets_a_finished_session() {
        let mut runner = started(with_baseline_gates(deps(config())));
        drive(&mut runner, |_| Choice::A).unwrap();
        assert!(runner.state().is_ended());

        runner.init(BaselineMetrics::default(), &[]).unwrap();
        assert_eq!(runner.state().phase, Phase::L1);
        assert_eq!(runner.state().step, 0);
        assert!(runner.state().asked_l1_ids.is_empty());
        assert_eq!(count(runner.events(), EventType::SessionEnd), 0);
    }

    #[test]
    fn init_rewinds_the_random_stream() {
        use crate::reference::{decks, reference_deps};

        let deps = reference_deps(SessionConfig::default(), decks().unwrap(), 7, None);
        let mut runner = SessionRunner::new(deps).unwrap();

        runner.init(BaselineMetrics::default(), &[]).unwrap();
        let first = drive(&mut runner, |_| Choice::B).unwrap();
        let first_events: Vec<_> = runner
            .events()
            .iter()
            .map(|e| (e.event_type, e.step, e.card_id.clone(), e.payload.clone()))
            .collect();

        runner.init(BaselineMetrics::default(), &[]).unwrap();
        let second = drive(&mut runner, |_| Choice::B).unwrap();
        let second_events: Vec<_> = runner
            .events()
            .iter()
            .map(|e| (e.event_type, e.step, e.card_id.clone(), e.payload.clone()))
            .collect();

        assert!(!first.is_empty());
        assert_eq!(first, second);
        assert_eq!(first_events, second_events);
    }

    #[test]
    fn show_outside_the_active_layer_is_wrong_phase() {
        let mut runner = started(deps(config()));
        runner.state.phase = Phase::L2;
        let err = runner
            .show(Layer::L1, "l1_valence".to_string(), "test".to_string())
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::WrongPhase {
                layer: Layer::L1,
                phase: Phase::L2
            }
        ));
        assert_eq!(count(runner.events(), EventType::CardShown), 0);

        runner.state.phase = Phase::Ended;
        let err = runner
            .show(Layer::L2, "l2_a".to_string(), "test".to_string())
            .unwrap_err();
        assert!(matches!(err, SessionError::WrongPhase { phase: Phase::Ended, .. }));
    }

    #[test]
    fn same_seed_same_session() {
        use crate::reference::{decks, reference_deps};

        fn run(seed: u64) -> Vec<(EventType, u32, Option<String>, serde_json::Value)> {
            let deps = reference_deps(SessionConfig::default(), decks().unwrap(), seed, None);
            let mut runner = SessionRunner::new(deps).unwrap();
            runner.init(BaselineMetrics::default(), &[]).unwrap();
            drive(&mut runner, |card| {
                if card.card.id.len() % 2 == 0 {
                    Choice::A
                } else {
                    Choice::B
                }
            })
            .unwrap();
            runner
                .events()
                .iter()
                .map(|e| (e.event_type, e.step, e.card_id.clone(), e.payload.clone()))
                .collect()
        }

        assert_eq!(run(7), run(7));
    }
}
