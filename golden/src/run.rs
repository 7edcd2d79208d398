use std::sync::Arc;

use cardflow_core::reference::reference_deps;
use cardflow_core::{
    CommitAnswer, Decks, SessionConfig, SessionError, SessionEvent, SessionRunner, SessionState,
};

use crate::error::GoldenError;
use crate::fixture::Fixture;
use crate::policy::AnswerSampler;

/// Raw result of replaying one fixture.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub fixture_id: String,
    pub seed: u64,
    pub fixture_hash: String,
    pub config: SessionConfig,
    pub state: SessionState,
    pub events: Vec<SessionEvent>,
}

/// Replay `fixture` against the bundled domain pack until the session ends.
pub fn run_fixture(fixture: &Fixture, decks: Arc<Decks>) -> Result<RunOutput, GoldenError> {
    let config = fixture.session_config()?;
    let sampler = AnswerSampler::for_fixture(fixture, &config.profile, config.not_sure_rate)
        .ok_or_else(|| {
            GoldenError::fixture(
                &fixture.id,
                format!("unknown answer profile '{}'", config.profile),
            )
        })?;
    let fixture_hash = fixture.fixture_hash()?;

    let deps = reference_deps(
        config.clone(),
        decks,
        fixture.seed,
        fixture.forced_l1_card_order.clone(),
    );
    let mut runner = SessionRunner::new(deps)?;

    let span = tracing::info_span!("golden_run", fixture = %fixture.id, seed = fixture.seed);
    let _guard = span.enter();

    if let Err(source) = drive(&mut runner, fixture, &sampler) {
        tracing::error!(error = %source, events = runner.events().len(), "run aborted");
        return Err(GoldenError::Aborted {
            fixture_id: fixture.id.clone(),
            source,
            events: runner.events().to_vec(),
        });
    }

    Ok(RunOutput {
        fixture_id: fixture.id.clone(),
        seed: fixture.seed,
        fixture_hash,
        config,
        state: runner.snapshot(),
        events: runner.events().to_vec(),
    })
}

fn drive(
    runner: &mut SessionRunner,
    fixture: &Fixture,
    sampler: &AnswerSampler,
) -> Result<(), SessionError> {
    runner.init(fixture.baseline_metrics, &fixture.tags)?;
    let cap = runner.config().step_cap();

    let mut commits = 0;
    let mut next = runner.get_next_card()?;
    while let Some(shown) = next {
        if commits >= cap {
            return Err(SessionError::StepCapExceeded { cap });
        }
        commits += 1;
        let choice = sampler.choose(&shown.card, runner.rng());
        let outcome = runner.commit_answer(CommitAnswer {
            card_id: shown.card.id,
            choice,
        })?;
        next = outcome.next_card;
    }
    Ok(())
}
