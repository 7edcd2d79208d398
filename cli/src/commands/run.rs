use std::path::PathBuf;

use cardflow_core::reference::decks;
use cardflow_golden::{EventDigest, Fixture, StableProjection, run_fixture};
use clap::Args;

use crate::util::{exit_error, print_json, print_trail};

#[derive(Args)]
pub struct RunArgs {
    /// Fixture JSON file to replay
    #[arg(long)]
    pub fixture: PathBuf,

    /// On failure, print the last N events to stderr
    #[arg(long, value_name = "N")]
    pub debug: Option<usize>,
}

/// Replay one fixture and print its stable projection.
pub fn run(args: RunArgs) -> i32 {
    let fixture = Fixture::load(&args.fixture).unwrap_or_else(|e| exit_error(&e.to_string(), None));
    let decks = decks().unwrap_or_else(|e| exit_error(&e.to_string(), None));

    let projection = run_fixture(&fixture, decks).and_then(|run| StableProjection::from_run(&run));
    match projection {
        Ok(projection) => {
            tracing::info!(fixture = %fixture.id, events = projection.events.len(), "fixture replayed");
            print_json(&projection);
            0
        }
        Err(e) => {
            tracing::error!(fixture = %fixture.id, error = %e, "fixture replay failed");
            if let Some(n) = args.debug {
                let trail: Vec<EventDigest> = e.trail().iter().map(EventDigest::from_event).collect();
                print_trail(&fixture.id, &trail[trail.len().saturating_sub(n)..]);
            }
            exit_error(&e.to_string(), None)
        }
    }
}
