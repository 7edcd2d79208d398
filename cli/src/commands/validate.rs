use std::path::PathBuf;

use cardflow_golden::{invariants, snapshot};
use clap::Args;
use serde_json::json;

use crate::util::{exit_error, print_json};

#[derive(Args)]
pub struct ValidateArgs {
    /// Stored snapshot to check
    #[arg(long)]
    pub snapshot: PathBuf,
}

/// Run the invariant checks over a stored snapshot without replaying it.
pub fn run(args: ValidateArgs) -> i32 {
    let projection = match snapshot::load(&args.snapshot) {
        Ok(Some(projection)) => projection,
        Ok(None) => exit_error(
            &format!("snapshot not found: {}", args.snapshot.display()),
            Some("Generate snapshots with `cardflow golden --update`"),
        ),
        Err(e) => exit_error(&e.to_string(), None),
    };

    let violations = invariants::check(&projection);
    if violations.is_empty() {
        tracing::info!(snapshot = %args.snapshot.display(), "snapshot satisfies invariants");
    } else {
        tracing::warn!(
            snapshot = %args.snapshot.display(),
            violations = violations.len(),
            "snapshot breaks invariants"
        );
    }
    print_json(&json!({
        "snapshot": args.snapshot.display().to_string(),
        "valid": violations.is_empty(),
        "violations": violations
            .iter()
            .map(|v| json!({ "check": v.check, "detail": v.detail }))
            .collect::<Vec<_>>(),
    }));

    if violations.is_empty() { 0 } else { 1 }
}
