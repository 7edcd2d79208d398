use std::path::PathBuf;

use cardflow_golden::{SuiteOptions, SuiteReport, Verdict, run_suite};
use clap::Args;
use serde_json::{Value, json};

use crate::util::{exit_error, print_json, print_trail};

#[derive(Args)]
pub struct GoldenArgs {
    /// Directory holding fixture JSON files
    #[arg(long, env = "CARDFLOW_FIXTURES_DIR", default_value = "golden/fixtures")]
    pub fixtures: PathBuf,

    /// Directory holding stored snapshots
    #[arg(long, env = "CARDFLOW_SNAPSHOTS_DIR", default_value = "golden/snapshots")]
    pub snapshots: PathBuf,

    /// Only run these fixture ids (repeatable)
    #[arg(long = "id")]
    pub ids: Vec<String>,

    /// Rewrite snapshots that are missing, stale or different
    #[arg(long)]
    pub update: bool,

    /// Print the last N events of every failing fixture to stderr
    #[arg(long, value_name = "N")]
    pub debug: Option<usize>,
}

pub fn run(args: GoldenArgs) -> i32 {
    let options = SuiteOptions {
        fixtures_dir: args.fixtures,
        snapshots_dir: args.snapshots,
        ids: args.ids,
        update: args.update,
    };
    let report = run_suite(&options).unwrap_or_else(|e| {
        exit_error(
            &e.to_string(),
            Some("Check --fixtures (CARDFLOW_FIXTURES_DIR) and any --id filters"),
        )
    });

    let failed = report.failures().count();
    if failed == 0 {
        tracing::info!(total = report.fixtures.len(), update = options.update, "golden suite passed");
    } else {
        tracing::warn!(total = report.fixtures.len(), failed, "golden suite failed");
    }
    print_json(&summary(&report));

    if let Some(n) = args.debug {
        for failure in report.failures() {
            print_trail(&failure.id, failure.tail(n));
        }
    }

    if report.all_passed() { 0 } else { 1 }
}

/// Machine-readable suite result printed on stdout.
fn summary(report: &SuiteReport) -> Value {
    let fixtures: Vec<Value> = report
        .fixtures
        .iter()
        .map(|f| {
            let (verdict, reasons) = match &f.verdict {
                Verdict::Passed => ("passed", Vec::new()),
                Verdict::Updated => ("updated", Vec::new()),
                Verdict::Failed(reasons) => ("failed", reasons.clone()),
            };
            json!({
                "id": f.id,
                "verdict": verdict,
                "projection_hash": f.projection_hash,
                "reasons": reasons,
            })
        })
        .collect();
    json!({
        "fixtures": fixtures,
        "total": report.fixtures.len(),
        "failed": report.failures().count(),
    })
}
