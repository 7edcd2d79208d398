//! Golden suite: replay fixtures, validate, compare with snapshots.

use std::path::PathBuf;
use std::sync::Arc;

use cardflow_core::Decks;
use cardflow_core::reference::decks;

use crate::error::GoldenError;
use crate::fixture::Fixture;
use crate::invariants;
use crate::projection::{EventDigest, StableProjection};
use crate::run::run_fixture;
use crate::snapshot::{self, SnapshotStatus};

#[derive(Debug, Clone)]
pub struct SuiteOptions {
    pub fixtures_dir: PathBuf,
    pub snapshots_dir: PathBuf,
    /// Restrict the run to these fixture ids; empty means all
    pub ids: Vec<String>,
    /// Rewrite snapshots instead of comparing against them
    pub update: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    Updated,
    Failed(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct FixtureReport {
    pub id: String,
    pub verdict: Verdict,
    pub projection_hash: Option<String>,
    /// Events of the run, for failure diagnostics
    pub events: Vec<EventDigest>,
}

impl FixtureReport {
    pub fn passed(&self) -> bool {
        !matches!(self.verdict, Verdict::Failed(_))
    }

    pub fn tail(&self, n: usize) -> &[EventDigest] {
        &self.events[self.events.len().saturating_sub(n)..]
    }
}

#[derive(Debug, Clone, Default)]
pub struct SuiteReport {
    pub fixtures: Vec<FixtureReport>,
}

impl SuiteReport {
    pub fn all_passed(&self) -> bool {
        self.fixtures.iter().all(FixtureReport::passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &FixtureReport> {
        self.fixtures.iter().filter(|f| !f.passed())
    }
}

/// Run the selected fixtures. Per-fixture failures land in the report;
/// only setup problems (unreadable fixtures, unknown ids) are errors.
pub fn run_suite(options: &SuiteOptions) -> Result<SuiteReport, GoldenError> {
    let mut fixtures = Fixture::load_dir(&options.fixtures_dir)?;
    if !options.ids.is_empty() {
        if let Some(unknown) = options
            .ids
            .iter()
            .find(|id| !fixtures.iter().any(|f| &f.id == *id))
        {
            return Err(GoldenError::fixture(unknown, "no fixture with this id"));
        }
        fixtures.retain(|f| options.ids.contains(&f.id));
    }

    let decks = decks()?;
    let mut report = SuiteReport::default();
    for fixture in &fixtures {
        let outcome = check_fixture(fixture, Arc::clone(&decks), options);
        match &outcome.verdict {
            Verdict::Failed(reasons) => {
                tracing::warn!(fixture = %outcome.id, reasons = reasons.len(), "golden fixture failed")
            }
            verdict => tracing::info!(fixture = %outcome.id, ?verdict, "golden fixture ok"),
        }
        report.fixtures.push(outcome);
    }
    Ok(report)
}

fn check_fixture(fixture: &Fixture, decks: Arc<Decks>, options: &SuiteOptions) -> FixtureReport {
    let mut report = FixtureReport {
        id: fixture.id.clone(),
        verdict: Verdict::Passed,
        projection_hash: None,
        events: Vec::new(),
    };

    let projection = match run_fixture(fixture, decks).and_then(|run| StableProjection::from_run(&run)) {
        Ok(projection) => projection,
        Err(e) => {
            report.events = e.trail().iter().map(EventDigest::from_event).collect();
            report.verdict = Verdict::Failed(vec![e.to_string()]);
            return report;
        }
    };
    report.projection_hash = projection.projection_hash().ok();
    report.events = projection.events.clone();

    let mut reasons: Vec<String> = match invariants::validate(&projection) {
        Ok(()) => Vec::new(),
        Err(invariant_report) => invariant_report
            .violations
            .iter()
            .map(ToString::to_string)
            .collect(),
    };

    let path = snapshot::snapshot_path(&options.snapshots_dir, &fixture.id);
    let status = snapshot::load(&path)
        .and_then(|stored| snapshot::compare(stored.as_ref(), &projection));

    report.verdict = match status {
        Err(e) => {
            reasons.push(e.to_string());
            Verdict::Failed(reasons)
        }
        Ok(status) if !reasons.is_empty() => {
            // Never pin a run that breaks invariants.
            if !status.is_match() {
                reasons.push(format!("snapshot not compared cleanly: {status:?}"));
            }
            Verdict::Failed(reasons)
        }
        Ok(SnapshotStatus::Match) => Verdict::Passed,
        Ok(_) if options.update => match snapshot::save(&path, &projection) {
            Ok(()) => Verdict::Updated,
            Err(e) => Verdict::Failed(vec![e.to_string()]),
        },
        Ok(SnapshotStatus::Missing) => Verdict::Failed(vec![format!(
            "snapshot missing at {}; rerun with --update",
            path.display()
        )]),
        Ok(SnapshotStatus::Stale { reason }) => {
            Verdict::Failed(vec![format!("snapshot is stale: {reason}")])
        }
        Ok(SnapshotStatus::Mismatch { paths }) => {
            Verdict::Failed(vec![format!("snapshot differs at: {}", paths.join(", "))])
        }
    };
    report
}
