//! Golden-session regression tooling for the cardflow session engine.
//!
//! A fixture pins a seed, a baseline and an answer policy. Replaying it
//! yields a [`StableProjection`] that is checked by [`invariants::validate`]
//! and compared against a stored snapshot.

pub mod error;
pub mod fixture;
pub mod hash;
pub mod invariants;
pub mod policy;
pub mod projection;
pub mod run;
pub mod snapshot;
pub mod suite;

pub use error::GoldenError;
pub use fixture::{AnswerPolicy, Fixture};
pub use invariants::{InvariantReport, Violation};
pub use policy::{AnswerProfile, AnswerSampler};
pub use projection::{EventDigest, PROJECTION_VERSION, StableProjection};
pub use run::{RunOutput, run_fixture};
pub use snapshot::SnapshotStatus;
pub use suite::{FixtureReport, SuiteOptions, SuiteReport, Verdict, run_suite};
