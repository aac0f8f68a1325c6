//! # tandem-sync
//!
//! Bidirectional reconciliation between the document database and the
//! issue tracker.
//!
//! [`reconcile`] is the pure three-way diff; [`Applier`] executes its
//! actions; [`Orchestrator`] drives fetch → reconcile → apply → persist
//! cycles over any pair of [`Collaborator`]s. [`LocalStore`] is the
//! file-backed collaborator used by the daemon and CLI.

pub mod applier;
pub mod baseline;
pub mod collaborator;
pub mod cycle;
pub mod engine;
pub mod error;
pub mod local;
pub mod normalize;
pub mod preview;
pub mod reference;
pub mod view;

pub use applier::{ActionOutcome, Applied, Applier, ApplyReport};
pub use baseline::{BaselineStore, JsonBaselineStore, MemoryBaselineStore, StoredBaseline};
pub use collaborator::{Collaborator, FetchScope, Fetched};
pub use cycle::{CycleReport, CycleSummary, Orchestrator, Phase, Plan};
pub use engine::{
    reconcile, seed_baseline, ActionKind, Anomaly, EngineOptions, ReconcileAction, Reconciliation,
};
pub use error::{ApplyError, CollaboratorError, SyncError};
pub use local::LocalStore;
pub use normalize::normalize;
pub use reference::{ReferenceCache, ReferenceData, ReferenceSource};
pub use view::ComparisonView;
