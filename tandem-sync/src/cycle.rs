//! Cycle orchestrator: fetch → reconcile → apply → persist.
//!
//! [`Orchestrator`] is a two-state machine. It starts in
//! [`Phase::FirstRun`], which fetches full snapshots and seeds the baseline
//! when the store has none. After the first cycle that got both snapshots it
//! moves to [`Phase::Incremental`] and fetches only what changed since the
//! previous cycle started, merging the deltas into per-system replicas so
//! reconciliation always sees complete snapshots.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tandem_core::{Baseline, CanonicalItem, Config, SnapshotMap, System};

use crate::applier::{ActionOutcome, Applied, Applier};
use crate::baseline::{BaselineStore, JsonBaselineStore, StoredBaseline};
use crate::collaborator::{Collaborator, FetchScope, Fetched};
use crate::engine::{reconcile, seed_baseline, ActionKind, EngineOptions, Reconciliation};
use crate::error::SyncError;
use crate::local::LocalStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    FirstRun,
    /// Fetch only records edited at or after `since`.
    Incremental { since: DateTime<Utc> },
}

impl Phase {
    fn scope(self) -> FetchScope {
        match self {
            Phase::FirstRun => FetchScope::Full,
            Phase::Incremental { since } => FetchScope::Since(since),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::FirstRun => write!(f, "first-run"),
            Phase::Incremental { since } => write!(f, "incremental since {}", since.to_rfc3339()),
        }
    }
}

/// A reconciliation computed but not applied.
#[derive(Debug, Clone)]
pub struct Plan {
    pub reconciliation: Reconciliation,
    /// True when no stored baseline existed and one was seeded.
    pub seeded: bool,
    pub documents: SnapshotMap,
    pub tracker: SnapshotMap,
}

impl Plan {
    /// What `system` currently holds for `key`.
    pub fn current(&self, system: System, key: &str) -> Option<&CanonicalItem> {
        match system {
            System::Documents => self.documents.get(key),
            System::Tracker => self.tracker.get(key),
        }
    }
}

#[derive(Debug)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub first_run: bool,
    pub seeded: bool,
    pub reconciliation: Reconciliation,
    pub outcomes: Vec<ActionOutcome>,
    pub baseline_len: usize,
}

impl CycleReport {
    fn succeeded(&self, kind: ActionKind) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.action.kind == kind && !o.failed())
            .count()
    }

    pub fn summary(&self) -> CycleSummary {
        CycleSummary {
            started_at: self.started_at,
            first_run: self.first_run,
            seeded: self.seeded,
            created: self.succeeded(ActionKind::Create),
            updated: self.succeeded(ActionKind::Update),
            deleted: self.succeeded(ActionKind::Delete),
            noops: self.reconciliation.count(ActionKind::NoOp),
            conflicts: self.reconciliation.conflicts(),
            failed: self.outcomes.iter().filter(|o| o.failed()).count(),
            anomalies: self.reconciliation.anomalies.len(),
            baseline_items: self.baseline_len,
        }
    }
}

/// Counters for one finished cycle, as reported over the daemon socket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleSummary {
    pub started_at: DateTime<Utc>,
    pub first_run: bool,
    pub seeded: bool,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub noops: usize,
    pub conflicts: usize,
    pub failed: usize,
    pub anomalies: usize,
    pub baseline_items: usize,
}

impl fmt::Display for CycleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} deleted, {} unchanged, {} failed",
            self.created, self.updated, self.deleted, self.noops, self.failed
        )?;
        if self.conflicts > 0 {
            write!(f, ", {} conflict(s)", self.conflicts)?;
        }
        if self.anomalies > 0 {
            write!(f, ", {} anomaly(ies)", self.anomalies)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Replicas {
    documents: SnapshotMap,
    tracker: SnapshotMap,
}

impl Replicas {
    fn get_mut(&mut self, system: System) -> &mut SnapshotMap {
        match system {
            System::Documents => &mut self.documents,
            System::Tracker => &mut self.tracker,
        }
    }
}

pub struct Orchestrator {
    documents: Arc<dyn Collaborator>,
    tracker: Arc<dyn Collaborator>,
    store: Box<dyn BaselineStore>,
    options: EngineOptions,
    phase: Phase,
    replicas: Replicas,
}

impl Orchestrator {
    pub fn new(
        documents: Arc<dyn Collaborator>,
        tracker: Arc<dyn Collaborator>,
        store: Box<dyn BaselineStore>,
    ) -> Self {
        Self {
            documents,
            tracker,
            store,
            options: EngineOptions::default(),
            phase: Phase::FirstRun,
            replicas: Replicas::default(),
        }
    }

    /// Orchestrator over the configured local store files, with the baseline
    /// at `<home>/.tandem/baseline.json`.
    pub fn from_config(config: &Config, home: &Path) -> Self {
        let ttl = config.reference_ttl();
        let documents = LocalStore::with_ttl(System::Documents, &config.documents.path, ttl);
        let tracker = LocalStore::with_ttl(System::Tracker, &config.tracker.path, ttl);
        Self::new(
            Arc::new(documents),
            Arc::new(tracker),
            Box::new(JsonBaselineStore::at(home)),
        )
        .with_options(EngineOptions {
            retire_after: config.retire_after,
        })
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The last persisted baseline, if any.
    pub fn stored_baseline(&self) -> Result<Option<StoredBaseline>, SyncError> {
        self.store.load()
    }

    /// Fetch and reconcile without applying or persisting anything.
    pub fn plan(&mut self) -> Result<Plan, SyncError> {
        let (_, seeded, reconciliation) = self.fetch_and_reconcile()?;
        Ok(Plan {
            reconciliation,
            seeded,
            documents: self.replicas.documents.clone(),
            tracker: self.replicas.tracker.clone(),
        })
    }

    /// Run one full cycle.
    ///
    /// A fetch failure aborts before anything is written and leaves the
    /// phase as it was. Individual apply failures are reported in the
    /// returned [`CycleReport`] and do not fail the cycle.
    pub fn run_cycle(&mut self) -> Result<CycleReport, SyncError> {
        let started_at = Utc::now();
        let first_run = self.phase == Phase::FirstRun;
        tracing::debug!("cycle started ({})", self.phase);

        let (prior, seeded, reconciliation) = self.fetch_and_reconcile()?;
        if seeded {
            self.store
                .save(&StoredBaseline::new(started_at, prior.clone()))?;
            tracing::info!("seeded baseline with {} item(s)", prior.len());
        }
        for anomaly in &reconciliation.anomalies {
            tracing::warn!("{anomaly}");
        }

        let report = Applier::new(self.documents.as_ref(), self.tracker.as_ref())
            .apply_plan(&reconciliation, &prior);
        for outcome in &report.outcomes {
            self.fold_into_replicas(outcome);
        }

        self.phase = Phase::Incremental { since: started_at };
        let baseline_len = report.baseline.len();
        self.store
            .save(&StoredBaseline::new(started_at, report.baseline))?;

        let cycle = CycleReport {
            started_at,
            first_run,
            seeded,
            reconciliation,
            outcomes: report.outcomes,
            baseline_len,
        };
        tracing::info!("cycle finished: {}", cycle.summary());
        Ok(cycle)
    }

    fn fetch_and_reconcile(&mut self) -> Result<(Baseline, bool, Reconciliation), SyncError> {
        let scope = self.phase.scope();
        let documents = fetch(self.documents.as_ref(), scope)?;
        let tracker = fetch(self.tracker.as_ref(), scope)?;
        match scope {
            FetchScope::Full => {
                self.replicas.documents = documents.items;
                self.replicas.tracker = tracker.items;
            }
            FetchScope::Since(_) => {
                merge(&mut self.replicas.documents, documents);
                merge(&mut self.replicas.tracker, tracker);
            }
        }

        let (prior, seeded) = match self.store.load()? {
            Some(stored) => (stored.baseline, false),
            None => (
                seed_baseline(&self.replicas.documents, &self.replicas.tracker),
                true,
            ),
        };
        let reconciliation = reconcile(
            &prior,
            &self.replicas.documents,
            &self.replicas.tracker,
            &self.options,
        );
        Ok((prior, seeded, reconciliation))
    }

    /// Reflect a successful write in the replicas so they match what the
    /// systems now hold without waiting for the next fetch.
    fn fold_into_replicas(&mut self, outcome: &ActionOutcome) {
        let action = &outcome.action;
        match &outcome.result {
            Ok(Applied::Created(linked)) => {
                upsert(self.replicas.get_mut(action.target), linked.clone());
                if outcome.link_error.is_none() {
                    upsert(self.replicas.get_mut(action.origin), linked.clone());
                }
            }
            Ok(Applied::Updated) => upsert(self.replicas.get_mut(action.target), action.item.clone()),
            Ok(Applied::Deleted) => evict(self.replicas.get_mut(action.target), &action.item),
            Ok(Applied::Skipped) | Err(_) => {}
        }
    }
}

fn fetch(collaborator: &dyn Collaborator, scope: FetchScope) -> Result<Fetched, SyncError> {
    let system = collaborator.system();
    collaborator
        .fetch(scope)
        .map_err(|source| SyncError::Fetch { system, source })
}

fn merge(replica: &mut SnapshotMap, delta: Fetched) {
    for key in &delta.removed {
        replica.remove(key);
    }
    for (key, item) in delta.items {
        if !item.secondary_id.is_empty() && item.secondary_id != key {
            replica.remove(&item.secondary_id);
        }
        replica.insert(key, item);
    }
}

fn upsert(replica: &mut SnapshotMap, item: CanonicalItem) {
    let Some(key) = item.key().map(str::to_string) else {
        return;
    };
    if !item.secondary_id.is_empty() && item.secondary_id != key {
        replica.remove(&item.secondary_id);
    }
    replica.insert(key, item);
}

fn evict(replica: &mut SnapshotMap, item: &CanonicalItem) {
    for id in [&item.id, &item.secondary_id] {
        if !id.is_empty() {
            replica.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    use super::*;
    use crate::baseline::MemoryBaselineStore;
    use crate::error::CollaboratorError;

    /// In-memory system with a switchable fetch failure.
    struct Memory {
        system: System,
        items: Mutex<SnapshotMap>,
        fail_fetch: Mutex<bool>,
        scopes: Mutex<Vec<FetchScope>>,
    }

    impl Memory {
        fn new(system: System, items: impl IntoIterator<Item = CanonicalItem>) -> Arc<Self> {
            Arc::new(Self {
                system,
                items: Mutex::new(
                    items
                        .into_iter()
                        .map(|item| (item.key().expect("key").to_string(), item))
                        .collect(),
                ),
                fail_fetch: Mutex::new(false),
                scopes: Mutex::new(Vec::new()),
            })
        }

        fn set_fail(&self, fail: bool) {
            *self.fail_fetch.lock().expect("lock") = fail;
        }

        fn scopes(&self) -> Vec<FetchScope> {
            self.scopes.lock().expect("lock").clone()
        }
    }

    impl Collaborator for Memory {
        fn system(&self) -> System {
            self.system
        }

        fn fetch(&self, scope: FetchScope) -> Result<Fetched, CollaboratorError> {
            self.scopes.lock().expect("lock").push(scope);
            if *self.fail_fetch.lock().expect("lock") {
                return Err(CollaboratorError::Rejected("offline".into()));
            }
            let items = self.items.lock().expect("lock").clone();
            Ok(match scope {
                FetchScope::Full => Fetched::full(items),
                // Deltas are empty: nothing changes behind the test's back.
                FetchScope::Since(_) => Fetched {
                    items: SnapshotMap::new(),
                    removed: BTreeSet::new(),
                },
            })
        }

        fn create(&self, item: &CanonicalItem) -> Result<CanonicalItem, CollaboratorError> {
            let mut created = item.clone();
            created.set_id_in(self.system, format!("{}-{}", self.system, item.title));
            upsert(&mut self.items.lock().expect("lock"), created.clone());
            Ok(created)
        }

        fn update(&self, _id: &str, item: &CanonicalItem, _: bool) -> Result<(), CollaboratorError> {
            upsert(&mut self.items.lock().expect("lock"), item.clone());
            Ok(())
        }

        fn delete(&self, id: &str) -> Result<(), CollaboratorError> {
            self.items.lock().expect("lock").remove(id);
            Ok(())
        }
    }

    fn item(id: &str, secondary_id: &str, title: &str, status: &str) -> CanonicalItem {
        CanonicalItem {
            id: id.into(),
            secondary_id: secondary_id.into(),
            title: title.into(),
            status: status.into(),
            ..Default::default()
        }
    }

    #[test]
    fn first_cycle_seeds_then_switches_to_incremental() {
        let docs = Memory::new(System::Documents, [item("1", "L1", "Bug", "Open")]);
        let tracker = Memory::new(System::Tracker, [item("1", "L1", "Bug", "Open")]);
        let mut orch = Orchestrator::new(
            docs.clone(),
            tracker.clone(),
            Box::new(MemoryBaselineStore::new()),
        );

        let report = orch.run_cycle().expect("cycle");
        assert!(report.first_run && report.seeded);
        assert_eq!(report.baseline_len, 1);
        assert_eq!(report.summary().noops, 1);
        assert!(matches!(orch.phase(), Phase::Incremental { since } if since == report.started_at));

        let second = orch.run_cycle().expect("cycle");
        assert!(!second.first_run && !second.seeded);
        assert_eq!(second.reconciliation.writes().count(), 0);
        assert!(matches!(docs.scopes()[1], FetchScope::Since(_)));
    }

    #[test]
    fn fetch_failure_keeps_first_run_and_baseline() {
        let docs = Memory::new(System::Documents, [item("1", "L1", "Bug", "Open")]);
        let tracker = Memory::new(System::Tracker, []);
        tracker.set_fail(true);
        let mut orch = Orchestrator::new(docs, tracker.clone(), Box::new(MemoryBaselineStore::new()));

        let err = orch.run_cycle().unwrap_err();
        assert!(matches!(err, SyncError::Fetch { system: System::Tracker, .. }));
        assert_eq!(orch.phase(), Phase::FirstRun);
        assert!(orch.stored_baseline().expect("load").is_none());

        tracker.set_fail(false);
        let report = orch.run_cycle().expect("retry");
        assert!(report.first_run);
    }

    #[test]
    fn creates_are_folded_into_replicas() {
        let docs = Memory::new(System::Documents, [item("1", "", "New", "Open")]);
        let tracker = Memory::new(System::Tracker, []);
        let mut orch = Orchestrator::new(docs, tracker, Box::new(MemoryBaselineStore::new()));

        let first = orch.run_cycle().expect("cycle");
        assert_eq!(first.summary().created, 1);
        let stored = orch.stored_baseline().expect("load").expect("baseline");
        assert_eq!(stored.baseline.items[0].secondary_id, "tracker-New");

        // Incremental fetches return nothing; replicas must already hold
        // the linked item on both sides.
        let second = orch.run_cycle().expect("cycle");
        assert_eq!(second.reconciliation.writes().count(), 0);
        assert_eq!(second.summary().noops, 1);
    }

    #[test]
    fn plan_does_not_write_or_advance() {
        let docs = Memory::new(System::Documents, [item("1", "L1", "Bug", "Closed")]);
        let tracker = Memory::new(System::Tracker, [item("1", "L1", "Bug", "Open")]);
        let store = MemoryBaselineStore::new();
        store
            .save(&StoredBaseline::new(
                Utc::now(),
                Baseline::new(vec![item("1", "L1", "Bug", "Open")]),
            ))
            .expect("save");
        let mut orch = Orchestrator::new(docs, tracker.clone(), Box::new(store));

        let plan = orch.plan().expect("plan");
        let writes: Vec<_> = plan.reconciliation.writes().collect();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].target, System::Tracker);
        assert_eq!(
            plan.current(System::Tracker, "1").map(|i| i.status.as_str()),
            Some("Open")
        );
        assert_eq!(orch.phase(), Phase::FirstRun);
        assert_eq!(tracker.items.lock().expect("lock")["1"].status, "Open");
    }

    #[test]
    fn incremental_merge_rekeys_and_removes() {
        let mut replica: SnapshotMap = [("L9".to_string(), item("", "L9", "T", "Open"))].into();
        let mut delta = Fetched::default();
        delta.items.insert("9".into(), item("9", "L9", "T", "Open"));
        merge(&mut replica, delta);
        assert_eq!(replica.keys().collect::<Vec<_>>(), vec!["9"]);

        let mut delta = Fetched::default();
        delta.removed.insert("9".into());
        merge(&mut replica, delta);
        assert!(replica.is_empty());
    }
}
