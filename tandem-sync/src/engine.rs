//! Three-way reconciliation of the baseline against both current snapshots.
//!
//! [`reconcile`] is pure: it reads the previous [`Baseline`] and the two
//! snapshot maps and returns the write actions plus the next baseline. It
//! never mutates its inputs; the next baseline is built into a fresh `Vec`.
//!
//! ## Per baseline entry
//!
//! | documents | tracker | outcome                                              |
//! |-----------|---------|------------------------------------------------------|
//! | changed   | changed (differently) | conflict: documents wins, update tracker |
//! | changed   | changed (same value)  | no action, baseline follows          |
//! | changed   | same    | update tracker                                       |
//! | same      | changed | update documents                                     |
//! | same      | same    | no-op                                                |
//! | present   | missing | tracker deleted it: delete from documents            |
//! | missing   | present | documents deleted it: delete from tracker            |
//! | missing   | missing | anomaly; retired after `retire_after` cycles         |
//!
//! A matched record missing its counterpart's id also gets a cheap update
//! carrying both ids.
//!
//! Snapshot entries no baseline entry claimed are then either adopted (both
//! systems already report them) or created on the side that lacks them.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::Serialize;

use tandem_core::config::DEFAULT_RETIRE_AFTER;
use tandem_core::{Baseline, CanonicalItem, SnapshotMap, System};

use crate::view::ComparisonView;

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Create,
    Update,
    Delete,
    NoOp,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Create => write!(f, "create"),
            ActionKind::Update => write!(f, "update"),
            ActionKind::Delete => write!(f, "delete"),
            ActionKind::NoOp => write!(f, "noop"),
        }
    }
}

/// One unit of engine output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileAction {
    /// The system the collaborator call is made against.
    pub target: System,
    /// The system whose state drove the action: the winning side of an
    /// update, the side that lost the item for a delete, the side holding
    /// the new item for a create.
    pub origin: System,
    pub kind: ActionKind,
    pub item: CanonicalItem,
    /// Both sides changed; `origin` won by policy.
    pub conflict: bool,
    /// The body text differs from what the target holds and must be
    /// rewritten. When false the collaborator skips the body.
    pub expensive_text_update: bool,
}

impl ReconcileAction {
    pub fn key(&self) -> &str {
        self.item.key().unwrap_or_default()
    }

    /// Everything but `NoOp` reaches a collaborator.
    pub fn is_write(&self) -> bool {
        self.kind != ActionKind::NoOp
    }
}

impl fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {:?}", self.kind, self.target, self.key())?;
        if self.conflict {
            write!(f, " (conflict, {} wins)", self.origin)?;
        }
        Ok(())
    }
}

/// A condition that is not an ordinary diff and must stay observable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    /// The baseline holds an entry neither system reports. Kept.
    MissingFromBoth { key: String, streak: u32 },
    /// An entry missing from both systems for `streak` cycles. Dropped.
    Retired { key: String, streak: u32 },
    /// An item with neither id. `system` is `None` for a baseline entry.
    InvalidItem {
        system: Option<System>,
        title: String,
    },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::MissingFromBoth { key, streak } => {
                write!(f, "{key:?} missing from both systems ({streak} cycle(s))")
            }
            Anomaly::Retired { key, streak } => {
                write!(f, "{key:?} retired after {streak} cycle(s) missing from both systems")
            }
            Anomaly::InvalidItem {
                system: Some(system),
                title,
            } => write!(f, "{system} reported {title:?} without any id"),
            Anomaly::InvalidItem {
                system: None,
                title,
            } => write!(f, "baseline entry {title:?} has no id"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Consecutive cycles an entry may be missing from both systems before
    /// it leaves the baseline. `None` keeps it forever.
    pub retire_after: Option<u32>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            retire_after: Some(DEFAULT_RETIRE_AFTER),
        }
    }
}

/// Result of one [`reconcile`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Baseline-matched actions in baseline order, then creates.
    pub actions: Vec<ReconcileAction>,
    /// Next baseline, excluding items still waiting on a Create round trip.
    pub baseline: Baseline,
    pub anomalies: Vec<Anomaly>,
}

impl Reconciliation {
    /// Actions that call a collaborator.
    pub fn writes(&self) -> impl Iterator<Item = &ReconcileAction> {
        self.actions.iter().filter(|a| a.is_write())
    }

    pub fn count(&self, kind: ActionKind) -> usize {
        self.actions.iter().filter(|a| a.kind == kind).count()
    }

    pub fn conflicts(&self) -> usize {
        self.actions.iter().filter(|a| a.conflict).count()
    }
}

// ---------------------------------------------------------------------------
// Snapshot index
// ---------------------------------------------------------------------------

/// Read-only lookup over one snapshot that remembers which entries have
/// been matched, so no entry is claimed twice in one pass.
struct SideIndex<'a> {
    system: System,
    items: &'a SnapshotMap,
    /// `secondary_id` → map key, for entries keyed by their document id.
    aliases: HashMap<&'a str, &'a str>,
    invalid: BTreeSet<&'a str>,
    claimed: BTreeSet<&'a str>,
}

impl<'a> SideIndex<'a> {
    fn new(system: System, items: &'a SnapshotMap) -> Self {
        let mut aliases = HashMap::new();
        let mut invalid = BTreeSet::new();
        for (key, item) in items {
            if item.key().is_none() {
                invalid.insert(key.as_str());
                continue;
            }
            if !item.secondary_id.is_empty() && item.secondary_id != *key {
                aliases.insert(item.secondary_id.as_str(), key.as_str());
            }
        }
        Self {
            system,
            items,
            aliases,
            invalid,
            claimed: BTreeSet::new(),
        }
    }

    fn available(&self, key: &str) -> bool {
        !self.invalid.contains(key) && !self.claimed.contains(key)
    }

    fn find(&self, probe: &CanonicalItem) -> Option<&'a str> {
        for candidate in [probe.id.as_str(), probe.secondary_id.as_str()] {
            if candidate.is_empty() {
                continue;
            }
            if let Some((key, _)) = self.items.get_key_value(candidate) {
                if self.available(key) {
                    return Some(key.as_str());
                }
            }
        }
        if probe.secondary_id.is_empty() {
            return None;
        }
        self.aliases
            .get(probe.secondary_id.as_str())
            .copied()
            .filter(|key| self.available(key))
    }

    fn claim(&mut self, probe: &CanonicalItem) -> Option<&'a CanonicalItem> {
        let key = self.find(probe)?;
        self.claimed.insert(key);
        self.items.get(key)
    }

    fn unclaimed(&self) -> Vec<&'a CanonicalItem> {
        self.items
            .iter()
            .filter(|(key, _)| self.available(key))
            .map(|(_, item)| item)
            .collect()
    }

    fn invalid_anomalies(&self) -> impl Iterator<Item = Anomaly> + '_ {
        self.invalid.iter().filter_map(|key| {
            self.items.get(*key).map(|item| Anomaly::InvalidItem {
                system: Some(self.system),
                title: item.title.clone(),
            })
        })
    }
}

// ---------------------------------------------------------------------------
// reconcile
// ---------------------------------------------------------------------------

/// Diff `baseline` against both snapshots and decide what to write.
pub fn reconcile(
    baseline: &Baseline,
    documents: &SnapshotMap,
    tracker: &SnapshotMap,
    options: &EngineOptions,
) -> Reconciliation {
    let mut docs = SideIndex::new(System::Documents, documents);
    let mut trk = SideIndex::new(System::Tracker, tracker);

    let mut actions = Vec::new();
    let mut items = Vec::with_capacity(baseline.items.len());
    let mut missing_streaks = BTreeMap::new();
    let mut anomalies: Vec<Anomaly> = docs
        .invalid_anomalies()
        .chain(trk.invalid_anomalies())
        .collect();

    for entry in &baseline.items {
        let Some(key) = entry.key() else {
            anomalies.push(Anomaly::InvalidItem {
                system: None,
                title: entry.title.clone(),
            });
            continue;
        };

        match (docs.claim(entry), trk.claim(entry)) {
            (Some(a), Some(b)) => {
                let (action, kept) = resolve(entry, a, b);
                actions.extend(action);
                items.push(kept);
            }
            (Some(a), None) => actions.push(delete(System::Documents, merged(entry, &[a]))),
            (None, Some(b)) => actions.push(delete(System::Tracker, merged(entry, &[b]))),
            (None, None) => {
                let streak = baseline.missing_streaks.get(key).copied().unwrap_or(0) + 1;
                if options.retire_after.is_some_and(|limit| streak >= limit) {
                    anomalies.push(Anomaly::Retired {
                        key: key.to_string(),
                        streak,
                    });
                } else {
                    anomalies.push(Anomaly::MissingFromBoth {
                        key: key.to_string(),
                        streak,
                    });
                    missing_streaks.insert(key.to_string(), streak);
                    items.push(entry.clone());
                }
            }
        }
    }

    let mut creates = Vec::new();
    for a in docs.unclaimed() {
        match trk.claim(a) {
            Some(b) => {
                // Both systems already hold it but the baseline does not.
                let (action, kept) = resolve(&seed_entry(a, b), a, b);
                actions.extend(action.into_iter().filter(ReconcileAction::is_write));
                items.push(kept);
            }
            None => creates.push(create(System::Tracker, a)),
        }
    }
    for b in trk.unclaimed() {
        creates.push(create(System::Documents, b));
    }
    actions.extend(creates);

    Reconciliation {
        actions,
        baseline: Baseline {
            items,
            missing_streaks,
        },
        anomalies,
    }
}

/// First-run baseline built from both full snapshots.
///
/// Every item both systems report becomes one merged entry carrying the
/// documents' field values, so any disagreement found by the first
/// [`reconcile`] reads as a tracker-side change and updates the documents.
/// Items only one system reports are left out and go through Create.
pub fn seed_baseline(documents: &SnapshotMap, tracker: &SnapshotMap) -> Baseline {
    let docs = SideIndex::new(System::Documents, documents);
    let mut trk = SideIndex::new(System::Tracker, tracker);
    let items = docs
        .unclaimed()
        .into_iter()
        .filter_map(|a| trk.claim(a).map(|b| seed_entry(a, b)))
        .collect();
    Baseline::new(items)
}

fn seed_entry(a: &CanonicalItem, b: &CanonicalItem) -> CanonicalItem {
    merged(a, &[b])
}

/// Decide one item both systems report against its baseline entry.
fn resolve(
    base: &CanonicalItem,
    a: &CanonicalItem,
    b: &CanonicalItem,
) -> (Vec<ReconcileAction>, CanonicalItem) {
    let va = ComparisonView::of(a, System::Documents);
    let vb = ComparisonView::of(b, System::Tracker);
    let vbase = ComparisonView::of(base, System::Documents);
    let text_differs = va.description != vb.description;

    let a_changed = va != vbase;
    let b_changed = vb != vbase;
    let merged_a = merged(a, &[b, base]);

    let (primary, kept) = if va != vb && a_changed && b_changed {
        let action = update(System::Tracker, merged_a.clone(), true, text_differs);
        (Some(action), merged_a.clone())
    } else if va == vb && a_changed {
        (None, merged_a.clone())
    } else if a_changed {
        let action = update(System::Tracker, merged_a.clone(), false, text_differs);
        (Some(action), merged_a.clone())
    } else if b_changed {
        let merged_b = merged(b, &[a, base]);
        let action = update(System::Documents, merged_b.clone(), false, text_differs);
        (Some(action), merged_b)
    } else {
        (None, merged(base, &[a, b]))
    };

    let written = primary.as_ref().map(|action| action.target);
    let mut actions: Vec<ReconcileAction> = primary.into_iter().collect();
    actions.extend(link_repairs(a, b, &kept, written));

    if actions.is_empty() && !a_changed {
        actions.push(ReconcileAction {
            target: System::Documents,
            origin: System::Documents,
            kind: ActionKind::NoOp,
            item: merged_a,
            conflict: false,
            expensive_text_update: false,
        });
    }
    (actions, kept)
}

/// Cheap updates for records that lack their counterpart's id, as left
/// behind by a failed link-back. A side already being written is skipped:
/// that update carries both ids.
fn link_repairs(
    a: &CanonicalItem,
    b: &CanonicalItem,
    kept: &CanonicalItem,
    written: Option<System>,
) -> Vec<ReconcileAction> {
    [(System::Documents, a), (System::Tracker, b)]
        .into_iter()
        .filter(|(side, current)| {
            let counterpart = side.other();
            written != Some(*side)
                && current.id_in(counterpart).is_empty()
                && !kept.id_in(counterpart).is_empty()
        })
        .map(|(side, current)| update(side, merged(current, &[kept]), false, false))
        .collect()
}

fn merged(primary: &CanonicalItem, others: &[&CanonicalItem]) -> CanonicalItem {
    let mut item = primary.clone();
    for other in others {
        item.fill_ids_from(other);
    }
    item
}

fn update(
    target: System,
    item: CanonicalItem,
    conflict: bool,
    expensive_text_update: bool,
) -> ReconcileAction {
    ReconcileAction {
        target,
        origin: target.other(),
        kind: ActionKind::Update,
        item,
        conflict,
        expensive_text_update,
    }
}

fn delete(target: System, item: CanonicalItem) -> ReconcileAction {
    ReconcileAction {
        target,
        origin: target.other(),
        kind: ActionKind::Delete,
        item,
        conflict: false,
        expensive_text_update: false,
    }
}

fn create(target: System, item: &CanonicalItem) -> ReconcileAction {
    ReconcileAction {
        target,
        origin: target.other(),
        kind: ActionKind::Create,
        item: item.clone(),
        conflict: false,
        expensive_text_update: true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
