//! Executes a [`Reconciliation`] against the two collaborators.
//!
//! Writes are partitioned by target system; the two partitions run on
//! scoped threads, each applying its actions in plan order. A failing
//! action never stops the others. The report carries the next baseline with
//! every failure rolled back to its prior entry, so the following cycle sees
//! the same diff again and retries.

use std::thread;

use tandem_core::{Baseline, CanonicalItem, System};

use crate::collaborator::Collaborator;
use crate::engine::{ActionKind, ReconcileAction, Reconciliation};
use crate::error::ApplyError;

/// What a successful call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// `NoOp`: nothing was called.
    Skipped,
    /// Created in the target; the item carries both ids.
    Created(CanonicalItem),
    Updated,
    Deleted,
}

#[derive(Debug)]
pub struct ActionOutcome {
    pub action: ReconcileAction,
    pub result: Result<Applied, ApplyError>,
    /// Writing the new id back to the origin failed after a successful
    /// create. The item is on both sides regardless.
    pub link_error: Option<ApplyError>,
}

impl ActionOutcome {
    pub fn failed(&self) -> bool {
        self.result.is_err()
    }
}

#[derive(Debug, Default)]
pub struct ApplyReport {
    pub baseline: Baseline,
    /// One outcome per write action, in plan order.
    pub outcomes: Vec<ActionOutcome>,
}

impl ApplyReport {
    pub fn failures(&self) -> impl Iterator<Item = &ActionOutcome> {
        self.outcomes.iter().filter(|o| o.failed())
    }

    pub fn applied(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.failed()).count()
    }
}

pub struct Applier<'a> {
    documents: &'a dyn Collaborator,
    tracker: &'a dyn Collaborator,
}

impl<'a> Applier<'a> {
    pub fn new(documents: &'a dyn Collaborator, tracker: &'a dyn Collaborator) -> Self {
        Self { documents, tracker }
    }

    fn collaborator(&self, system: System) -> &'a dyn Collaborator {
        match system {
            System::Documents => self.documents,
            System::Tracker => self.tracker,
        }
    }

    /// Perform the single collaborator call `action` stands for.
    ///
    /// A create returns the item with the target-assigned id merged in;
    /// linking it back to the origin is [`Applier::link_back`].
    pub fn apply(&self, action: &ReconcileAction) -> Result<Applied, ApplyError> {
        let target = self.collaborator(action.target);
        match action.kind {
            ActionKind::NoOp => Ok(Applied::Skipped),
            ActionKind::Create => {
                let created = target.create(&action.item)?;
                let new_id = created.id_in(action.target);
                if new_id.is_empty() {
                    return Err(missing_id(action.target, &action.item));
                }
                let mut linked = action.item.clone();
                linked.set_id_in(action.target, new_id);
                Ok(Applied::Created(linked))
            }
            ActionKind::Update => {
                let id = target_id(action.target, &action.item)?;
                target.update(id, &action.item, action.expensive_text_update)?;
                Ok(Applied::Updated)
            }
            ActionKind::Delete => {
                let id = target_id(action.target, &action.item)?;
                target.delete(id)?;
                Ok(Applied::Deleted)
            }
        }
    }

    /// Record the counterpart id of a freshly created item in `origin`.
    pub fn link_back(&self, origin: System, linked: &CanonicalItem) -> Result<(), ApplyError> {
        let id = target_id(origin, linked)?;
        self.collaborator(origin).update(id, linked, false)?;
        Ok(())
    }

    fn run(&self, action: &ReconcileAction) -> ActionOutcome {
        let result = self.apply(action);
        let link_error = match &result {
            Ok(Applied::Created(linked)) => self.link_back(action.origin, linked).err(),
            _ => None,
        };
        match (&result, &link_error) {
            (Err(err), _) => tracing::warn!("{action} failed: {err}"),
            (Ok(_), Some(err)) => {
                tracing::warn!("{action}: linking back to {} failed: {err}", action.origin)
            }
            (Ok(_), None) => tracing::debug!("{action} applied"),
        }
        ActionOutcome {
            action: action.clone(),
            result,
            link_error,
        }
    }

    /// Apply every write in `plan` and derive the baseline to persist.
    ///
    /// `prior` is the baseline the plan was computed from; failed updates
    /// and deletes get their entry from it back.
    pub fn apply_plan(&self, plan: &Reconciliation, prior: &Baseline) -> ApplyReport {
        let (to_documents, to_tracker): (Vec<_>, Vec<_>) = plan
            .actions
            .iter()
            .enumerate()
            .filter(|(_, action)| action.is_write())
            .partition(|(_, action)| action.target == System::Documents);

        let run_all = |batch: Vec<(usize, &ReconcileAction)>| {
            batch
                .into_iter()
                .map(|(index, action)| (index, self.run(action)))
                .collect::<Vec<_>>()
        };

        let mut indexed = thread::scope(|scope| {
            let documents = scope.spawn(|| run_all(to_documents));
            let tracker = scope.spawn(|| run_all(to_tracker));
            let mut all = documents
                .join()
                .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
            all.extend(
                tracker
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic)),
            );
            all
        });
        indexed.sort_by_key(|(index, _)| *index);
        let outcomes: Vec<ActionOutcome> = indexed.into_iter().map(|(_, o)| o).collect();

        let mut baseline = plan.baseline.clone();
        for outcome in &outcomes {
            fold_outcome(&mut baseline, prior, outcome);
        }

        ApplyReport { baseline, outcomes }
    }
}

fn fold_outcome(baseline: &mut Baseline, prior: &Baseline, outcome: &ActionOutcome) {
    let item = &outcome.action.item;
    match (&outcome.result, outcome.action.kind) {
        (Ok(Applied::Created(linked)), _) => baseline.items.push(linked.clone()),
        (Ok(_), _) | (Err(_), ActionKind::Create | ActionKind::NoOp) => {}
        (Err(_), ActionKind::Update | ActionKind::Delete) => {
            if let Some(current) = baseline.items.iter().position(|e| same_item(e, item)) {
                baseline.items.remove(current);
            }
            if let Some(index) = prior.items.iter().position(|e| same_item(e, item)) {
                let at = index.min(baseline.items.len());
                baseline.items.insert(at, prior.items[index].clone());
            }
        }
    }
}

/// Both entries name the same item in at least one system.
fn same_item(a: &CanonicalItem, b: &CanonicalItem) -> bool {
    System::ALL.iter().any(|&system| {
        let id = a.id_in(system);
        !id.is_empty() && id == b.id_in(system)
    })
}

fn target_id(target: System, item: &CanonicalItem) -> Result<&str, ApplyError> {
    match item.id_in(target) {
        "" => Err(missing_id(target, item)),
        id => Ok(id),
    }
}

fn missing_id(target: System, item: &CanonicalItem) -> ApplyError {
    ApplyError::MissingTargetId {
        target,
        key: item.key().unwrap_or_default().to_string(),
    }
}
