//! Human-readable preview of planned actions for `tandem plan`.

use similar::TextDiff;

use tandem_core::CanonicalItem;

use crate::engine::{ActionKind, ReconcileAction};

/// One field that an update would change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub field: &'static str,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionPreview {
    pub headline: String,
    pub changes: Vec<FieldChange>,
    /// Unified diff of the description when the body would be rewritten.
    pub description_diff: Option<String>,
}

/// Describe `action` against what its target currently holds.
///
/// `current` is the target's copy of the item; it is `None` for creates
/// and when the target no longer reports the item.
pub fn describe(action: &ReconcileAction, current: Option<&CanonicalItem>) -> ActionPreview {
    let item = &action.item;
    let mut headline = format!("{} {} {:?}", action.kind, action.target, item.title);
    if action.conflict {
        headline.push_str(&format!(" (conflict, {} wins)", action.origin));
    }

    let (changes, description_diff) = match (action.kind, current) {
        (ActionKind::Update, Some(current)) => {
            let diff = action
                .expensive_text_update
                .then(|| description_diff(action, &current.description, &item.description));
            (field_changes(current, item), diff)
        }
        (ActionKind::Create, _) if !item.description.is_empty() => {
            (Vec::new(), Some(description_diff(action, "", &item.description)))
        }
        _ => (Vec::new(), None),
    };

    ActionPreview {
        headline,
        changes,
        description_diff,
    }
}

fn field_changes(current: &CanonicalItem, next: &CanonicalItem) -> Vec<FieldChange> {
    let join = |tags: &std::collections::BTreeSet<String>| {
        tags.iter().cloned().collect::<Vec<_>>().join(", ")
    };
    let email = |item: &CanonicalItem| {
        item.assignee
            .as_ref()
            .map(|u| u.email.clone())
            .unwrap_or_default()
    };
    let due = |item: &CanonicalItem| item.due_date.map(|d| d.to_string()).unwrap_or_default();

    let pairs = [
        ("title", current.title.clone(), next.title.clone()),
        ("status", current.status.clone(), next.status.clone()),
        ("priority", current.priority.clone(), next.priority.clone()),
        ("tags", join(&current.tags), join(&next.tags)),
        ("assignee", email(current), email(next)),
        ("due_date", due(current), due(next)),
    ];
    pairs
        .into_iter()
        .filter(|(_, from, to)| from != to)
        .map(|(field, from, to)| FieldChange { field, from, to })
        .collect()
}

fn description_diff(action: &ReconcileAction, old: &str, new: &str) -> String {
    let old_header = format!("{}/{}", action.target, action.key());
    let new_header = format!("{}/{}", action.origin, action.key());
    TextDiff::from_lines(old, new)
        .unified_diff()
        .header(&old_header, &new_header)
        .context_radius(3)
        .to_string()
}

#[cfg(test)]
mod tests {
    use tandem_core::System;

    use super::*;

    fn update(current: &CanonicalItem, next: CanonicalItem, expensive: bool) -> ActionPreview {
        let action = ReconcileAction {
            target: System::Tracker,
            origin: System::Documents,
            kind: ActionKind::Update,
            item: next,
            conflict: false,
            expensive_text_update: expensive,
        };
        describe(&action, Some(current))
    }

    fn item() -> CanonicalItem {
        CanonicalItem {
            id: "1".into(),
            secondary_id: "L1".into(),
            title: "Bug".into(),
            status: "Open".into(),
            description: "first line\nsecond line\n".into(),
            ..Default::default()
        }
    }

    #[test]
    fn lists_only_changed_fields() {
        let mut next = item();
        next.status = "Closed".into();
        let preview = update(&item(), next, false);
        assert_eq!(
            preview.changes,
            vec![FieldChange {
                field: "status",
                from: "Open".into(),
                to: "Closed".into(),
            }]
        );
        assert!(preview.description_diff.is_none());
        assert_eq!(preview.headline, "update tracker \"Bug\"");
    }

    #[test]
    fn expensive_update_renders_unified_diff() {
        let mut next = item();
        next.description = "first line\nchanged line\n".into();
        let preview = update(&item(), next, true);
        let diff = preview.description_diff.expect("diff");
        assert!(diff.contains("--- tracker/1"));
        assert!(diff.contains("+++ documents/1"));
        assert!(diff.contains("-second line"));
        assert!(diff.contains("+changed line"));
    }

    #[test]
    fn delete_has_headline_only() {
        let action = ReconcileAction {
            target: System::Documents,
            origin: System::Tracker,
            kind: ActionKind::Delete,
            item: item(),
            conflict: false,
            expensive_text_update: false,
        };
        let preview = describe(&action, Some(&item()));
        assert_eq!(preview.headline, "delete documents \"Bug\"");
        assert!(preview.changes.is_empty() && preview.description_diff.is_none());
    }
}
