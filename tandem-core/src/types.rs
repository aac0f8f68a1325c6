//! Domain types shared by every tandem crate.
//!
//! A [`CanonicalItem`] is the system-agnostic shape of one record. Both
//! collaborators translate their native schema into it, the engine compares
//! and merges it, and the baseline stores it verbatim.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Systems
// ---------------------------------------------------------------------------

/// One of the two independently-owned record stores kept in step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum System {
    /// System A: the document database. Owns `CanonicalItem::id`.
    Documents,
    /// System B: the issue tracker. Owns `CanonicalItem::secondary_id`.
    Tracker,
}

impl System {
    pub const ALL: [System; 2] = [System::Documents, System::Tracker];

    /// The counterpart system.
    pub fn other(self) -> System {
        match self {
            System::Documents => System::Tracker,
            System::Tracker => System::Documents,
        }
    }
}

impl fmt::Display for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            System::Documents => write!(f, "documents"),
            System::Tracker => write!(f, "tracker"),
        }
    }
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

/// Cross-system identity of a person. `email` is the join key both
/// collaborators resolve against their own user tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub email: String,
    #[serde(default)]
    pub name: String,
}

impl UserRef {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
        }
    }
}

/// A synchronizable record in its system-agnostic form.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CanonicalItem {
    /// Identifier in the document database; empty until created there.
    #[serde(default)]
    pub id: String,
    /// Identifier in the issue tracker; empty until created there.
    #[serde(default)]
    pub secondary_id: String,
    pub title: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub priority: String,
    /// Raw body text, written back verbatim.
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<UserRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    /// System-specific link to the record. Never compared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl CanonicalItem {
    /// Logical key shared across both snapshots and the baseline.
    ///
    /// The document id wins once it exists; tracker-only items are keyed by
    /// their tracker id. Returns `None` for an item with neither id.
    pub fn key(&self) -> Option<&str> {
        if !self.id.is_empty() {
            Some(&self.id)
        } else if !self.secondary_id.is_empty() {
            Some(&self.secondary_id)
        } else {
            None
        }
    }

    /// The identifier this item has in `system` (may be empty).
    pub fn id_in(&self, system: System) -> &str {
        match system {
            System::Documents => &self.id,
            System::Tracker => &self.secondary_id,
        }
    }

    /// Set the identifier this item has in `system`.
    pub fn set_id_in(&mut self, system: System, value: impl Into<String>) {
        match system {
            System::Documents => self.id = value.into(),
            System::Tracker => self.secondary_id = value.into(),
        }
    }

    /// Fill any empty id from `other`, leaving populated ids untouched.
    pub fn fill_ids_from(&mut self, other: &CanonicalItem) {
        if self.id.is_empty() {
            self.id.clone_from(&other.id);
        }
        if self.secondary_id.is_empty() {
            self.secondary_id.clone_from(&other.secondary_id);
        }
    }
}

/// A system's current items keyed by [`CanonicalItem::key`].
pub type SnapshotMap = BTreeMap<String, CanonicalItem>;

/// The last reconciled state both systems are believed to agree on.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Baseline {
    #[serde(default)]
    pub items: Vec<CanonicalItem>,
    /// Consecutive cycles an entry has been absent from both systems.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub missing_streaks: BTreeMap<String, u32>,
}

impl Baseline {
    pub fn new(items: Vec<CanonicalItem>) -> Self {
        Self {
            items,
            missing_streaks: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Entry with the given logical key.
    pub fn get(&self, key: &str) -> Option<&CanonicalItem> {
        self.items.iter().find(|item| item.key() == Some(key))
    }

    /// Position of the entry with the given logical key.
    pub fn position(&self, key: &str) -> Option<usize> {
        self.items.iter().position(|item| item.key() == Some(key))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn item(id: &str, secondary_id: &str) -> CanonicalItem {
        CanonicalItem {
            id: id.to_string(),
            secondary_id: secondary_id.to_string(),
            title: "Bug".to_string(),
            ..Default::default()
        }
    }

    #[rstest]
    #[case("1", "L1", Some("1"))]
    #[case("", "L1", Some("L1"))]
    #[case("1", "", Some("1"))]
    #[case("", "", None)]
    fn key_prefers_document_id(
        #[case] id: &str,
        #[case] secondary_id: &str,
        #[case] expected: Option<&str>,
    ) {
        assert_eq!(item(id, secondary_id).key(), expected);
    }

    #[test]
    fn fill_ids_keeps_populated_values() {
        let mut a = item("1", "");
        a.fill_ids_from(&item("9", "L1"));
        assert_eq!(a.id, "1");
        assert_eq!(a.secondary_id, "L1");
    }

    #[test]
    fn system_display_and_other() {
        assert_eq!(System::Documents.to_string(), "documents");
        assert_eq!(System::Tracker.other(), System::Documents);
    }

    #[test]
    fn baseline_serde_roundtrip_skips_empty_streaks() {
        let baseline = Baseline::new(vec![item("1", "L1")]);
        let yaml = serde_yaml::to_string(&baseline).expect("serialize");
        assert!(!yaml.contains("missing_streaks"));
        let back: Baseline = serde_yaml::from_str(&yaml).expect("deserialize");
        assert_eq!(back, baseline);
    }
}
