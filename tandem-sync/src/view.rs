//! Comparison projection of a [`CanonicalItem`].

use std::collections::BTreeSet;

use chrono::NaiveDate;

use tandem_core::{CanonicalItem, System};

use crate::normalize::normalize;

/// The fields that decide whether two items are "the same value".
///
/// Identifiers and the record URL are left out: identity is settled by key
/// matching before views are built, and URLs differ per system by nature.
/// The description is normalized; everything else compares verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComparisonView<'a> {
    pub title: &'a str,
    pub status: &'a str,
    pub priority: &'a str,
    pub description: String,
    pub tags: &'a BTreeSet<String>,
    pub assignee: Option<String>,
    pub due_date: Option<NaiveDate>,
}

impl<'a> ComparisonView<'a> {
    pub fn of(item: &'a CanonicalItem, source: System) -> Self {
        Self {
            title: &item.title,
            status: &item.status,
            priority: &item.priority,
            description: normalize(&item.description, source),
            tags: &item.tags,
            assignee: item.assignee.as_ref().map(|u| u.email.to_lowercase()),
            due_date: item.due_date,
        }
    }
}
