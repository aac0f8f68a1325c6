//! The interface the core needs from each external system.
//!
//! Implementations own everything protocol-specific: talking to the remote
//! API, translating native records into [`CanonicalItem`]s, and resolving
//! reference data. They must key items consistently across calls (document
//! id when linked, tracker id otherwise) and enforce their own timeouts.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use tandem_core::{CanonicalItem, SnapshotMap, System};

use crate::error::CollaboratorError;

/// How much of a system to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchScope {
    Full,
    /// Only records edited at or after the timestamp.
    Since(DateTime<Utc>),
}

/// Result of one fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fetched {
    pub items: SnapshotMap,
    /// Keys deleted or archived within the fetch window. Always empty for
    /// [`FetchScope::Full`].
    pub removed: BTreeSet<String>,
}

impl Fetched {
    pub fn full(items: SnapshotMap) -> Self {
        Self {
            items,
            removed: BTreeSet::new(),
        }
    }
}

pub trait Collaborator: Send + Sync {
    fn system(&self) -> System;

    fn fetch(&self, scope: FetchScope) -> Result<Fetched, CollaboratorError>;

    /// Create `item` and return it with this system's id populated.
    fn create(&self, item: &CanonicalItem) -> Result<CanonicalItem, CollaboratorError>;

    /// Overwrite record `id` with `item`. With `expensive_text_update` false
    /// the stored body is left as is.
    fn update(
        &self,
        id: &str,
        item: &CanonicalItem,
        expensive_text_update: bool,
    ) -> Result<(), CollaboratorError>;

    /// Delete or archive record `id`.
    fn delete(&self, id: &str) -> Result<(), CollaboratorError>;
}
