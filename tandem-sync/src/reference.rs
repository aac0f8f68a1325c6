//! Reference data (status, label and user tables) and its expiring cache.
//!
//! Collaborators need these tables to translate canonical names into native
//! ids. They change rarely, so each collaborator holds a [`ReferenceCache`]
//! injected at construction and refreshes it when the TTL has elapsed,
//! independent of reconciliation cycles. The engine never reads them.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;

pub const DEFAULT_STATUS: &str = "To Do";

/// A person as one system knows them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub email: String,
}

/// Lookup tables for one system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceData {
    /// Status name → native id.
    #[serde(default)]
    pub statuses: BTreeMap<String, String>,
    /// Label name → native id.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub users: Vec<UserEntry>,
    /// Status used for records whose status id is unknown.
    #[serde(default = "default_status")]
    pub default_status: String,
}

fn default_status() -> String {
    DEFAULT_STATUS.to_string()
}

impl Default for ReferenceData {
    fn default() -> Self {
        Self {
            statuses: BTreeMap::new(),
            labels: BTreeMap::new(),
            users: Vec::new(),
            default_status: default_status(),
        }
    }
}

impl ReferenceData {
    pub fn status_id(&self, name: &str) -> Option<&str> {
        self.statuses.get(name).map(String::as_str)
    }

    pub fn status_name(&self, id: &str) -> Option<&str> {
        self.statuses
            .iter()
            .find(|(_, v)| v.as_str() == id)
            .map(|(k, _)| k.as_str())
    }

    pub fn label_id(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }

    pub fn label_name(&self, id: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(_, v)| v.as_str() == id)
            .map(|(k, _)| k.as_str())
    }

    /// Match by email, case-insensitively.
    pub fn user_by_email(&self, email: &str) -> Option<&UserEntry> {
        self.users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
    }

    pub fn user_by_id(&self, id: &str) -> Option<&UserEntry> {
        self.users.iter().find(|u| u.id == id)
    }
}

/// Anything that can produce fresh reference data.
pub trait ReferenceSource {
    fn resolve(&self) -> Result<ReferenceData, CollaboratorError>;
}

struct Cached<T> {
    value: T,
    fetched_at: DateTime<Utc>,
}

/// `{value, fetched_at}` refreshed once `now - fetched_at > ttl`.
pub struct ReferenceCache<T> {
    ttl: Duration,
    slot: Mutex<Option<Cached<T>>>,
}

impl<T: Clone> ReferenceCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached value, refreshed through `fetch` when empty or expired.
    ///
    /// A failed refresh falls back to the stale value when one exists.
    pub fn get_or_refresh<F>(&self, now: DateTime<Utc>, fetch: F) -> Result<T, CollaboratorError>
    where
        F: FnOnce() -> Result<T, CollaboratorError>,
    {
        let mut slot = self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(cached) = slot.as_ref() {
            if !self.expired(cached.fetched_at, now) {
                return Ok(cached.value.clone());
            }
        }

        match fetch() {
            Ok(value) => {
                *slot = Some(Cached {
                    value: value.clone(),
                    fetched_at: now,
                });
                tracing::info!("refreshed reference data");
                Ok(value)
            }
            Err(err) => match slot.as_ref() {
                Some(stale) => {
                    tracing::warn!("reference data refresh failed, keeping stale copy: {err}");
                    Ok(stale.value.clone())
                }
                None => Err(err),
            },
        }
    }

    /// Drop the cached value so the next read refetches.
    pub fn invalidate(&self) {
        *self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }

    fn expired(&self, fetched_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match (now - fetched_at).to_std() {
            Ok(age) => age > self.ttl,
            // Clock went backwards.
            Err(_) => false,
        }
    }
}
