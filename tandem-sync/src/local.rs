//! File-backed collaborator.
//!
//! [`LocalStore`] keeps one system's records in a single JSON document:
//!
//! ```text
//! {
//!   "records":   { "<native id>": StoredRecord, … },
//!   "reference": { "statuses": {…}, "labels": {…}, "users": […] }
//! }
//! ```
//!
//! Records use native ids for status, labels and assignee; translation to
//! and from [`CanonicalItem`] goes through the injected reference cache,
//! exactly as a remote API client would. Deletes archive the record so
//! incremental fetches can report them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tandem_core::{CanonicalItem, System, UserRef};

use crate::collaborator::{Collaborator, FetchScope, Fetched};
use crate::error::{store_io_err, CollaboratorError};
use crate::reference::{ReferenceCache, ReferenceData, ReferenceSource};

/// One record in its native shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    /// The counterpart system's id, empty until linked.
    #[serde(default)]
    pub link: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_id: Option<String>,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub label_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<NaiveDate>,
    pub edited_at: DateTime<Utc>,
    #[serde(default)]
    pub archived: bool,
}

/// The whole store document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreFile {
    #[serde(default)]
    pub records: BTreeMap<String, StoredRecord>,
    #[serde(default)]
    pub reference: ReferenceData,
}

/// Read a store document. A missing file is an empty store.
pub fn read_store(path: &Path) -> Result<StoreFile, CollaboratorError> {
    if !path.exists() {
        return Ok(StoreFile::default());
    }
    let contents = std::fs::read_to_string(path).map_err(|e| store_io_err(path, e))?;
    Ok(serde_json::from_str(&contents)?)
}

/// Atomically write a store document (`.tmp` + rename).
pub fn write_store(path: &Path, store: &StoreFile) -> Result<(), CollaboratorError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| store_io_err(dir, e))?;
    }
    let json = serde_json::to_string_pretty(store)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| store_io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(store_io_err(path, e));
    }
    Ok(())
}

pub struct LocalStore {
    system: System,
    path: PathBuf,
    reference: Arc<ReferenceCache<ReferenceData>>,
    guard: Mutex<()>,
}

impl LocalStore {
    pub fn new(
        system: System,
        path: impl Into<PathBuf>,
        reference: Arc<ReferenceCache<ReferenceData>>,
    ) -> Self {
        Self {
            system,
            path: path.into(),
            reference,
            guard: Mutex::new(()),
        }
    }

    /// Store with its own reference cache.
    pub fn with_ttl(system: System, path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self::new(system, path, Arc::new(ReferenceCache::new(ttl)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn reference_data(&self) -> Result<ReferenceData, CollaboratorError> {
        self.reference.get_or_refresh(Utc::now(), || self.resolve())
    }

    /// Load, mutate and save under the store lock.
    fn modify<T, F>(&self, f: F) -> Result<T, CollaboratorError>
    where
        F: FnOnce(&mut StoreFile) -> Result<T, CollaboratorError>,
    {
        let _lock = self
            .guard
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut store = read_store(&self.path)?;
        let out = f(&mut store)?;
        write_store(&self.path, &store)?;
        Ok(out)
    }

    fn to_canonical(&self, record: &StoredRecord, refs: &ReferenceData) -> CanonicalItem {
        let mut item = CanonicalItem {
            title: record.title.clone(),
            status: record
                .status_id
                .as_deref()
                .and_then(|id| refs.status_name(id))
                .unwrap_or(refs.default_status.as_str())
                .to_string(),
            priority: record.priority.clone(),
            description: record.body.clone(),
            tags: record
                .label_ids
                .iter()
                .filter_map(|id| refs.label_name(id))
                .map(str::to_string)
                .collect(),
            assignee: record
                .assignee_id
                .as_deref()
                .and_then(|id| refs.user_by_id(id))
                .map(|user| UserRef::new(&user.email, &user.name)),
            due_date: record.due,
            url: Some(format!("file://{}#{}", self.path.display(), record.id)),
            ..Default::default()
        };
        item.set_id_in(self.system, &record.id);
        item.set_id_in(self.system.other(), &record.link);
        item
    }

    fn write_fields(
        &self,
        record: &mut StoredRecord,
        item: &CanonicalItem,
        refs: &ReferenceData,
        with_body: bool,
    ) {
        record.title.clone_from(&item.title);
        record.priority.clone_from(&item.priority);
        record.status_id = match refs.status_id(&item.status) {
            Some(id) => Some(id.to_string()),
            None => {
                tracing::warn!(
                    "{}: unknown status {:?}, using {:?}",
                    self.system,
                    item.status,
                    refs.default_status
                );
                refs.status_id(&refs.default_status).map(str::to_string)
            }
        };
        record.label_ids = item
            .tags
            .iter()
            .filter_map(|tag| {
                let id = refs.label_id(tag);
                if id.is_none() {
                    tracing::warn!("{}: unknown label {tag:?} dropped", self.system);
                }
                id.map(str::to_string)
            })
            .collect();
        record.assignee_id = item
            .assignee
            .as_ref()
            .and_then(|user| refs.user_by_email(&user.email))
            .map(|user| user.id.clone());
        record.due = item.due_date;
        let link = item.id_in(self.system.other());
        if !link.is_empty() {
            record.link = link.to_string();
        }
        if with_body {
            record.body.clone_from(&item.description);
        }
        record.edited_at = Utc::now();
    }
}

impl ReferenceSource for LocalStore {
    fn resolve(&self) -> Result<ReferenceData, CollaboratorError> {
        Ok(read_store(&self.path)?.reference)
    }
}

impl Collaborator for LocalStore {
    fn system(&self) -> System {
        self.system
    }

    fn fetch(&self, scope: FetchScope) -> Result<Fetched, CollaboratorError> {
        let refs = self.reference_data()?;
        let store = {
            let _lock = self
                .guard
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            read_store(&self.path)?
        };

        let mut fetched = Fetched::default();
        for record in store.records.values() {
            if let FetchScope::Since(since) = scope {
                if record.edited_at < since {
                    continue;
                }
            }
            let item = self.to_canonical(record, &refs);
            let Some(key) = item.key().map(str::to_string) else {
                continue;
            };
            if record.archived {
                if matches!(scope, FetchScope::Since(_)) {
                    fetched.removed.insert(key);
                }
                continue;
            }
            fetched.items.insert(key, item);
        }
        tracing::debug!(
            "{}: fetched {} item(s), {} removed",
            self.system,
            fetched.items.len(),
            fetched.removed.len()
        );
        Ok(fetched)
    }

    fn create(&self, item: &CanonicalItem) -> Result<CanonicalItem, CollaboratorError> {
        let refs = self.reference_data()?;
        let record = self.modify(|store| {
            let mut record = StoredRecord {
                id: Uuid::new_v4().to_string(),
                link: String::new(),
                title: String::new(),
                status_id: None,
                priority: String::new(),
                body: String::new(),
                label_ids: Vec::new(),
                assignee_id: None,
                due: None,
                edited_at: Utc::now(),
                archived: false,
            };
            self.write_fields(&mut record, item, &refs, true);
            store.records.insert(record.id.clone(), record.clone());
            Ok(record)
        })?;
        tracing::info!("{}: created {:?} as {}", self.system, item.title, record.id);
        Ok(self.to_canonical(&record, &refs))
    }

    fn update(
        &self,
        id: &str,
        item: &CanonicalItem,
        expensive_text_update: bool,
    ) -> Result<(), CollaboratorError> {
        let refs = self.reference_data()?;
        self.modify(|store| {
            let record = store
                .records
                .get_mut(id)
                .filter(|record| !record.archived)
                .ok_or_else(|| CollaboratorError::NotFound {
                    system: self.system,
                    id: id.to_string(),
                })?;
            self.write_fields(record, item, &refs, expensive_text_update);
            Ok(())
        })?;
        tracing::info!("{}: updated {id}", self.system);
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), CollaboratorError> {
        self.modify(|store| {
            let record = store
                .records
                .get_mut(id)
                .ok_or_else(|| CollaboratorError::NotFound {
                    system: self.system,
                    id: id.to_string(),
                })?;
            record.archived = true;
            record.edited_at = Utc::now();
            Ok(())
        })?;
        tracing::info!("{}: archived {id}", self.system);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    use super::*;
    use crate::reference::UserEntry;

    fn reference() -> ReferenceData {
        ReferenceData {
            statuses: [
                ("To Do".to_string(), "st-todo".to_string()),
                ("Done".to_string(), "st-done".to_string()),
            ]
            .into(),
            labels: [("bug".to_string(), "lb-bug".to_string())].into(),
            users: vec![UserEntry {
                id: "u-ana".into(),
                name: "Ana".into(),
                email: "ana@example.com".into(),
            }],
            ..Default::default()
        }
    }

    fn store(dir: &TempDir, system: System) -> LocalStore {
        let path = dir.path().join(format!("{system}.json"));
        write_store(
            &path,
            &StoreFile {
                records: BTreeMap::new(),
                reference: reference(),
            },
        )
        .unwrap();
        LocalStore::with_ttl(system, path, Duration::from_secs(60))
    }

    fn item() -> CanonicalItem {
        CanonicalItem {
            id: "doc-1".into(),
            title: "Bug".into(),
            status: "Done".into(),
            priority: "High".into(),
            description: "body".into(),
            tags: ["bug".to_string()].into(),
            assignee: Some(UserRef::new("ana@example.com", "Ana")),
            ..Default::default()
        }
    }

    #[test]
    fn create_translates_through_reference_data() {
        let dir = TempDir::new().unwrap();
        let tracker = store(&dir, System::Tracker);

        let created = tracker.create(&item()).unwrap();
        assert!(!created.secondary_id.is_empty(), "tracker id assigned");
        assert_eq!(created.id, "doc-1", "link to the document kept");

        let raw = read_store(tracker.path()).unwrap();
        let record = &raw.records[&created.secondary_id];
        assert_eq!(record.status_id.as_deref(), Some("st-done"));
        assert_eq!(record.label_ids, vec!["lb-bug".to_string()]);
        assert_eq!(record.assignee_id.as_deref(), Some("u-ana"));

        let fetched = tracker.fetch(FetchScope::Full).unwrap();
        let back = &fetched.items["doc-1"];
        assert_eq!(back.status, "Done");
        assert_eq!(back.tags, item().tags);
        assert_eq!(back.assignee, item().assignee);
    }

    #[test]
    fn unlinked_tracker_records_are_keyed_by_own_id() {
        let dir = TempDir::new().unwrap();
        let tracker = store(&dir, System::Tracker);
        let mut orphan = item();
        orphan.id = String::new();

        let created = tracker.create(&orphan).unwrap();
        let fetched = tracker.fetch(FetchScope::Full).unwrap();
        assert!(fetched.items.contains_key(&created.secondary_id));
    }

    #[test]
    fn cheap_update_keeps_body() {
        let dir = TempDir::new().unwrap();
        let docs = store(&dir, System::Documents);
        let created = docs.create(&item()).unwrap();

        let mut changed = created.clone();
        changed.status = "To Do".into();
        changed.description = "new body".into();
        docs.update(&created.id, &changed, false).unwrap();

        let back = &docs.fetch(FetchScope::Full).unwrap().items[&created.id];
        assert_eq!(back.status, "To Do");
        assert_eq!(back.description, "body");

        docs.update(&created.id, &changed, true).unwrap();
        let back = &docs.fetch(FetchScope::Full).unwrap().items[&created.id];
        assert_eq!(back.description, "new body");
    }

    #[test]
    fn delete_archives_and_incremental_fetch_reports_it() {
        let dir = TempDir::new().unwrap();
        let docs = store(&dir, System::Documents);
        let created = docs.create(&item()).unwrap();
        let since = Utc::now() - ChronoDuration::seconds(1);

        docs.delete(&created.id).unwrap();

        assert!(docs.fetch(FetchScope::Full).unwrap().items.is_empty());
        let delta = docs.fetch(FetchScope::Since(since)).unwrap();
        assert!(delta.items.is_empty());
        assert!(delta.removed.contains(&created.id));
    }

    #[test]
    fn incremental_fetch_skips_old_records() {
        let dir = TempDir::new().unwrap();
        let docs = store(&dir, System::Documents);
        docs.create(&item()).unwrap();

        let later = Utc::now() + ChronoDuration::seconds(5);
        let delta = docs.fetch(FetchScope::Since(later)).unwrap();
        assert!(delta.items.is_empty());
        assert!(delta.removed.is_empty());
    }

    #[test]
    fn update_of_missing_record_is_not_found() {
        let dir = TempDir::new().unwrap();
        let docs = store(&dir, System::Documents);
        let err = docs.update("nope", &item(), true).unwrap_err();
        assert!(matches!(err, CollaboratorError::NotFound { .. }));
    }

    #[test]
    fn unknown_status_falls_back_to_default() {
        let dir = TempDir::new().unwrap();
        let docs = store(&dir, System::Documents);
        let mut odd = item();
        odd.status = "Someday".into();

        let created = docs.create(&odd).unwrap();
        assert_eq!(created.status, "To Do");
    }
}
