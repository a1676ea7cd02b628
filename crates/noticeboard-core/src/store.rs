//! Local document store
//!
//! The `Store` owns the canonical local snapshot between sync cycles:
//! - notices and forms (with their responses)
//! - the last successful sync time
//! - per-form submission analytics
//!
//! Every mutation is written through to the [`LocalStore`] immediately, so
//! local CRUD never depends on the remote being reachable.
//!
//! ## Usage
//!
//! ```ignore
//! let mut store = Store::open()?;
//!
//! let notice = store.create_notice(Notice::new("Exam schedule"), Some(1))?;
//! let pinned = store.notices_sorted();
//! ```

use std::collections::BTreeMap;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Config;
use crate::document::parse_entries;
use crate::forms::{Form, Response};
use crate::models::Notice;
use crate::ordering::{assign_order, sort_for_display};
use crate::storage::{LocalStore, StorageError, StorageKey, StorageResult};

/// Submission counters for one form
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionStats {
    pub count: u64,
    pub last_submitted_at: Option<DateTime<Utc>>,
}

/// Local document store
pub struct Store {
    local: LocalStore,
    notices: Vec<Notice>,
    forms: Vec<Form>,
    last_sync: Option<DateTime<Utc>>,
    config: Config,
}

impl Store {
    /// Open the store using the default configuration
    pub fn open() -> anyhow::Result<Self> {
        let config = Config::load().context("Failed to load configuration")?;
        Self::open_with_config(config).context("Failed to open local store")
    }

    /// Open the store with a specific configuration
    pub fn open_with_config(config: Config) -> StorageResult<Self> {
        let local = LocalStore::open(&config.data_dir)?;

        let notices = load_collection::<Notice>(&local, StorageKey::Notices, "notices")?;
        let forms = load_collection::<Form>(&local, StorageKey::Forms, "forms")?;
        let last_sync = match local.get::<DateTime<Utc>>(StorageKey::LastUpdate) {
            Ok(ts) => ts,
            Err(StorageError::InvalidFormat { details, .. }) => {
                warn!("Ignoring unreadable last sync time: {}", details);
                None
            }
            Err(e) => return Err(e),
        };

        debug!(
            "Opened local store at {:?}: {} notices, {} forms",
            local.dir(),
            notices.len(),
            forms.len()
        );

        Ok(Self {
            local,
            notices,
            forms,
            last_sync,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    // ==================== Notice Operations ====================

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    /// Notices in display order (pinned first)
    pub fn notices_sorted(&self) -> Vec<Notice> {
        let mut notices = self.notices.clone();
        sort_for_display(&mut notices);
        notices
    }

    pub fn notice(&self, id: &str) -> Option<&Notice> {
        self.notices.iter().find(|n| n.id == id)
    }

    /// Find a notice by full id or unique id prefix
    pub fn find_notice(&self, id_or_prefix: &str) -> Option<&Notice> {
        if let Some(n) = self.notice(id_or_prefix) {
            return Some(n);
        }
        let mut matches = self.notices.iter().filter(|n| n.id.starts_with(id_or_prefix));
        match (matches.next(), matches.next()) {
            (Some(n), None) => Some(n),
            _ => None,
        }
    }

    /// Add a new notice, placing it at `requested_order` (or the next free slot)
    pub fn create_notice(
        &mut self,
        mut notice: Notice,
        requested_order: Option<u32>,
    ) -> StorageResult<Notice> {
        notice.order = 0;
        let id = notice.id.clone();
        self.notices.push(notice);
        assign_order(&mut self.notices, &id, requested_order);
        self.save_notices()?;
        self.notice(&id)
            .cloned()
            .ok_or(StorageError::NoticeNotFound(id))
    }

    /// Replace an existing notice.
    ///
    /// The id and creation timestamp of the stored notice are kept;
    /// `lastModified` is refreshed. A changed `order` goes through slot
    /// assignment so reserved positions stay unique.
    pub fn update_notice(&mut self, mut notice: Notice) -> StorageResult<Notice> {
        let idx = self
            .notices
            .iter()
            .position(|n| n.id == notice.id)
            .ok_or_else(|| StorageError::NoticeNotFound(notice.id.clone()))?;

        let existing = &self.notices[idx];
        let requested = (notice.order != existing.order).then_some(notice.order);
        notice.timestamp = existing.timestamp;
        notice.order = existing.order;
        notice.touch();

        let id = notice.id.clone();
        self.notices[idx] = notice;
        if requested.is_some() {
            assign_order(&mut self.notices, &id, requested);
        }
        self.save_notices()?;
        Ok(self.notices[idx].clone())
    }

    /// Move a notice to a new position
    pub fn set_notice_order(&mut self, id: &str, position: Option<u32>) -> StorageResult<u32> {
        let order = assign_order(&mut self.notices, id, position)
            .ok_or_else(|| StorageError::NoticeNotFound(id.to_string()))?;
        self.save_notices()?;
        Ok(order)
    }

    pub fn delete_notice(&mut self, id: &str) -> StorageResult<Notice> {
        let idx = self
            .notices
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| StorageError::NoticeNotFound(id.to_string()))?;
        let removed = self.notices.remove(idx);
        self.save_notices()?;
        Ok(removed)
    }

    // ==================== Form Operations ====================

    pub fn forms(&self) -> &[Form] {
        &self.forms
    }

    pub fn form(&self, id: &str) -> Option<&Form> {
        self.forms.iter().find(|f| f.id == id)
    }

    /// Look up a form by full id or unique id prefix
    pub fn find_form(&self, id_or_prefix: &str) -> Option<&Form> {
        if let Some(f) = self.form(id_or_prefix) {
            return Some(f);
        }
        let mut matches = self.forms.iter().filter(|f| f.id.starts_with(id_or_prefix));
        match (matches.next(), matches.next()) {
            (Some(f), None) => Some(f),
            _ => None,
        }
    }

    /// Insert a form or replace the stored copy with the same id
    pub fn save_form(&mut self, mut form: Form) -> StorageResult<()> {
        form.touch();
        match self.forms.iter_mut().find(|f| f.id == form.id) {
            Some(existing) => *existing = form,
            None => self.forms.push(form),
        }
        self.save_forms()
    }

    pub fn delete_form(&mut self, id: &str) -> StorageResult<Form> {
        let idx = self
            .forms
            .iter()
            .position(|f| f.id == id)
            .ok_or_else(|| StorageError::FormNotFound(id.to_string()))?;
        let removed = self.forms.remove(idx);

        for notice in self.notices.iter_mut().filter(|n| n.form_id.as_deref() == Some(id)) {
            notice.form_id = None;
            notice.form_capture_enabled = false;
            notice.touch();
        }
        self.save_forms()?;
        self.save_notices()?;
        Ok(removed)
    }

    /// Append a response to the local copy of its form.
    ///
    /// Returns whether it was new. Responses don't change the form's
    /// modification time locally; the remote append path does that.
    pub fn append_response(&mut self, response: Response) -> StorageResult<bool> {
        let form = self
            .forms
            .iter_mut()
            .find(|f| f.id == response.form_id)
            .ok_or_else(|| StorageError::FormNotFound(response.form_id.clone()))?;
        let added = form.append_response(response);
        if added {
            self.save_forms()?;
        }
        Ok(added)
    }

    /// Bump the submission counter for a form
    pub fn record_submission(&mut self, form_id: &str, at: DateTime<Utc>) -> StorageResult<()> {
        let mut analytics = self.submission_analytics()?;
        let stats = analytics.entry(form_id.to_string()).or_default();
        stats.count += 1;
        stats.last_submitted_at = Some(at);
        self.local.set(StorageKey::SubmissionAnalytics, &analytics)
    }

    pub fn submission_analytics(&self) -> StorageResult<BTreeMap<String, SubmissionStats>> {
        Ok(self
            .local
            .get(StorageKey::SubmissionAnalytics)?
            .unwrap_or_default())
    }

    // ==================== Sync Bookkeeping ====================

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.last_sync
    }

    pub fn set_last_sync(&mut self, at: DateTime<Utc>) -> StorageResult<()> {
        self.last_sync = Some(at);
        self.local.set(StorageKey::LastUpdate, &at)
    }

    /// Replace the whole local snapshot with a merged one
    pub fn replace_snapshot(&mut self, notices: Vec<Notice>, forms: Vec<Form>) -> StorageResult<()> {
        self.notices = notices;
        self.forms = forms;
        self.save_notices()?;
        self.save_forms()
    }

    pub fn replace_forms(&mut self, forms: Vec<Form>) -> StorageResult<()> {
        self.forms = forms;
        self.save_forms()
    }

    pub fn notice_count(&self) -> usize {
        self.notices.len()
    }

    pub fn form_count(&self) -> usize {
        self.forms.len()
    }

    pub fn response_count(&self) -> usize {
        self.forms.iter().map(|f| f.responses.len()).sum()
    }

    fn save_notices(&self) -> StorageResult<()> {
        self.local.set(StorageKey::Notices, &self.notices)
    }

    fn save_forms(&self) -> StorageResult<()> {
        self.local.set(StorageKey::Forms, &self.forms)
    }
}

/// Load a collection, skipping malformed entries.
///
/// A file that isn't JSON at all is moved aside to `<name>.corrupt.backup`
/// and the collection starts empty.
fn load_collection<T: serde::de::DeserializeOwned>(
    local: &LocalStore,
    key: StorageKey,
    collection: &'static str,
) -> StorageResult<Vec<T>> {
    let value = match local.get_value(key) {
        Ok(value) => value,
        Err(StorageError::InvalidFormat { path, details }) => {
            let backup = path.with_extension("corrupt.backup");
            warn!(
                "{} is unreadable ({}); moving it to {:?} and starting empty",
                key, details, backup
            );
            std::fs::rename(&path, &backup).map_err(|e| StorageError::from_io(e, path))?;
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };

    let mut skipped = Vec::new();
    let entries = parse_entries(value, collection, &mut skipped);
    for err in skipped {
        warn!("Skipped local entry: {}", err);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::{Answer, FormDraft, QuestionKind};
    use tempfile::TempDir;

    fn open_store(temp_dir: &TempDir) -> Store {
        Store::open_with_config(Config::with_data_dir(temp_dir.path())).unwrap()
    }

    fn sample_form() -> Form {
        let mut draft = FormDraft::new("RSVP");
        draft.add_question(QuestionKind::Text, "Name", true, vec![]);
        draft.build().unwrap()
    }

    #[test]
    fn test_create_and_reload() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = open_store(&temp_dir);

        let created = store.create_notice(Notice::new("Holiday"), None).unwrap();
        assert_eq!(created.order, 4);

        let reopened = open_store(&temp_dir);
        assert_eq!(reopened.notice_count(), 1);
        assert_eq!(reopened.notice(&created.id).unwrap().title, "Holiday");
    }

    #[test]
    fn test_create_pinned_evicts_holder() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = open_store(&temp_dir);

        let first = store.create_notice(Notice::new("First"), Some(1)).unwrap();
        let second = store.create_notice(Notice::new("Second"), Some(1)).unwrap();

        assert_eq!(second.order, 1);
        assert_eq!(store.notice(&first.id).unwrap().order, 4);

        let sorted: Vec<String> = store.notices_sorted().into_iter().map(|n| n.title).collect();
        assert_eq!(sorted, vec!["Second", "First"]);
    }

    #[test]
    fn test_update_keeps_id_and_timestamp() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = open_store(&temp_dir);

        let created = store.create_notice(Notice::new("Draft"), None).unwrap();
        let mut edited = created.clone();
        edited.title = "Final".to_string();
        edited.timestamp = Utc::now() + chrono::Duration::days(1);
        std::thread::sleep(std::time::Duration::from_millis(5));

        let updated = store.update_notice(edited).unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.timestamp, created.timestamp);
        assert_eq!(updated.title, "Final");
        assert!(updated.last_modified > created.last_modified);
    }

    #[test]
    fn test_update_with_new_order_pins() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = open_store(&temp_dir);

        let a = store.create_notice(Notice::new("A"), Some(2)).unwrap();
        let b = store.create_notice(Notice::new("B"), None).unwrap();

        let mut edited = b.clone();
        edited.order = 2;
        let updated = store.update_notice(edited).unwrap();

        assert_eq!(updated.order, 2);
        assert_eq!(store.notice(&a.id).unwrap().order, 5);
    }

    #[test]
    fn test_update_missing_notice() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = open_store(&temp_dir);
        assert!(matches!(
            store.update_notice(Notice::new("ghost")),
            Err(StorageError::NoticeNotFound(_))
        ));
    }

    #[test]
    fn test_find_notice_by_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = open_store(&temp_dir);

        let mut notice = Notice::new("Prefixed");
        notice.id = "abc-123".to_string();
        store.create_notice(notice, None).unwrap();

        assert!(store.find_notice("abc").is_some());
        assert!(store.find_notice("zzz").is_none());
    }

    #[test]
    fn test_delete_form_unlinks_notices() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = open_store(&temp_dir);

        let form = sample_form();
        let form_id = form.id.clone();
        store.save_form(form).unwrap();

        let mut notice = Notice::new("Register");
        notice.attach_form(&form_id);
        let notice = store.create_notice(notice, None).unwrap();

        store.delete_form(&form_id).unwrap();
        let notice = store.notice(&notice.id).unwrap();
        assert!(notice.form_id.is_none());
        assert!(!notice.form_capture_enabled);
    }

    #[test]
    fn test_append_response_and_analytics() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = open_store(&temp_dir);

        let form = sample_form();
        store.save_form(form.clone()).unwrap();

        let mut answers = BTreeMap::new();
        answers.insert(1, Answer::Single("Ravi".to_string()));
        let response = form.build_response(answers, "test").unwrap();

        assert!(store.append_response(response.clone()).unwrap());
        assert!(!store.append_response(response.clone()).unwrap());
        assert_eq!(store.response_count(), 1);

        store.record_submission(&form.id, response.submitted_at).unwrap();
        store.record_submission(&form.id, response.submitted_at).unwrap();
        let analytics = store.submission_analytics().unwrap();
        assert_eq!(analytics[&form.id].count, 2);
    }

    #[test]
    fn test_last_sync_persists() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = open_store(&temp_dir);
        assert!(store.last_sync().is_none());

        let now = Utc::now();
        store.set_last_sync(now).unwrap();

        let reopened = open_store(&temp_dir);
        assert_eq!(reopened.last_sync(), Some(now));
    }

    #[test]
    fn test_malformed_entries_are_skipped_on_load() {
        let temp_dir = TempDir::new().unwrap();
        let local = LocalStore::open(temp_dir.path()).unwrap();
        let good = serde_json::to_value(Notice::new("Good")).unwrap();
        local
            .set(
                StorageKey::Notices,
                &serde_json::json!([good, {"title": "no id"}]),
            )
            .unwrap();

        let store = open_store(&temp_dir);
        assert_eq!(store.notice_count(), 1);
    }

    #[test]
    fn test_corrupt_collection_is_backed_up() {
        let temp_dir = TempDir::new().unwrap();
        let local = LocalStore::open(temp_dir.path()).unwrap();
        std::fs::write(local.path(StorageKey::Forms), b"garbage").unwrap();

        let store = open_store(&temp_dir);
        assert_eq!(store.form_count(), 0);
        assert!(temp_dir
            .path()
            .join("forms-collection.corrupt.backup")
            .exists());
    }
}
