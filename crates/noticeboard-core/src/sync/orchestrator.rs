//! Sync orchestrator
//!
//! Owns the read-merge-write cycle against the remote document. Every local
//! operation completes against the [`Store`] first; the remote is contacted
//! afterwards and its failures come back as outcomes, never as errors of the
//! local operation.
//!
//! ## Usage
//!
//! ```ignore
//! let remote = HttpRemote::from_config(store.config())?;
//! let orchestrator = SyncOrchestrator::new(store, Some(remote))?;
//!
//! orchestrator.on_page_load().await?;
//! let published = orchestrator.create_notice(Notice::new("Exam schedule"), Some(1)).await?;
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use super::error::{RemoteError, RemoteResult};
use super::lock::KeyedLock;
use super::merge::{merge_forms, merge_notices};
use super::optimizer::{check_payload, AttachmentOptimizer};
use super::remote::{FetchOutcome, RemoteStore};
use super::retry::{FailedEntry, ProcessSummary, RetryHandler, RetryItem, RetryQueue};
use super::status::{StatusTracker, SyncStatus};
use crate::config::Config;
use crate::document::RemoteDocument;
use crate::error::ValidationError;
use crate::forms::{Answer, Form, Response};
use crate::models::Notice;
use crate::storage::{StorageError, StorageResult};
use crate::store::Store;

/// Why the remote was not contacted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No remote document is configured or sync is switched off
    NotConfigured,
    Offline,
    /// The remote refused writes earlier in this session
    WritesDisabled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::NotConfigured => "cloud sync is not configured",
            SkipReason::Offline => "offline",
            SkipReason::WritesDisabled => "cloud writes are disabled for this session",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Synced { notices: usize, forms: usize },
    /// The remote document doesn't exist yet; the next upload creates it
    RemoteMissing,
    Skipped(SkipReason),
    Failed(RemoteError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Uploaded { bytes: usize, oversized: bool },
    Skipped(SkipReason),
    Failed(RemoteError),
}

impl UploadOutcome {
    pub fn is_uploaded(&self) -> bool {
        matches!(self, UploadOutcome::Uploaded { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The response is in the remote document
    Delivered,
    /// Kept in the retry queue for a later attempt
    Queued { reason: String },
    /// Saved on this device only
    LocalOnly(SkipReason),
    Failed(RemoteError),
}

/// A completed local operation plus what happened when publishing it
#[derive(Debug, Clone, PartialEq)]
pub struct Published<T> {
    pub value: T,
    pub upload: UploadOutcome,
}

/// Local failures of a response submission
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub struct SyncOrchestrator<R: RemoteStore> {
    store: Arc<Mutex<Store>>,
    remote: Option<R>,
    status: StatusTracker,
    online: AtomicBool,
    cloud_write_enabled: AtomicBool,
    retry: Mutex<RetryQueue>,
    retry_scheduled: Notify,
    form_locks: KeyedLock,
    optimizer: AttachmentOptimizer,
    config: Config,
}

impl<R: RemoteStore> SyncOrchestrator<R> {
    /// Wrap a store; `remote` is ignored unless sync is enabled in the config
    pub fn new(store: Store, remote: Option<R>) -> StorageResult<Self> {
        let config = store.config().clone();
        let retry = RetryQueue::load(store.local().clone(), config.retry_max_attempts)?;
        let remote = remote.filter(|_| config.sync_enabled);

        let initial = if remote.is_some() {
            SyncStatus::Offline
        } else {
            SyncStatus::LocalOnly
        };
        let status = StatusTracker::new(
            initial,
            config.status_developer_info_delay(),
            config.status_last_updated_delay(),
        );
        if let Some(at) = store.last_sync() {
            status.set_last_sync(at);
        }

        Ok(Self {
            store: Arc::new(Mutex::new(store)),
            remote,
            status,
            online: AtomicBool::new(true),
            cloud_write_enabled: AtomicBool::new(true),
            retry: Mutex::new(retry),
            retry_scheduled: Notify::new(),
            form_locks: KeyedLock::new(),
            optimizer: AttachmentOptimizer::new(),
            config,
        })
    }

    pub fn store(&self) -> &Arc<Mutex<Store>> {
        &self.store
    }

    pub fn status(&self) -> &StatusTracker {
        &self.status
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn cloud_write_enabled(&self) -> bool {
        self.cloud_write_enabled.load(Ordering::SeqCst)
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub fn remote(&self) -> Option<&R> {
        self.remote.as_ref()
    }

    fn remote_for_read(&self) -> Result<&R, SkipReason> {
        let remote = self.remote.as_ref().ok_or(SkipReason::NotConfigured)?;
        if !self.is_online() {
            return Err(SkipReason::Offline);
        }
        Ok(remote)
    }

    fn remote_for_write(&self) -> Result<&R, SkipReason> {
        let remote = self.remote_for_read()?;
        if !self.cloud_write_enabled() {
            return Err(SkipReason::WritesDisabled);
        }
        Ok(remote)
    }

    fn disable_writes(&self, err: &RemoteError) {
        warn!("Disabling cloud writes for this session: {}", err);
        self.cloud_write_enabled.store(false, Ordering::SeqCst);
        self.status.set(SyncStatus::LocalOnly, Some(err.user_message()));
    }

    // ==================== Read Path ====================

    /// Fetch the remote document and merge it into the local store
    pub async fn sync_with_cloud(&self) -> StorageResult<SyncOutcome> {
        let remote = match self.remote_for_read() {
            Ok(remote) => remote,
            Err(reason) => {
                debug!("Skipping sync: {}", reason);
                if reason == SkipReason::Offline {
                    self.status.set(SyncStatus::Offline, None);
                }
                return Ok(SyncOutcome::Skipped(reason));
            }
        };

        self.status.set(SyncStatus::Syncing, None);

        let (doc, skipped_notices) = match remote.fetch_document().await {
            Ok(FetchOutcome::Found {
                document,
                skipped_notices,
            }) => (document, skipped_notices),
            Ok(FetchOutcome::NotFound) => {
                info!("Remote document not created yet");
                self.status
                    .set(SyncStatus::Synced, Some("ready to create the cloud copy".to_string()));
                return Ok(SyncOutcome::RemoteMissing);
            }
            Err(e) => {
                warn!("Sync failed: {}", e);
                self.status.set(SyncStatus::Error, Some(e.user_message()));
                return Ok(SyncOutcome::Failed(e));
            }
        };

        let mut store = self.store.lock().await;
        let notices = merge_notices(
            store.notices(),
            &doc.notices,
            &skipped_notices,
            store.last_sync(),
            doc.last_updated,
        );
        let forms = merge_forms(store.forms(), &doc.forms);
        let counts = (notices.len(), forms.len());

        let now = Utc::now();
        let persisted = store
            .replace_snapshot(notices, forms)
            .and_then(|_| store.set_last_sync(now));
        if let Err(e) = persisted {
            self.status.set(SyncStatus::Error, Some(e.to_string()));
            return Err(e);
        }
        drop(store);

        info!("Synced {} notices and {} forms", counts.0, counts.1);
        self.status.set_last_sync(now);
        self.status.set(SyncStatus::Synced, None);
        Ok(SyncOutcome::Synced {
            notices: counts.0,
            forms: counts.1,
        })
    }

    // ==================== Write Path ====================

    /// Publish the local snapshot as the new remote document
    pub async fn upload_to_cloud(&self) -> StorageResult<UploadOutcome> {
        let remote = match self.remote_for_write() {
            Ok(remote) => remote,
            Err(reason) => {
                debug!("Skipping upload: {}", reason);
                return Ok(UploadOutcome::Skipped(reason));
            }
        };

        self.status.set(SyncStatus::Syncing, None);

        let previous = match remote.fetch_document().await {
            Ok(outcome) => Some(outcome.into_document()),
            Err(e) => {
                warn!("Could not read remote before writing, continuing: {}", e);
                None
            }
        };

        let (notices, forms) = {
            let mut store = self.store.lock().await;
            let forms = match &previous {
                Some(prev) => {
                    let merged = merge_forms(store.forms(), &prev.forms);
                    if merged.as_slice() != store.forms() {
                        store.replace_forms(merged.clone())?;
                    }
                    merged
                }
                None => store.forms().to_vec(),
            };
            (self.optimizer.optimize(store.notices()), forms)
        };

        let now = Utc::now();
        let doc = RemoteDocument::assemble(notices, forms, previous.as_ref(), now);
        let warning = match check_payload(&doc) {
            Ok(warning) => warning,
            Err(e) => {
                warn!("Could not measure payload: {}", e);
                None
            }
        };

        match remote.write_document(&doc).await {
            Ok(outcome) => {
                self.store.lock().await.set_last_sync(now)?;
                self.status.set_last_sync(now);
                let oversized = outcome.is_oversized() || warning.is_some();
                let message = oversized.then(|| {
                    format!(
                        "document is {} bytes, above the usual limit",
                        outcome.bytes()
                    )
                });
                self.status.set(SyncStatus::Synced, message);
                Ok(UploadOutcome::Uploaded {
                    bytes: outcome.bytes(),
                    oversized,
                })
            }
            Err(e) if e.disables_writes() => {
                self.disable_writes(&e);
                Ok(UploadOutcome::Failed(e))
            }
            Err(e) => {
                warn!("Upload failed: {}", e);
                self.status.set(SyncStatus::Error, Some(e.user_message()));
                Ok(UploadOutcome::Failed(e))
            }
        }
    }

    // ==================== Local Operations ====================

    pub async fn create_notice(
        &self,
        notice: Notice,
        order: Option<u32>,
    ) -> StorageResult<Published<Notice>> {
        let value = self.store.lock().await.create_notice(notice, order)?;
        self.publish(value).await
    }

    pub async fn update_notice(&self, notice: Notice) -> StorageResult<Published<Notice>> {
        let value = self.store.lock().await.update_notice(notice)?;
        self.publish(value).await
    }

    pub async fn delete_notice(&self, id: &str) -> StorageResult<Published<Notice>> {
        let value = self.store.lock().await.delete_notice(id)?;
        self.publish(value).await
    }

    /// Move a notice; `None` or `0` lets it float
    pub async fn set_order(&self, id: &str, position: Option<u32>) -> StorageResult<Published<u32>> {
        let value = self.store.lock().await.set_notice_order(id, position)?;
        self.publish(value).await
    }

    pub async fn save_form(&self, form: Form) -> StorageResult<Published<Form>> {
        let id = form.id.clone();
        let value = {
            let mut store = self.store.lock().await;
            store.save_form(form)?;
            store
                .form(&id)
                .cloned()
                .ok_or(StorageError::FormNotFound(id))?
        };
        self.publish(value).await
    }

    pub async fn delete_form(&self, id: &str) -> StorageResult<Published<Form>> {
        let value = self.store.lock().await.delete_form(id)?;
        self.publish(value).await
    }

    async fn publish<T>(&self, value: T) -> StorageResult<Published<T>> {
        let upload = self.upload_to_cloud().await?;
        Ok(Published { value, upload })
    }

    // ==================== Form Responses ====================

    /// Validate and store a response, then append it to the remote form
    pub async fn submit_form_response(
        &self,
        form_id: &str,
        answers: BTreeMap<u32, Answer>,
        device_info: &str,
    ) -> Result<(Response, SubmitOutcome), SubmitError> {
        let response = {
            let mut store = self.store.lock().await;
            let form = store.form(form_id).ok_or_else(|| ValidationError::UnknownForm {
                form_id: form_id.to_string(),
            })?;
            let response = form.build_response(answers, device_info)?;
            store.append_response(response.clone())?;
            store.record_submission(form_id, response.submitted_at)?;
            response
        };

        let outcome = self.deliver_response(&response).await?;
        Ok((response, outcome))
    }

    async fn deliver_response(&self, response: &Response) -> StorageResult<SubmitOutcome> {
        match self.remote_for_write() {
            Ok(_) => {}
            Err(SkipReason::Offline) => {
                self.queue_response(response).await?;
                return Ok(SubmitOutcome::Queued {
                    reason: SkipReason::Offline.to_string(),
                });
            }
            Err(reason) => return Ok(SubmitOutcome::LocalOnly(reason)),
        }

        match self.append_remote(response).await {
            Ok(()) => {
                self.status.set(SyncStatus::Synced, None);
                Ok(SubmitOutcome::Delivered)
            }
            Err(e) if e.disables_writes() => {
                self.disable_writes(&e);
                Ok(SubmitOutcome::LocalOnly(SkipReason::WritesDisabled))
            }
            Err(e) if e.is_retryable() => {
                warn!("Response {} not delivered, queueing: {}", response.id, e);
                self.queue_response(response).await?;
                self.status.set(SyncStatus::Error, Some(e.user_message()));
                Ok(SubmitOutcome::Queued {
                    reason: e.to_string(),
                })
            }
            Err(e) => {
                self.status.set(SyncStatus::Error, Some(e.user_message()));
                Ok(SubmitOutcome::Failed(e))
            }
        }
    }

    async fn queue_response(&self, response: &Response) -> StorageResult<()> {
        self.retry.lock().await.enqueue_response(response)?;
        self.retry_scheduled.notify_one();
        Ok(())
    }

    /// Append one response to the remote copy of its form.
    ///
    /// Holds the form's lock for the whole read-modify-write and re-reads
    /// the document right before writing; if another writer got in between,
    /// the round starts over.
    async fn append_remote(&self, response: &Response) -> RemoteResult<()> {
        let remote = self
            .remote
            .as_ref()
            .ok_or_else(|| RemoteError::NotConfigured("no remote document".to_string()))?;

        let _guard = self
            .form_locks
            .acquire_polling(&response.form_id, self.config.form_lock_poll_interval())
            .await;

        let attempts = self.config.cas_max_attempts.max(1);
        for attempt in 1..=attempts {
            let mut doc = remote.fetch_document().await?.into_document();
            let token = doc.token();

            let mut changed = false;
            if doc.form(&response.form_id).is_none() {
                let local = self.store.lock().await.form(&response.form_id).cloned();
                let local = local.ok_or_else(|| ValidationError::UnknownForm {
                    form_id: response.form_id.clone(),
                })?;
                doc.forms.push(local);
                changed = true;
            }

            if let Some(form) = doc.form_mut(&response.form_id) {
                if form.append_response(response.clone()) {
                    changed = true;
                }
                if changed {
                    form.touch();
                }
            }

            if !changed {
                debug!("Response {} already in the remote document", response.id);
                return Ok(());
            }

            let current = remote.fetch_document().await?.into_document();
            if current.token() != token {
                debug!(
                    "Remote changed during append (attempt {}/{}); retrying",
                    attempt, attempts
                );
                continue;
            }

            let next = RemoteDocument::assemble(doc.notices, doc.forms, Some(&current), Utc::now());
            remote.write_document(&next).await?;
            info!("Appended response {} to form {}", response.id, response.form_id);
            return Ok(());
        }

        Err(RemoteError::Conflict { attempts })
    }

    // ==================== Retry Queue ====================

    /// Run one pass over the retry queue
    pub async fn process_retry_queue(&self) -> StorageResult<ProcessSummary> {
        let mut queue = self.retry.lock().await;
        if self.remote_for_write().is_err() {
            return Ok(ProcessSummary {
                remaining: queue.len(),
                ..ProcessSummary::default()
            });
        }

        let summary = queue.process(self).await?;
        if summary.succeeded > 0 || summary.archived > 0 {
            info!(
                "Retry pass: {} delivered, {} failed, {} archived",
                summary.succeeded, summary.failed, summary.archived
            );
        }
        Ok(summary)
    }

    /// Signalled whenever something is added to the retry queue
    pub fn retry_scheduled(&self) -> &Notify {
        &self.retry_scheduled
    }

    pub async fn pending_retries(&self) -> usize {
        self.retry.lock().await.len()
    }

    pub async fn retry_items(&self) -> Vec<RetryItem> {
        self.retry.lock().await.items().to_vec()
    }

    /// When the next retry pass is due, if anything is queued
    pub async fn next_retry_delay(&self) -> Option<Duration> {
        self.retry.lock().await.next_delay(
            Duration::from_secs(self.config.retry_base_delay_secs),
            Duration::from_secs(self.config.retry_max_delay_secs),
        )
    }

    pub async fn failed_log(&self) -> StorageResult<Vec<FailedEntry>> {
        self.retry.lock().await.failed_log()
    }

    // ==================== Events ====================

    pub async fn on_page_load(&self) -> StorageResult<SyncOutcome> {
        self.sync_with_cloud().await
    }

    pub async fn on_focus_regained(&self) -> StorageResult<SyncOutcome> {
        self.sync_with_cloud().await
    }

    /// Record a connectivity change. Coming back online syncs and flushes
    /// the retry queue.
    pub async fn set_online(&self, online: bool) -> StorageResult<Option<SyncOutcome>> {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if !online {
            if was_online {
                info!("Connection lost");
            }
            self.status.set(SyncStatus::Offline, None);
            return Ok(None);
        }
        if was_online {
            return Ok(None);
        }

        info!("Connection restored");
        let outcome = self.sync_with_cloud().await?;
        self.process_retry_queue().await?;
        Ok(Some(outcome))
    }
}

#[async_trait]
impl<R: RemoteStore> RetryHandler for SyncOrchestrator<R> {
    async fn retry(&self, item: &RetryItem) -> Result<(), RemoteError> {
        let response = item.response().ok_or_else(|| {
            RemoteError::Validation(ValidationError::MalformedEntry {
                collection: "retry-queue",
                index: 0,
                id: None,
                details: format!("{} item does not hold a response", item.kind),
            })
        })?;
        let result = self.append_remote(&response).await;
        if let Err(e) = &result {
            if e.disables_writes() {
                self.disable_writes(e);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::{FormDraft, QuestionKind};
    use crate::models::Attachment;
    use crate::sync::remote::WriteOutcome;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    /// In-memory remote with scriptable failures
    #[derive(Default)]
    struct MemoryRemote {
        doc: StdMutex<Option<RemoteDocument>>,
        fail_fetch: StdMutex<Option<RemoteError>>,
        fail_write: StdMutex<Option<RemoteError>>,
        writes: AtomicUsize,
        /// Bump the revision behind our back on this many fetches
        interfere: AtomicUsize,
        skipped_notices: StdMutex<Vec<String>>,
    }

    impl MemoryRemote {
        fn with_doc(doc: RemoteDocument) -> Self {
            let remote = Self::default();
            *remote.doc.lock().unwrap() = Some(doc);
            remote
        }

        /// Remote holding a raw JSON body, decoded the way a fetch decodes it
        fn with_body(body: serde_json::Value) -> Self {
            let parsed = RemoteDocument::from_value_lenient(body).unwrap();
            let remote = Self::with_doc(parsed.document.clone());
            *remote.skipped_notices.lock().unwrap() = parsed.skipped_notice_ids();
            remote
        }

        fn stored(&self) -> Option<RemoteDocument> {
            self.doc.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteStore for MemoryRemote {
        async fn fetch_document(&self) -> RemoteResult<FetchOutcome> {
            if let Some(e) = self.fail_fetch.lock().unwrap().clone() {
                return Err(e);
            }
            let mut doc = self.doc.lock().unwrap();
            if self.interfere.load(Ordering::SeqCst) > 0 {
                self.interfere.fetch_sub(1, Ordering::SeqCst);
                if let Some(d) = doc.as_mut() {
                    d.metadata.revision += 100;
                }
            }
            Ok(match doc.clone() {
                Some(document) => FetchOutcome::Found {
                    document,
                    skipped_notices: self.skipped_notices.lock().unwrap().clone(),
                },
                None => FetchOutcome::NotFound,
            })
        }

        async fn write_document(&self, doc: &RemoteDocument) -> RemoteResult<WriteOutcome> {
            if let Some(e) = self.fail_write.lock().unwrap().clone() {
                return Err(e);
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            *self.doc.lock().unwrap() = Some(doc.clone());
            Ok(WriteOutcome::Written { bytes: 1 })
        }
    }

    fn config(temp_dir: &TempDir) -> Config {
        Config {
            sync_enabled: true,
            form_lock_poll_millis: 10,
            ..Config::with_data_dir(temp_dir.path())
        }
    }

    fn orchestrator(temp_dir: &TempDir, remote: MemoryRemote) -> SyncOrchestrator<MemoryRemote> {
        let store = Store::open_with_config(config(temp_dir)).unwrap();
        SyncOrchestrator::new(store, Some(remote)).unwrap()
    }

    fn rsvp_form() -> Form {
        let mut draft = FormDraft::new("RSVP");
        draft.add_question(QuestionKind::Text, "Name", true, vec![]);
        draft.build().unwrap()
    }

    fn answers(name: &str) -> BTreeMap<u32, Answer> {
        let mut answers = BTreeMap::new();
        answers.insert(1, Answer::Single(name.to_string()));
        answers
    }

    #[tokio::test]
    async fn test_sync_with_missing_remote() {
        let temp_dir = TempDir::new().unwrap();
        let orch = orchestrator(&temp_dir, MemoryRemote::default());

        let outcome = orch.sync_with_cloud().await.unwrap();
        assert_eq!(outcome, SyncOutcome::RemoteMissing);
        assert_eq!(orch.status().status(), SyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_sync_failure_sets_error_status() {
        let temp_dir = TempDir::new().unwrap();
        let remote = MemoryRemote::default();
        *remote.fail_fetch.lock().unwrap() = Some(RemoteError::network("unreachable"));
        let orch = orchestrator(&temp_dir, remote);

        let outcome = orch.sync_with_cloud().await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Failed(_)));
        let status = orch.status().current();
        assert_eq!(status.status, SyncStatus::Error);
        assert!(status.message.unwrap().contains("unreachable"));
    }

    #[tokio::test]
    async fn test_offline_never_contacts_remote() {
        let temp_dir = TempDir::new().unwrap();
        let orch = orchestrator(&temp_dir, MemoryRemote::default());
        orch.set_online(false).await.unwrap();

        let published = orch.create_notice(Notice::new("Offline"), None).await.unwrap();
        assert_eq!(published.upload, UploadOutcome::Skipped(SkipReason::Offline));
        assert_eq!(
            orch.sync_with_cloud().await.unwrap(),
            SyncOutcome::Skipped(SkipReason::Offline)
        );
        assert!(orch.remote.as_ref().unwrap().stored().is_none());
        assert_eq!(orch.store().lock().await.notice_count(), 1);
    }

    #[tokio::test]
    async fn test_create_notice_uploads_document() {
        let temp_dir = TempDir::new().unwrap();
        let orch = orchestrator(&temp_dir, MemoryRemote::default());

        let published = orch.create_notice(Notice::new("Exam schedule"), Some(1)).await.unwrap();
        assert!(published.upload.is_uploaded());

        let stored = orch.remote.as_ref().unwrap().stored().unwrap();
        assert_eq!(stored.notices[0].title, "Exam schedule");
        assert_eq!(stored.metadata.total_notices, 1);
        assert_eq!(stored.metadata.revision, 1);
        assert!(orch.store().lock().await.last_sync().is_some());
    }

    #[tokio::test]
    async fn test_forbidden_disables_writes_but_keeps_local() {
        let temp_dir = TempDir::new().unwrap();
        let remote = MemoryRemote::default();
        *remote.fail_write.lock().unwrap() = Some(RemoteError::Forbidden);
        let orch = orchestrator(&temp_dir, remote);

        let first = orch.create_notice(Notice::new("One"), None).await.unwrap();
        assert_eq!(first.upload, UploadOutcome::Failed(RemoteError::Forbidden));
        assert!(!orch.cloud_write_enabled());
        assert_eq!(orch.status().status(), SyncStatus::LocalOnly);

        let second = orch.create_notice(Notice::new("Two"), None).await.unwrap();
        assert_eq!(
            second.upload,
            UploadOutcome::Skipped(SkipReason::WritesDisabled)
        );
        assert_eq!(orch.store().lock().await.notice_count(), 2);
    }

    #[tokio::test]
    async fn test_auth_failure_disables_writes() {
        let temp_dir = TempDir::new().unwrap();
        let remote = MemoryRemote::default();
        *remote.fail_write.lock().unwrap() = Some(RemoteError::Auth);
        let orch = orchestrator(&temp_dir, remote);

        let first = orch.create_notice(Notice::new("One"), None).await.unwrap();
        assert_eq!(first.upload, UploadOutcome::Failed(RemoteError::Auth));
        assert!(!orch.cloud_write_enabled());

        let second = orch.create_notice(Notice::new("Two"), None).await.unwrap();
        assert_eq!(
            second.upload,
            UploadOutcome::Skipped(SkipReason::WritesDisabled)
        );
        assert_eq!(orch.remote.as_ref().unwrap().writes.load(Ordering::SeqCst), 0);
        assert_eq!(orch.store().lock().await.notice_count(), 2);
    }

    /// Local notice "Keep me" last synced an hour ago, plus a newer remote
    /// document holding `remote_entry` under the same id
    async fn sync_over_local_notice(
        temp_dir: &TempDir,
        remote_entry: impl FnOnce(&str) -> serde_json::Value,
    ) -> (SyncOrchestrator<MemoryRemote>, String) {
        let local = Notice::new("Keep me");
        let id = local.id.clone();
        let body = serde_json::json!({
            "notices": [remote_entry(&id)],
            "forms": [],
            "lastUpdated": Utc::now(),
            "version": "2.0"
        });
        let orch = orchestrator(temp_dir, MemoryRemote::with_body(body));
        {
            let mut store = orch.store().lock().await;
            store.replace_snapshot(vec![local], vec![]).unwrap();
            store.set_last_sync(Utc::now() - chrono::Duration::hours(1)).unwrap();
        }
        (orch, id)
    }

    #[tokio::test]
    async fn test_sync_reads_untagged_attachments() {
        let temp_dir = TempDir::new().unwrap();
        let (orch, id) = sync_over_local_notice(&temp_dir, |id| {
            serde_json::json!({
                "id": id,
                "title": "Keep me (edited)",
                "date": "2024-03-01",
                "timestamp": "2024-03-01T09:00:00Z",
                "lastModified": Utc::now(),
                "attachments": [
                    {"name": "note.txt", "type": "text/plain", "size": 5, "data": "aGVsbG8="}
                ]
            })
        })
        .await;

        let outcome = orch.sync_with_cloud().await.unwrap();
        assert_eq!(outcome, SyncOutcome::Synced { notices: 1, forms: 0 });

        let store = orch.store().lock().await;
        let notice = store.notice(&id).unwrap();
        assert_eq!(notice.title, "Keep me (edited)");
        assert!(matches!(notice.attachments[0], Attachment::Inline(_)));
    }

    #[tokio::test]
    async fn test_sync_keeps_local_when_remote_entry_is_unreadable() {
        let temp_dir = TempDir::new().unwrap();
        let (orch, id) = sync_over_local_notice(&temp_dir, |id| {
            serde_json::json!({
                "id": id,
                "title": "Broken",
                "attachments": [{"name": "mystery.bin"}]
            })
        })
        .await;

        let outcome = orch.sync_with_cloud().await.unwrap();
        assert_eq!(outcome, SyncOutcome::Synced { notices: 1, forms: 0 });
        assert_eq!(orch.store().lock().await.notice(&id).unwrap().title, "Keep me");
    }

    #[tokio::test]
    async fn test_upload_preserves_remote_forms() {
        let temp_dir = TempDir::new().unwrap();
        let cloud_form = rsvp_form();
        let doc = RemoteDocument::assemble(vec![], vec![cloud_form.clone()], None, Utc::now());
        let orch = orchestrator(&temp_dir, MemoryRemote::with_doc(doc));

        orch.create_notice(Notice::new("Notice"), None).await.unwrap();

        let stored = orch.remote.as_ref().unwrap().stored().unwrap();
        assert_eq!(stored.forms.len(), 1);
        assert_eq!(stored.metadata.revision, 2);
        assert!(orch.store().lock().await.form(&cloud_form.id).is_some());
    }

    #[tokio::test]
    async fn test_submit_response_appends_remote() {
        let temp_dir = TempDir::new().unwrap();
        let orch = orchestrator(&temp_dir, MemoryRemote::default());
        let form = orch.save_form(rsvp_form()).await.unwrap().value;

        let (response, outcome) = orch
            .submit_form_response(&form.id, answers("Asha"), "cli")
            .await
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Delivered);

        let stored = orch.remote.as_ref().unwrap().stored().unwrap();
        let remote_form = stored.form(&form.id).unwrap();
        assert!(remote_form.has_response(&response.id));
        assert!(remote_form.modified_at() >= form.modified_at());

        let analytics = orch.store().lock().await.submission_analytics().unwrap();
        assert_eq!(analytics[&form.id].count, 1);
    }

    #[tokio::test]
    async fn test_submit_retries_after_concurrent_change() {
        let temp_dir = TempDir::new().unwrap();
        let orch = orchestrator(&temp_dir, MemoryRemote::default());
        let form = orch.save_form(rsvp_form()).await.unwrap().value;

        // The second fetch of the first round sees a different revision
        let remote = orch.remote.as_ref().unwrap();
        let writes_before = remote.writes.load(Ordering::SeqCst);
        remote.interfere.store(2, Ordering::SeqCst);

        let (_, outcome) = orch
            .submit_form_response(&form.id, answers("Ravi"), "cli")
            .await
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Delivered);
        assert_eq!(remote.writes.load(Ordering::SeqCst), writes_before + 1);
    }

    #[tokio::test]
    async fn test_submit_gives_up_after_repeated_conflicts() {
        let temp_dir = TempDir::new().unwrap();
        let orch = orchestrator(&temp_dir, MemoryRemote::default());
        let form = orch.save_form(rsvp_form()).await.unwrap().value;

        orch.remote
            .as_ref()
            .unwrap()
            .interfere
            .store(usize::MAX / 2, Ordering::SeqCst);

        let (_, outcome) = orch
            .submit_form_response(&form.id, answers("Ravi"), "cli")
            .await
            .unwrap();
        assert!(matches!(outcome, SubmitOutcome::Queued { .. }));
        assert_eq!(orch.pending_retries().await, 1);
    }

    #[tokio::test]
    async fn test_transport_failure_queues_then_retry_delivers() {
        let temp_dir = TempDir::new().unwrap();
        let orch = orchestrator(&temp_dir, MemoryRemote::default());
        let form = orch.save_form(rsvp_form()).await.unwrap().value;

        let remote = orch.remote.as_ref().unwrap();
        *remote.fail_fetch.lock().unwrap() = Some(RemoteError::network("timeout"));

        let (response, outcome) = orch
            .submit_form_response(&form.id, answers("Meera"), "cli")
            .await
            .unwrap();
        assert!(matches!(outcome, SubmitOutcome::Queued { .. }));
        assert_eq!(orch.pending_retries().await, 1);
        assert_eq!(orch.next_retry_delay().await, Some(Duration::from_secs(30)));

        *remote.fail_fetch.lock().unwrap() = None;
        let summary = orch.process_retry_queue().await.unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(orch.pending_retries().await, 0);

        let stored = remote.stored().unwrap();
        assert!(stored.form(&form.id).unwrap().has_response(&response.id));
    }

    #[tokio::test]
    async fn test_refused_retry_stops_later_passes() {
        let temp_dir = TempDir::new().unwrap();
        let orch = orchestrator(&temp_dir, MemoryRemote::default());
        let form = orch.save_form(rsvp_form()).await.unwrap().value;

        let remote = orch.remote.as_ref().unwrap();
        *remote.fail_fetch.lock().unwrap() = Some(RemoteError::network("timeout"));
        orch.submit_form_response(&form.id, answers("Ravi"), "cli")
            .await
            .unwrap();

        *remote.fail_fetch.lock().unwrap() = None;
        *remote.fail_write.lock().unwrap() = Some(RemoteError::Forbidden);
        let summary = orch.process_retry_queue().await.unwrap();
        assert_eq!(summary.failed, 1);
        assert!(!orch.cloud_write_enabled());
        assert_eq!(orch.status().status(), SyncStatus::LocalOnly);

        let later = orch.process_retry_queue().await.unwrap();
        assert_eq!(later.failed, 0);
        assert_eq!(later.remaining, 1);
        assert_eq!(orch.retry_items().await[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_invalid_response_is_rejected_locally() {
        let temp_dir = TempDir::new().unwrap();
        let orch = orchestrator(&temp_dir, MemoryRemote::default());
        let form = orch.save_form(rsvp_form()).await.unwrap().value;

        let err = orch
            .submit_form_response(&form.id, BTreeMap::new(), "cli")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SubmitError::Validation(ValidationError::MissingAnswer { id: 1 })
        ));

        let err = orch
            .submit_form_response("missing", answers("x"), "cli")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SubmitError::Validation(ValidationError::UnknownForm { .. })
        ));
    }

    #[tokio::test]
    async fn test_reconnect_flushes_queue() {
        let temp_dir = TempDir::new().unwrap();
        let orch = orchestrator(&temp_dir, MemoryRemote::default());
        let form = orch.save_form(rsvp_form()).await.unwrap().value;

        orch.set_online(false).await.unwrap();
        let (_, outcome) = orch
            .submit_form_response(&form.id, answers("Kiran"), "cli")
            .await
            .unwrap();
        assert!(matches!(outcome, SubmitOutcome::Queued { .. }));

        let synced = orch.set_online(true).await.unwrap();
        assert!(matches!(synced, Some(SyncOutcome::Synced { .. })));
        assert_eq!(orch.pending_retries().await, 0);
    }

    #[tokio::test]
    async fn test_without_remote_everything_is_local() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open_with_config(Config::with_data_dir(temp_dir.path())).unwrap();
        let orch: SyncOrchestrator<MemoryRemote> =
            SyncOrchestrator::new(store, Some(MemoryRemote::default())).unwrap();

        // sync_enabled is false, so the remote is dropped
        assert!(!orch.has_remote());
        assert_eq!(orch.status().status(), SyncStatus::LocalOnly);
        let published = orch.create_notice(Notice::new("Local"), None).await.unwrap();
        assert_eq!(
            published.upload,
            UploadOutcome::Skipped(SkipReason::NotConfigured)
        );
    }
}
