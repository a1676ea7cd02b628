//! End-to-end sync tests against an in-memory remote

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tempfile::TempDir;

use noticeboard_core::sync::{
    FetchOutcome, RemoteError, RemoteResult, RemoteStore, SubmitOutcome, SyncOutcome, WriteOutcome,
};
use noticeboard_core::{
    Answer, Attachment, Config, FormDraft, InlineAttachment, Notice, QuestionKind, RemoteDocument,
    Store, SyncOrchestrator, SyncStatus,
};

#[derive(Default)]
struct MemoryRemote {
    doc: Mutex<Option<RemoteDocument>>,
}

impl MemoryRemote {
    fn put(&self, doc: RemoteDocument) {
        *self.doc.lock().unwrap() = Some(doc);
    }

    fn get(&self) -> Option<RemoteDocument> {
        self.doc.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn fetch_document(&self) -> RemoteResult<FetchOutcome> {
        Ok(match self.get() {
            Some(doc) => FetchOutcome::found(doc),
            None => FetchOutcome::NotFound,
        })
    }

    async fn write_document(&self, doc: &RemoteDocument) -> RemoteResult<WriteOutcome> {
        let bytes = doc
            .to_bytes()
            .map_err(|e| RemoteError::NotConfigured(e.to_string()))?
            .len();
        self.put(doc.clone());
        Ok(WriteOutcome::Written { bytes })
    }
}

fn open(temp_dir: &TempDir) -> SyncOrchestrator<MemoryRemote> {
    let config = Config {
        sync_enabled: true,
        ..Config::with_data_dir(temp_dir.path())
    };
    let store = Store::open_with_config(config).unwrap();
    SyncOrchestrator::new(store, Some(MemoryRemote::default())).unwrap()
}

#[tokio::test]
async fn test_newer_remote_title_wins() {
    let temp_dir = TempDir::new().unwrap();
    let orch = open(&temp_dir);

    let created = orch
        .create_notice(Notice::new("Library closed"), None)
        .await
        .unwrap()
        .value;
    let first_sync = orch.store().lock().await.last_sync().unwrap();

    // Another admin edits the notice later
    let remote = orch_remote(&orch);
    let mut doc = remote.get().unwrap();
    doc.notices[0].title = "Library closed on Friday".to_string();
    doc.last_updated = Some(first_sync + Duration::minutes(5));
    remote.put(doc);

    let outcome = orch.sync_with_cloud().await.unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::Synced {
            notices: 1,
            forms: 0
        }
    );

    let store = orch.store().lock().await;
    assert_eq!(
        store.notice(&created.id).unwrap().title,
        "Library closed on Friday"
    );
    assert!(store.last_sync().unwrap() > first_sync);
    assert_eq!(orch.status().status(), SyncStatus::Synced);
}

#[tokio::test]
async fn test_large_attachment_survives_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let orch = open(&temp_dir);

    let mut notice = Notice::new("Syllabus");
    let full = Attachment::Inline(InlineAttachment::from_bytes(
        "syllabus.pdf",
        "application/pdf",
        &vec![b'%'; 150_000],
    ));
    notice.add_attachment(full.clone());
    let created = orch.create_notice(notice, Some(2)).await.unwrap().value;

    // The remote only has a placeholder
    let remote = orch_remote(&orch);
    let mut doc = remote.get().unwrap();
    assert!(doc.notices[0].attachments[0].is_placeholder());

    // Force a remote-wins merge; the local file must be kept
    doc.last_updated = Some(Utc::now() + Duration::minutes(1));
    remote.put(doc);
    orch.sync_with_cloud().await.unwrap();

    let store = orch.store().lock().await;
    let local = store.notice(&created.id).unwrap();
    assert_eq!(local.attachments[0], full);
    assert_eq!(local.order, 2);
}

#[tokio::test]
async fn test_two_devices_share_form_responses() {
    let dir_a = TempDir::new().unwrap();
    let orch_a = open(&dir_a);

    let mut draft = FormDraft::new("Sports day");
    draft.add_question(
        QuestionKind::Radio,
        "Event",
        true,
        vec!["Relay".to_string(), "Long jump".to_string()],
    );
    let form = orch_a.save_form(draft.build().unwrap()).await.unwrap().value;

    // Second device starts from the same remote document
    let other_dir = TempDir::new().unwrap();
    let orch_b = open(&other_dir);
    orch_remote(&orch_b).put(orch_remote(&orch_a).get().unwrap());
    orch_b.sync_with_cloud().await.unwrap();

    let mut answers = BTreeMap::new();
    answers.insert(1, Answer::Single("Relay".to_string()));
    let (response, outcome) = orch_b
        .submit_form_response(&form.id, answers, "device-b")
        .await
        .unwrap();
    assert_eq!(outcome, SubmitOutcome::Delivered);

    let doc = orch_remote(&orch_b).get().unwrap();
    let remote_form = doc.form(&form.id).unwrap();
    assert_eq!(remote_form.responses.len(), 1);
    assert_eq!(remote_form.responses[0].id, response.id);
}

fn orch_remote(orch: &SyncOrchestrator<MemoryRemote>) -> &MemoryRemote {
    orch.remote().unwrap()
}
