//! Background retry worker
//!
//! A spawned task that runs retry passes on the backoff schedule. It sleeps
//! until the first queued item is due, wakes early when something is
//! queued or a pass is requested, and stops on shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::orchestrator::SyncOrchestrator;
use super::remote::RemoteStore;

/// Commands sent to the retry worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCommand {
    /// Run a pass immediately
    ProcessNow,
    Shutdown,
}

/// Handle to control the retry worker
pub struct RetryWorkerHandle {
    /// Send commands to the worker
    pub command_tx: mpsc::Sender<RetryCommand>,
    task: JoinHandle<()>,
}

impl RetryWorkerHandle {
    pub async fn process_now(&self) {
        let _ = self.command_tx.send(RetryCommand::ProcessNow).await;
    }

    /// Stop the worker and wait for it to finish
    pub async fn shutdown(self) {
        let _ = self.command_tx.send(RetryCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!("Retry worker ended abnormally: {}", e);
        }
    }
}

pub fn spawn_retry_worker<R>(orchestrator: Arc<SyncOrchestrator<R>>) -> RetryWorkerHandle
where
    R: RemoteStore + 'static,
{
    let (command_tx, command_rx) = mpsc::channel(16);
    let task = tokio::spawn(worker_loop(orchestrator, command_rx));
    RetryWorkerHandle { command_tx, task }
}

async fn worker_loop<R: RemoteStore + 'static>(
    orchestrator: Arc<SyncOrchestrator<R>>,
    mut command_rx: mpsc::Receiver<RetryCommand>,
) {
    debug!("Retry worker started");

    loop {
        let delay = orchestrator.next_retry_delay().await;

        tokio::select! {
            _ = wait_for(delay) => {
                run_pass(&orchestrator).await;
            }
            _ = orchestrator.retry_scheduled().notified() => {
                // Recompute the delay with the new item in place
            }
            cmd = command_rx.recv() => {
                match cmd {
                    Some(RetryCommand::ProcessNow) => run_pass(&orchestrator).await,
                    Some(RetryCommand::Shutdown) | None => break,
                }
            }
        }
    }

    info!("Retry worker stopped");
}

async fn wait_for(delay: Option<Duration>) {
    match delay {
        Some(delay) => tokio::time::sleep(delay).await,
        None => std::future::pending::<()>().await,
    }
}

async fn run_pass<R: RemoteStore>(orchestrator: &SyncOrchestrator<R>) {
    match orchestrator.process_retry_queue().await {
        Ok(summary) => debug!(
            "Retry pass done: {} delivered, {} remaining",
            summary.succeeded, summary.remaining
        ),
        Err(e) => warn!("Retry pass failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::document::RemoteDocument;
    use crate::forms::{Answer, FormDraft, QuestionKind};
    use crate::store::Store;
    use crate::sync::error::{RemoteError, RemoteResult};
    use crate::sync::remote::{FetchOutcome, WriteOutcome};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    /// Remote that can be switched between reachable and unreachable
    #[derive(Default)]
    struct FlakyRemote {
        down: Arc<AtomicBool>,
        doc: StdMutex<Option<RemoteDocument>>,
    }

    #[async_trait]
    impl RemoteStore for FlakyRemote {
        async fn fetch_document(&self) -> RemoteResult<FetchOutcome> {
            if self.down.load(Ordering::SeqCst) {
                return Err(RemoteError::network("unreachable"));
            }
            Ok(match self.doc.lock().unwrap().clone() {
                Some(doc) => FetchOutcome::found(doc),
                None => FetchOutcome::NotFound,
            })
        }

        async fn write_document(&self, doc: &RemoteDocument) -> RemoteResult<WriteOutcome> {
            if self.down.load(Ordering::SeqCst) {
                return Err(RemoteError::network("unreachable"));
            }
            *self.doc.lock().unwrap() = Some(doc.clone());
            Ok(WriteOutcome::Written { bytes: 1 })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_delivers_after_backoff() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config {
            sync_enabled: true,
            ..Config::with_data_dir(temp_dir.path())
        };
        let store = Store::open_with_config(config).unwrap();
        let remote = FlakyRemote::default();
        let down = remote.down.clone();
        let orchestrator = Arc::new(SyncOrchestrator::new(store, Some(remote)).unwrap());

        let mut draft = FormDraft::new("Feedback");
        draft.add_question(QuestionKind::Text, "Comments", true, vec![]);
        let form = orchestrator
            .save_form(draft.build().unwrap())
            .await
            .unwrap()
            .value;

        let worker = spawn_retry_worker(orchestrator.clone());

        down.store(true, Ordering::SeqCst);
        let mut answers = BTreeMap::new();
        answers.insert(1, Answer::Single("Great fest".to_string()));
        orchestrator
            .submit_form_response(&form.id, answers, "test")
            .await
            .unwrap();
        assert_eq!(orchestrator.pending_retries().await, 1);

        down.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(orchestrator.pending_retries().await, 0);

        worker.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_worker() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open_with_config(Config::with_data_dir(temp_dir.path())).unwrap();
        let orchestrator = Arc::new(SyncOrchestrator::<FlakyRemote>::new(store, None).unwrap());

        let worker = spawn_retry_worker(orchestrator);
        worker.process_now().await;
        worker.shutdown().await;
    }
}
