//! Cloud sync for the notice board
//!
//! The board is mirrored to a single JSON document on a hosted key-value
//! service. There is no push channel: the document is read on page load,
//! on manual sync, on reconnect and on focus regain, and rewritten whole
//! after every local change.
//!
//! ## Flow
//!
//! 1. A local operation updates the [`Store`](crate::store::Store)
//! 2. The orchestrator reads the remote document
//! 3. Forms are merged; attachments are shrunk to fit the payload limit
//! 4. The assembled document replaces the remote copy
//!
//! Form responses take a separate path guarded by a per-form lock, and
//! failed deliveries go to the retry queue.

mod error;
mod hosting;
mod lock;
mod merge;
mod optimizer;
mod orchestrator;
mod remote;
mod retry;
mod status;
mod worker;

pub use error::{RemoteError, RemoteResult, TransportKind};
pub use hosting::{promote_to_hosted, FileHost, HostedReference, HostingError};
pub use lock::{KeyGuard, KeyedLock};
pub use merge::{merge_forms, merge_notices};
pub use optimizer::{
    check_payload, AttachmentOptimizer, ImageCompressor, JpegCompressor, OptimizeError,
    PayloadWarning, COMPRESSED_TARGET, INLINE_THRESHOLD, REMOTE_SIZE_LIMIT,
};
pub use orchestrator::{
    Published, SkipReason, SubmitError, SubmitOutcome, SyncOrchestrator, SyncOutcome,
    UploadOutcome,
};
pub use remote::{check_status, classify_transport_message, FetchOutcome, HttpRemote, RemoteStore, WriteOutcome};
pub use retry::{
    backoff, FailedEntry, ProcessSummary, RetryHandler, RetryItem, RetryQueue, FAILED_LOG_CAP,
    FORM_RESPONSE,
};
pub use status::{StatusPhase, StatusSnapshot, StatusTracker, SyncStatus};
pub use worker::{spawn_retry_worker, RetryCommand, RetryWorkerHandle};
