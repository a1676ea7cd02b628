//! Notice Board Core Library
//!
//! This crate provides the core of the college notice board: notices and
//! capture forms kept in a local durable store, and opportunistic sync of
//! the whole board with a single document on a hosted JSON service.
//!
//! # Architecture
//!
//! - **Local store**: source of truth on this device; every change lands
//!   here first
//! - **Remote document**: one JSON document replaced whole on each write,
//!   reconciled with last-write-wins
//!
//! # Quick Start
//!
//! ```text
//! let store = Store::open()?;
//! let remote = HttpRemote::from_config(store.config()).ok();
//! let orchestrator = SyncOrchestrator::new(store, remote)?;
//!
//! orchestrator.on_page_load().await?;
//! orchestrator.create_notice(Notice::new("Mid-term timetable"), Some(1)).await?;
//! ```
//!
//! # Modules
//!
//! - `store`: Local document store (main entry point)
//! - `models`: Notices and attachments
//! - `forms`: Capture forms, questions and responses
//! - `ordering`: Pinned and floating notice positions
//! - `document`: The remote document and its lenient parser
//! - `session`: Editing and admin session state
//! - `storage`: Key-value persistence
//! - `sync`: Remote client, merge, attachment optimizer, retry queue
//! - `config`: Application configuration

pub mod config;
pub mod document;
pub mod error;
pub mod forms;
pub mod models;
pub mod ordering;
pub mod session;
pub mod storage;
pub mod store;
pub mod sync;

pub use config::Config;
pub use document::{DocumentMetadata, DocumentToken, ParsedDocument, RemoteDocument};
pub use error::ValidationError;
pub use forms::{Answer, AnswerEntry, Form, FormDraft, Question, QuestionKind, Response};
pub use models::{
    Attachment, Category, HostedAttachment, InlineAttachment, Notice, PlaceholderAttachment,
    Priority, ScrollingSpeed,
};
pub use session::{AdminSession, EditingSession};
pub use storage::{LocalStore, StorageError, StorageKey, StorageResult};
pub use store::{Store, SubmissionStats};
pub use sync::{
    HttpRemote, RemoteError, RemoteStore, SyncOrchestrator, SyncOutcome, SyncStatus,
    UploadOutcome,
};
