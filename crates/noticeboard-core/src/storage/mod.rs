//! Storage layer
//!
//! The local store is a durable key-value map (one JSON file per key) that
//! holds the canonical local snapshot between sync cycles, plus the retry
//! queue and bookkeeping the sync subsystem persists.

pub mod error;
pub mod local;

pub use error::{StorageError, StorageResult};
pub use local::{LocalStore, StorageKey};
