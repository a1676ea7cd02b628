//! Retry queue for remote writes
//!
//! Writes that fail for transient reasons are kept in the local store and
//! retried with exponential backoff. Items that keep failing are moved to a
//! bounded failed-sync log.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::error::RemoteError;
use crate::forms::Response;
use crate::storage::{LocalStore, StorageError, StorageKey, StorageResult};

/// Item type for a form response that still has to reach the remote
pub const FORM_RESPONSE: &str = "form_response";

/// Entries kept in the failed-sync log
pub const FAILED_LOG_CAP: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetryItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
    pub max_attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub last_attempt: Option<DateTime<Utc>>,
}

impl RetryItem {
    pub fn new(kind: impl Into<String>, data: Value, max_attempts: u32) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: Utc::now(),
            attempts: 0,
            max_attempts,
            last_error: None,
            last_attempt: None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Decode the payload of a `form_response` item
    pub fn response(&self) -> Option<Response> {
        if self.kind != FORM_RESPONSE {
            return None;
        }
        serde_json::from_value(self.data.clone()).ok()
    }
}

/// An item that was given up on
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FailedEntry {
    #[serde(flatten)]
    pub item: RetryItem,
    pub failed_at: DateTime<Utc>,
    pub reason: String,
}

/// Performs the remote write for a queued item
#[async_trait]
pub trait RetryHandler: Send + Sync {
    async fn retry(&self, item: &RetryItem) -> Result<(), RemoteError>;
}

/// What one pass over the queue did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub archived: usize,
    pub remaining: usize,
}

/// Persisted list of pending writes
pub struct RetryQueue {
    local: LocalStore,
    items: Vec<RetryItem>,
    max_attempts: u32,
}

impl RetryQueue {
    /// Load the queue from the local store
    pub fn load(local: LocalStore, max_attempts: u32) -> StorageResult<Self> {
        let items = match local.get::<Vec<RetryItem>>(StorageKey::RetryQueue) {
            Ok(items) => items.unwrap_or_default(),
            Err(StorageError::InvalidFormat { details, .. }) => {
                warn!("Discarding unreadable retry queue: {}", details);
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            local,
            items,
            max_attempts,
        })
    }

    pub fn items(&self) -> &[RetryItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn enqueue(&mut self, kind: &str, data: Value) -> StorageResult<()> {
        self.items.push(RetryItem::new(kind, data, self.max_attempts));
        info!("Queued {} for retry ({} pending)", kind, self.items.len());
        self.save()
    }

    pub fn enqueue_response(&mut self, response: &Response) -> StorageResult<()> {
        let data = serde_json::to_value(response).map_err(|source| StorageError::Serialize {
            key: StorageKey::RetryQueue.to_string(),
            source,
        })?;
        self.enqueue(FORM_RESPONSE, data)
    }

    /// Run one pass over every queued item
    pub async fn process<H: RetryHandler + ?Sized>(&mut self, handler: &H) -> StorageResult<ProcessSummary> {
        let mut summary = ProcessSummary::default();
        let mut remaining = Vec::new();
        let mut archived = Vec::new();
        let now = Utc::now();

        for mut item in std::mem::take(&mut self.items) {
            if item.is_exhausted() {
                let reason = item
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "maximum attempts reached".to_string());
                archived.push(failed(item, reason, now));
                continue;
            }

            if item.kind != FORM_RESPONSE {
                let reason = format!("unknown retry item type '{}'", item.kind);
                archived.push(failed(item, reason, now));
                continue;
            }

            item.attempts += 1;
            item.last_attempt = Some(now);
            match handler.retry(&item).await {
                Ok(()) => {
                    debug!("Retry of {} succeeded after {} attempts", item.kind, item.attempts);
                    summary.succeeded += 1;
                }
                Err(e) => {
                    warn!(
                        "Retry {}/{} of {} failed: {}",
                        item.attempts, item.max_attempts, item.kind, e
                    );
                    item.last_error = Some(e.to_string());
                    summary.failed += 1;
                    remaining.push(item);
                }
            }
        }

        summary.archived = archived.len();
        summary.remaining = remaining.len();
        self.items = remaining;
        self.save()?;
        if !archived.is_empty() {
            self.archive(archived)?;
        }
        Ok(summary)
    }

    /// Delay before the next pass, based on the first remaining item
    pub fn next_delay(&self, base: Duration, max: Duration) -> Option<Duration> {
        self.items.first().map(|item| backoff(item.attempts, base, max))
    }

    pub fn failed_log(&self) -> StorageResult<Vec<FailedEntry>> {
        match self.local.get(StorageKey::FailedSyncLog) {
            Ok(entries) => Ok(entries.unwrap_or_default()),
            Err(StorageError::InvalidFormat { details, .. }) => {
                warn!("Ignoring unreadable failed-sync log: {}", details);
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    fn archive(&self, entries: Vec<FailedEntry>) -> StorageResult<()> {
        let mut log = self.failed_log()?;
        for entry in &entries {
            warn!("Giving up on {}: {}", entry.item.kind, entry.reason);
        }
        log.extend(entries);
        if log.len() > FAILED_LOG_CAP {
            let excess = log.len() - FAILED_LOG_CAP;
            log.drain(..excess);
        }
        self.local.set(StorageKey::FailedSyncLog, &log)
    }

    fn save(&self) -> StorageResult<()> {
        self.local.set(StorageKey::RetryQueue, &self.items)
    }
}

fn failed(item: RetryItem, reason: String, now: DateTime<Utc>) -> FailedEntry {
    FailedEntry {
        item,
        failed_at: now,
        reason,
    }
}

/// `min(base * 2^(attempts - 1), max)`
pub fn backoff(attempts: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempts.saturating_sub(1).min(16);
    base.saturating_mul(1 << exponent).min(max)
}
