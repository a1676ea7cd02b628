//! Sync status reporting
//!
//! The orchestrator publishes its status through a watch channel so any
//! number of observers (a status line, a CLI printer) see the latest value.
//! After a successful sync the display rotates through informational views
//! on timers; a newer status cancels that rotation.

use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Offline,
    Syncing,
    Synced,
    Error,
    /// Remote writes were refused; everything stays on this device
    LocalOnly,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SyncStatus::Offline => "offline",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
            SyncStatus::Error => "error",
            SyncStatus::LocalOnly => "local only",
        };
        f.write_str(label)
    }
}

/// Which view the status line shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusPhase {
    Status,
    DeveloperInfo,
    LastUpdated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub status: SyncStatus,
    pub message: Option<String>,
    pub phase: StatusPhase,
    pub last_sync: Option<DateTime<Utc>>,
}

impl StatusSnapshot {
    /// Text for the status line in its current phase
    pub fn display_text(&self) -> String {
        match self.phase {
            StatusPhase::Status => match &self.message {
                Some(message) => format!("{}: {}", self.status, message),
                None => self.status.to_string(),
            },
            StatusPhase::DeveloperInfo => {
                format!("noticeboard {}", env!("CARGO_PKG_VERSION"))
            }
            StatusPhase::LastUpdated => match self.last_sync {
                Some(at) => format!("Last updated {}", at.format("%Y-%m-%d %H:%M")),
                None => "Never synced".to_string(),
            },
        }
    }
}

pub struct StatusTracker {
    tx: Arc<watch::Sender<StatusSnapshot>>,
    cascade: StdMutex<Option<JoinHandle<()>>>,
    developer_info_delay: Duration,
    last_updated_delay: Duration,
}

impl StatusTracker {
    pub fn new(initial: SyncStatus, developer_info_delay: Duration, last_updated_delay: Duration) -> Self {
        let (tx, _rx) = watch::channel(StatusSnapshot {
            status: initial,
            message: None,
            phase: StatusPhase::Status,
            last_sync: None,
        });
        Self {
            tx: Arc::new(tx),
            cascade: StdMutex::new(None),
            developer_info_delay,
            last_updated_delay,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> StatusSnapshot {
        self.tx.borrow().clone()
    }

    pub fn status(&self) -> SyncStatus {
        self.tx.borrow().status
    }

    /// Publish a new status, cancelling any pending rotation
    pub fn set(&self, status: SyncStatus, message: Option<String>) {
        let mut cascade = self.cascade.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = cascade.take() {
            handle.abort();
        }

        self.tx.send_modify(|snapshot| {
            snapshot.status = status;
            snapshot.message = message;
            snapshot.phase = StatusPhase::Status;
        });

        if status == SyncStatus::Synced {
            // Outside a runtime there's nothing to drive the timers
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                *cascade = Some(runtime.spawn(rotate(
                    self.tx.clone(),
                    self.developer_info_delay,
                    self.last_updated_delay,
                )));
            }
        }
    }

    pub fn set_last_sync(&self, at: DateTime<Utc>) {
        self.tx.send_modify(|snapshot| snapshot.last_sync = Some(at));
    }
}

impl Drop for StatusTracker {
    fn drop(&mut self) {
        let cascade = self.cascade.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = cascade.take() {
            handle.abort();
        }
    }
}

async fn rotate(tx: Arc<watch::Sender<StatusSnapshot>>, first: Duration, second: Duration) {
    tokio::time::sleep(first).await;
    tx.send_modify(|s| s.phase = StatusPhase::DeveloperInfo);
    tokio::time::sleep(second).await;
    tx.send_modify(|s| s.phase = StatusPhase::LastUpdated);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> StatusTracker {
        StatusTracker::new(
            SyncStatus::Offline,
            Duration::from_secs(3),
            Duration::from_secs(5),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_synced_rotates_through_phases() {
        let tracker = tracker();
        tracker.set(SyncStatus::Synced, None);
        assert_eq!(tracker.current().phase, StatusPhase::Status);

        tokio::time::sleep(Duration::from_millis(3100)).await;
        assert_eq!(tracker.current().phase, StatusPhase::DeveloperInfo);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(tracker.current().phase, StatusPhase::LastUpdated);
        assert_eq!(tracker.status(), SyncStatus::Synced);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_status_cancels_rotation() {
        let tracker = tracker();
        tracker.set(SyncStatus::Synced, None);

        tokio::time::sleep(Duration::from_secs(1)).await;
        tracker.set(SyncStatus::Syncing, None);

        tokio::time::sleep(Duration::from_secs(10)).await;
        let current = tracker.current();
        assert_eq!(current.status, SyncStatus::Syncing);
        assert_eq!(current.phase, StatusPhase::Status);
    }

    #[tokio::test]
    async fn test_subscribers_see_updates() {
        let tracker = tracker();
        let mut rx = tracker.subscribe();

        tracker.set(SyncStatus::Error, Some("Cloud unreachable".to_string()));
        rx.changed().await.unwrap();
        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.status, SyncStatus::Error);
        assert_eq!(snapshot.display_text(), "error: Cloud unreachable");
    }

    #[test]
    fn test_display_text_phases() {
        let mut snapshot = StatusSnapshot {
            status: SyncStatus::LocalOnly,
            message: None,
            phase: StatusPhase::Status,
            last_sync: None,
        };
        assert_eq!(snapshot.display_text(), "local only");

        snapshot.phase = StatusPhase::LastUpdated;
        assert_eq!(snapshot.display_text(), "Never synced");
    }

    #[test]
    fn test_set_outside_runtime() {
        let tracker = tracker();
        tracker.set(SyncStatus::Synced, None);
        assert_eq!(tracker.status(), SyncStatus::Synced);
    }
}
