//! Remote error taxonomy
//!
//! `NotFound` is not an error: a missing document is reported through
//! [`super::FetchOutcome::NotFound`]. Everything here is a real failure the
//! orchestrator turns into a status message.

use thiserror::Error;

use crate::error::ValidationError;

/// How a request failed before an HTTP status was available (or with an
/// unexpected one)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportKind {
    /// The host refused the request cross-origin. Retrying won't help.
    CrossOrigin,
    /// Connection refused, DNS failure, timeout, dropped connection
    Network,
    /// The server answered with a non-success status
    Http { status: u16 },
    /// The response body couldn't be read
    Body,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// The token was rejected (HTTP 401)
    #[error("Authentication failed: the API token was rejected")]
    Auth,

    /// The document exists but writing is disabled on it (HTTP 403)
    #[error("Write access is not enabled for the remote document")]
    Forbidden,

    #[error("{}", transport_message(.kind, .message))]
    Transport { kind: TransportKind, message: String },

    /// The remote answered with something that isn't a board document
    #[error("Remote document is invalid: {0}")]
    Validation(#[from] ValidationError),

    /// Sync was requested without a remote configured
    #[error("Remote sync is not configured: {0}")]
    NotConfigured(String),

    /// Another writer kept changing the document during a compare-and-swap
    #[error("Remote document changed {attempts} times while writing; giving up")]
    Conflict { attempts: u32 },
}

fn transport_message(kind: &TransportKind, message: &str) -> String {
    match kind {
        TransportKind::CrossOrigin => format!("Cross-origin request blocked: {}", message),
        TransportKind::Network => format!("Network error: {}", message),
        TransportKind::Http { status } => format!("HTTP {}: {}", status, message),
        TransportKind::Body => format!("Failed to read response: {}", message),
    }
}

impl RemoteError {
    pub fn network(message: impl Into<String>) -> Self {
        RemoteError::Transport {
            kind: TransportKind::Network,
            message: message.into(),
        }
    }

    pub fn cross_origin(message: impl Into<String>) -> Self {
        RemoteError::Transport {
            kind: TransportKind::CrossOrigin,
            message: message.into(),
        }
    }

    pub fn http(status: u16, body: impl Into<String>) -> Self {
        RemoteError::Transport {
            kind: TransportKind::Http { status },
            message: body.into(),
        }
    }

    /// Whether this failure means remote writes should stop for the session.
    /// A rejected token stays rejected until the configuration changes.
    pub fn disables_writes(&self) -> bool {
        matches!(
            self,
            RemoteError::Auth
                | RemoteError::Forbidden
                | RemoteError::Transport {
                    kind: TransportKind::CrossOrigin,
                    ..
                }
        )
    }

    /// Whether a later attempt of the same request could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Transport { kind, .. } => match kind {
                TransportKind::Network | TransportKind::Body => true,
                TransportKind::Http { status } => *status >= 500 || *status == 429,
                TransportKind::CrossOrigin => false,
            },
            RemoteError::Conflict { .. } => true,
            _ => false,
        }
    }

    /// Short guidance for the status line
    pub fn user_message(&self) -> String {
        match self {
            RemoteError::Auth => {
                "Cloud sync failed: invalid API token. Update api_token in the configuration."
                    .to_string()
            }
            RemoteError::Forbidden => {
                "Cloud writes are disabled for this document. Changes are saved locally only."
                    .to_string()
            }
            RemoteError::Transport {
                kind: TransportKind::CrossOrigin,
                ..
            } => "The cloud service blocked the request. Changes are saved locally only."
                .to_string(),
            RemoteError::Transport {
                kind: TransportKind::Network,
                ..
            } => "Cloud unreachable. Changes are saved locally; try syncing again later."
                .to_string(),
            other => format!("Cloud sync failed: {}", other),
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;
