//! Remote document client
//!
//! Talks to the hosted JSON service: `GET {base}{id}` reads the document,
//! `POST {base}{id}` replaces it. The client is stateless; the orchestrator
//! decides what to do with every outcome.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::StatusCode;
use tracing::{debug, info, warn};

use super::error::{RemoteError, RemoteResult, TransportKind};
use super::optimizer::REMOTE_SIZE_LIMIT;
use crate::config::Config;
use crate::document::RemoteDocument;

/// Result of reading the remote document
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Found {
        document: RemoteDocument,
        /// Notices present in the document that could not be decoded
        skipped_notices: Vec<String>,
    },
    /// Nothing stored yet; the first write creates it
    NotFound,
}

impl FetchOutcome {
    /// A document where every entry decoded
    pub fn found(document: RemoteDocument) -> Self {
        FetchOutcome::Found {
            document,
            skipped_notices: Vec::new(),
        }
    }

    /// The document, or an empty skeleton when none exists yet
    pub fn into_document(self) -> RemoteDocument {
        match self {
            FetchOutcome::Found { document, .. } => document,
            FetchOutcome::NotFound => RemoteDocument::empty(),
        }
    }
}

/// Result of a successful write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written { bytes: usize },
    /// Accepted, but larger than the service is known to tolerate
    WrittenOversized { bytes: usize, limit: usize },
}

impl WriteOutcome {
    pub fn bytes(&self) -> usize {
        match self {
            WriteOutcome::Written { bytes } | WriteOutcome::WrittenOversized { bytes, .. } => {
                *bytes
            }
        }
    }

    pub fn is_oversized(&self) -> bool {
        matches!(self, WriteOutcome::WrittenOversized { .. })
    }
}

/// A store holding the single remote document
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn fetch_document(&self) -> RemoteResult<FetchOutcome>;

    async fn write_document(&self, doc: &RemoteDocument) -> RemoteResult<WriteOutcome>;
}

/// HTTP client for the hosted JSON service
pub struct HttpRemote {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HttpRemote {
    pub fn new(url: impl Into<String>, token: Option<String>, timeout: Duration) -> RemoteResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("noticeboard/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RemoteError::NotConfigured(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
            token,
        })
    }

    pub fn from_config(config: &Config) -> RemoteResult<Self> {
        let url = config.document_url().ok_or_else(|| {
            RemoteError::NotConfigured("remote_base_url and document_id must be set".to_string())
        })?;
        Self::new(url, config.api_token.clone(), config.request_timeout())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, token),
            None => request,
        }
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn fetch_document(&self) -> RemoteResult<FetchOutcome> {
        debug!("Fetching remote document from {}", self.url);
        let request = self
            .client
            .get(&self.url)
            .header(ACCEPT, "application/json")
            .header(CACHE_CONTROL, "no-cache");

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| classify_request_error(&e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            info!("Remote document does not exist yet");
            return Ok(FetchOutcome::NotFound);
        }

        let body = response.bytes().await.map_err(|e| classify_request_error(&e))?;
        check_status(status.as_u16(), &String::from_utf8_lossy(&body))?;

        let parsed = RemoteDocument::parse_lenient(&body)?;
        debug!(
            "Fetched remote document: {} notices, {} forms, {} skipped",
            parsed.document.notices.len(),
            parsed.document.forms.len(),
            parsed.skipped.len()
        );
        Ok(FetchOutcome::Found {
            skipped_notices: parsed.skipped_notice_ids(),
            document: parsed.document,
        })
    }

    async fn write_document(&self, doc: &RemoteDocument) -> RemoteResult<WriteOutcome> {
        let body = doc
            .to_bytes()
            .map_err(|e| RemoteError::NotConfigured(format!("cannot serialize document: {}", e)))?;
        let bytes = body.len();

        if bytes > REMOTE_SIZE_LIMIT {
            warn!(
                "Writing {} bytes, above the {} byte limit the service usually accepts",
                bytes, REMOTE_SIZE_LIMIT
            );
        }

        let request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body);

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| classify_request_error(&e))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            check_status(status, &text)?;
        }

        info!("Wrote remote document ({} bytes)", bytes);
        Ok(write_outcome(bytes))
    }
}

/// Classify the outcome of a request by status code
///
/// 401 is a bad token; 403 means writes are switched off for the document,
/// which is a different problem from bad auth.
pub fn check_status(status: u16, body: &str) -> RemoteResult<()> {
    match status {
        200..=299 => Ok(()),
        401 => Err(RemoteError::Auth),
        403 => Err(RemoteError::Forbidden),
        _ => Err(RemoteError::http(status, body.trim())),
    }
}

pub(crate) fn write_outcome(bytes: usize) -> WriteOutcome {
    if bytes > REMOTE_SIZE_LIMIT {
        WriteOutcome::WrittenOversized {
            bytes,
            limit: REMOTE_SIZE_LIMIT,
        }
    } else {
        WriteOutcome::Written { bytes }
    }
}

fn classify_request_error(err: &reqwest::Error) -> RemoteError {
    let message = error_chain(err);
    let kind = if err.is_body() || err.is_decode() {
        TransportKind::Body
    } else {
        classify_transport_message(&message)
    };
    RemoteError::Transport { kind, message }
}

/// Tell a cross-origin rejection apart from a plain connectivity failure
pub fn classify_transport_message(message: &str) -> TransportKind {
    let lower = message.to_ascii_lowercase();
    if lower.contains("cors")
        || lower.contains("cross-origin")
        || lower.contains("access-control-allow-origin")
    {
        TransportKind::CrossOrigin
    } else {
        TransportKind::Network
    }
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
