//! External file hosting
//!
//! Large files can be moved out of the document entirely: the bytes go to a
//! file host and the notice keeps only a link.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::models::{Attachment, HostedAttachment, Notice};

/// What a file host hands back after an upload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostedReference {
    pub url: String,
    pub service: String,
    pub upload_date: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum HostingError {
    #[error("Attachment {name} has no data to upload: {details}")]
    Unreadable { name: String, details: String },

    #[error("Upload of {name} failed: {details}")]
    Upload { name: String, details: String },
}

#[async_trait]
pub trait FileHost: Send + Sync {
    async fn upload(&self, bytes: Vec<u8>, name: &str) -> Result<HostedReference, HostingError>;
}

/// Upload every inline attachment of `notice` whose size is at least
/// `min_size`, replacing it with a hosted link.
///
/// Hosted attachments are never uploaded again and placeholders have no
/// bytes to send. Returns how many attachments were promoted.
pub async fn promote_to_hosted<H: FileHost + ?Sized>(
    host: &H,
    notice: &mut Notice,
    min_size: u64,
) -> Result<usize, HostingError> {
    let mut promoted = 0;

    for attachment in notice.attachments.iter_mut() {
        let Attachment::Inline(inline) = attachment else {
            continue;
        };
        if inline.size < min_size {
            continue;
        }

        let bytes = inline.decode().map_err(|e| HostingError::Unreadable {
            name: inline.name.clone(),
            details: e.to_string(),
        })?;
        let size = bytes.len() as u64;
        let reference = host.upload(bytes, &inline.name).await?;
        info!("Uploaded {} to {}", inline.name, reference.service);

        *attachment = Attachment::Hosted(HostedAttachment {
            name: inline.name.clone(),
            mime_type: inline.mime_type.clone(),
            size,
            url: reference.url,
            service: reference.service,
            upload_date: reference.upload_date,
        });
        promoted += 1;
    }

    if promoted > 0 {
        notice.touch();
    }
    Ok(promoted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InlineAttachment;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingHost {
        uploads: AtomicUsize,
    }

    #[async_trait]
    impl FileHost for CountingHost {
        async fn upload(&self, bytes: Vec<u8>, name: &str) -> Result<HostedReference, HostingError> {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            Ok(HostedReference {
                url: format!("https://files.example.com/{}?len={}", name, bytes.len()),
                service: "example".to_string(),
                upload_date: Utc::now(),
            })
        }
    }

    #[tokio::test]
    async fn test_promote_large_inline() {
        let host = CountingHost::default();
        let mut notice = Notice::new("Brochure");
        notice.add_attachment(Attachment::Inline(InlineAttachment::from_bytes(
            "big.pdf",
            "application/pdf",
            &vec![1u8; 2048],
        )));
        notice.add_attachment(Attachment::Inline(InlineAttachment::from_bytes(
            "small.txt",
            "text/plain",
            b"hi",
        )));

        let promoted = promote_to_hosted(&host, &mut notice, 1024).await.unwrap();
        assert_eq!(promoted, 1);
        match notice.attachment("big.pdf").unwrap() {
            Attachment::Hosted(h) => {
                assert_eq!(h.size, 2048);
                assert!(h.url.ends_with("big.pdf?len=2048"));
            }
            other => panic!("expected hosted, got {:?}", other),
        }
        assert!(matches!(notice.attachment("small.txt"), Some(Attachment::Inline(_))));

        // Second pass finds nothing left to upload
        let promoted = promote_to_hosted(&host, &mut notice, 1024).await.unwrap();
        assert_eq!(promoted, 0);
        assert_eq!(host.uploads.load(Ordering::SeqCst), 1);
    }
}
