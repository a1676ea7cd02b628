//! Merge engine
//!
//! Notices use document-level last-write-wins: whichever side was written
//! after the last successful sync wins as a whole. The one exception is
//! attachments, because the remote copy may carry placeholders for files
//! that only exist in full locally.
//!
//! Forms merge per form id by modification time.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::forms::Form;
use crate::models::{Attachment, Notice};

/// Reconcile the local notices with a freshly fetched remote list
///
/// `skipped` holds ids of remote notices that could not be decoded. Those
/// keep their local copy rather than being treated as deleted.
pub fn merge_notices(
    local: &[Notice],
    remote: &[Notice],
    skipped: &[String],
    local_last_sync: Option<DateTime<Utc>>,
    remote_last_updated: Option<DateTime<Utc>>,
) -> Vec<Notice> {
    if let (Some(last_sync), Some(updated)) = (local_last_sync, remote_last_updated) {
        if updated <= last_sync {
            debug!("Remote not modified since last sync; keeping local notices");
            return local.to_vec();
        }
    }

    let by_id: HashMap<&str, &Notice> = local.iter().map(|n| (n.id.as_str(), n)).collect();

    let mut merged: Vec<Notice> = remote
        .iter()
        .map(|incoming| match by_id.get(incoming.id.as_str()) {
            Some(existing) => Notice {
                attachments: recover_attachments(&existing.attachments, &incoming.attachments),
                ..incoming.clone()
            },
            None => incoming.clone(),
        })
        .collect();

    for id in skipped {
        if merged.iter().any(|n| &n.id == id) {
            continue;
        }
        if let Some(existing) = by_id.get(id.as_str()) {
            debug!("Remote copy of notice {} is unreadable; keeping local", id);
            merged.push((*existing).clone());
        }
    }

    merged
}

fn recover_attachments(local: &[Attachment], remote: &[Attachment]) -> Vec<Attachment> {
    if remote.is_empty() {
        return local.to_vec();
    }

    remote
        .iter()
        .map(|incoming| {
            if !incoming.is_placeholder() {
                return incoming.clone();
            }
            match local
                .iter()
                .find(|a| a.name() == incoming.name() && !a.is_placeholder())
            {
                Some(full) => {
                    debug!("Keeping local copy of {}", full.name());
                    full.clone()
                }
                None => incoming.clone(),
            }
        })
        .collect()
}

/// Per-form last-write-wins
///
/// A remote form replaces the local one only when its modification time is
/// strictly newer. Local forms keep their order; cloud-only forms follow.
pub fn merge_forms(local: &[Form], remote: &[Form]) -> Vec<Form> {
    let mut merged: Vec<Form> = local.to_vec();
    let mut index: HashMap<String, usize> = merged
        .iter()
        .enumerate()
        .map(|(i, f)| (f.id.clone(), i))
        .collect();

    for incoming in remote {
        match index.get(&incoming.id) {
            Some(&i) => {
                if is_newer(incoming.modified_at(), merged[i].modified_at()) {
                    merged[i] = incoming.clone();
                }
            }
            None => {
                index.insert(incoming.id.clone(), merged.len());
                merged.push(incoming.clone());
            }
        }
    }

    merged
}

fn is_newer(incoming: Option<DateTime<Utc>>, existing: Option<DateTime<Utc>>) -> bool {
    match (incoming, existing) {
        (Some(a), Some(b)) => a > b,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::{FormDraft, QuestionKind};
    use crate::models::{InlineAttachment, PlaceholderAttachment};
    use chrono::Duration;

    fn placeholder(name: &str) -> Attachment {
        Attachment::Placeholder(PlaceholderAttachment {
            name: name.to_string(),
            mime_type: "application/pdf".to_string(),
            size: 0,
            original_size: 500_000,
            note: "File too large for cloud sync".to_string(),
            thumbnail_data: None,
        })
    }

    fn inline(name: &str) -> Attachment {
        Attachment::Inline(InlineAttachment::from_bytes(
            name,
            "application/pdf",
            b"%PDF-1.4 full file",
        ))
    }

    fn form(title: &str, modified: DateTime<Utc>) -> Form {
        let mut draft = FormDraft::new(title);
        draft.add_question(QuestionKind::Text, "Name", true, vec![]);
        let mut form = draft.build().unwrap();
        form.id = "form-1".to_string();
        form.created = Some(modified - Duration::days(1));
        form.last_modified = Some(modified);
        form
    }

    #[test]
    fn test_idempotent_when_equal() {
        let now = Utc::now();
        let notices = vec![Notice::new("A"), Notice::new("B")];

        let merged = merge_notices(&notices, &notices, &[], Some(now), Some(now));
        assert_eq!(merged, notices);

        let again = merge_notices(&merged, &notices, &[], Some(now), Some(now));
        assert_eq!(again, notices);
    }

    #[test]
    fn test_remote_newer_wins() {
        let last_sync = Utc::now();
        let local = Notice::new("Old title");
        let mut remote = local.clone();
        remote.title = "New title".to_string();

        let merged = merge_notices(
            &[local],
            &[remote],
            &[],
            Some(last_sync),
            Some(last_sync + Duration::seconds(10)),
        );
        assert_eq!(merged[0].title, "New title");
    }

    #[test]
    fn test_remote_not_newer_keeps_local() {
        let last_sync = Utc::now();
        let local = vec![Notice::new("Local only")];

        let merged = merge_notices(&local, &[], &[], Some(last_sync), Some(last_sync));
        assert_eq!(merged, local);
    }

    #[test]
    fn test_first_sync_takes_remote() {
        let local = vec![Notice::new("Local")];
        let remote = vec![Notice::new("Remote")];

        let merged = merge_notices(&local, &remote, &[], None, Some(Utc::now()));
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].title, "Remote");
    }

    #[test]
    fn test_unreadable_remote_notice_keeps_local() {
        let last_sync = Utc::now() - Duration::hours(1);
        let kept = Notice::new("Keep me");
        let dropped = Notice::new("Deleted elsewhere");
        let incoming = Notice::new("New from cloud");

        let merged = merge_notices(
            &[kept.clone(), dropped],
            &[incoming.clone()],
            &[kept.id.clone(), "not-local".to_string()],
            Some(last_sync),
            Some(Utc::now()),
        );
        assert_eq!(merged, vec![incoming, kept]);
    }

    #[test]
    fn test_placeholder_never_replaces_full_attachment() {
        let mut local = Notice::new("Timetable");
        local.attachments = vec![inline("x.pdf")];
        let mut remote = local.clone();
        remote.title = "Timetable v2".to_string();
        remote.attachments = vec![placeholder("x.pdf"), placeholder("y.pdf")];

        let merged = merge_notices(&[local], &[remote], &[], None, None);
        assert_eq!(merged[0].title, "Timetable v2");
        assert_eq!(merged[0].attachments[0], inline("x.pdf"));
        assert!(merged[0].attachments[1].is_placeholder());
    }

    #[test]
    fn test_empty_remote_attachments_keep_local() {
        let mut local = Notice::new("Circular");
        local.attachments = vec![inline("circular.pdf")];
        let mut remote = local.clone();
        remote.attachments.clear();

        let merged = merge_notices(&[local.clone()], &[remote], &[], None, None);
        assert_eq!(merged[0].attachments, local.attachments);
    }

    #[test]
    fn test_merge_forms_keeps_strictly_newer() {
        let t = Utc::now();
        let older = form("Old", t);
        let newer = form("New", t + Duration::minutes(5));

        let merged = merge_forms(&[older.clone()], &[newer.clone()]);
        assert_eq!(merged, vec![newer.clone()]);

        let reversed = merge_forms(&[newer.clone()], &[older]);
        assert_eq!(reversed, vec![newer.clone()]);

        let tie = merge_forms(&[newer.clone()], &[form("Same time", t + Duration::minutes(5))]);
        assert_eq!(tie[0].title, "New");
    }

    #[test]
    fn test_merge_forms_order() {
        let t = Utc::now();
        let mut local_only = form("Local", t);
        local_only.id = "local".to_string();
        let mut shared = form("Shared", t);
        shared.id = "shared".to_string();
        let mut cloud_only = form("Cloud", t);
        cloud_only.id = "cloud".to_string();

        let merged = merge_forms(
            &[local_only, shared.clone()],
            &[cloud_only, shared],
        );
        let ids: Vec<&str> = merged.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["local", "shared", "cloud"]);
    }

    #[test]
    fn test_merge_forms_falls_back_to_created() {
        let t = Utc::now();
        let mut local = form("Local", t);
        local.last_modified = None;
        let mut remote = form("Remote", t);
        remote.last_modified = None;
        remote.created = Some(t + Duration::hours(1));

        let merged = merge_forms(&[local], &[remote]);
        assert_eq!(merged[0].title, "Remote");
    }
}
