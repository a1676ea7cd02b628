//! Session state
//!
//! What the admin is currently editing is an explicit value passed to the
//! handlers that need it, not a set of nullable cursors on a long-lived
//! object. The admin unlock flag lives only as long as the session value.

use crate::forms::FormDraft;

/// What the admin is working on right now
#[derive(Debug, Clone, Default, PartialEq)]
pub enum EditingSession {
    #[default]
    Idle,
    /// Editing an existing notice
    EditingNotice(String),
    /// Building a new capture form, or editing one (`form_id` set)
    BuildingForm {
        form_id: Option<String>,
        draft: FormDraft,
    },
}

impl EditingSession {
    pub fn edit_notice(id: impl Into<String>) -> Self {
        EditingSession::EditingNotice(id.into())
    }

    pub fn new_form(title: impl Into<String>) -> Self {
        EditingSession::BuildingForm {
            form_id: None,
            draft: FormDraft::new(title),
        }
    }

    /// The notice being edited, if any
    pub fn notice_id(&self) -> Option<&str> {
        match self {
            EditingSession::EditingNotice(id) => Some(id),
            _ => None,
        }
    }

    pub fn draft_mut(&mut self) -> Option<&mut FormDraft> {
        match self {
            EditingSession::BuildingForm { draft, .. } => Some(draft),
            _ => None,
        }
    }

    /// End the session, handing back whatever was in progress
    pub fn finish(&mut self) -> EditingSession {
        std::mem::take(self)
    }
}

/// Admin authentication for one session; never persisted
#[derive(Debug, Default)]
pub struct AdminSession {
    unlocked: bool,
}

impl AdminSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unlock with the shared passphrase.
    ///
    /// When no passphrase is configured the board is open and any attempt
    /// unlocks. Returns whether the session is now unlocked.
    pub fn unlock(&mut self, attempt: &str, configured: Option<&str>) -> bool {
        self.unlocked = match configured {
            Some(expected) => constant_time_eq(attempt.as_bytes(), expected.as_bytes()),
            None => true,
        };
        self.unlocked
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked
    }

    pub fn lock(&mut self) {
        self.unlocked = false;
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::QuestionKind;

    #[test]
    fn test_editing_session_transitions() {
        let mut session = EditingSession::default();
        assert_eq!(session, EditingSession::Idle);
        assert!(session.draft_mut().is_none());

        session = EditingSession::edit_notice("n1");
        assert_eq!(session.notice_id(), Some("n1"));

        let finished = session.finish();
        assert_eq!(finished, EditingSession::EditingNotice("n1".to_string()));
        assert_eq!(session, EditingSession::Idle);
    }

    #[test]
    fn test_building_form_draft() {
        let mut session = EditingSession::new_form("Survey");
        let draft = session.draft_mut().unwrap();
        draft.add_question(QuestionKind::Text, "Name", true, vec![]);

        let EditingSession::BuildingForm { draft, form_id } = session.finish() else {
            panic!("expected a form draft");
        };
        assert!(form_id.is_none());
        assert_eq!(draft.build().unwrap().questions.len(), 1);
    }

    #[test]
    fn test_admin_unlock() {
        let mut admin = AdminSession::new();
        assert!(!admin.is_unlocked());

        assert!(!admin.unlock("wrong", Some("s3cret")));
        assert!(admin.unlock("s3cret", Some("s3cret")));
        admin.lock();
        assert!(!admin.is_unlocked());

        assert!(admin.unlock("", None));
    }
}
