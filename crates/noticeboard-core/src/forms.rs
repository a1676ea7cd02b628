//! Capture forms and their responses
//!
//! A form is built by the admin through a [`FormDraft`], attached to a
//! notice, and collects [`Response`] records from visitors. Responses are
//! append-only.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::models::string_or_number;

/// Kind of input a question renders as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    Text,
    Textarea,
    Radio,
    Checkbox,
    Select,
}

impl QuestionKind {
    /// Whether answers must come from the option list
    pub fn is_choice(self) -> bool {
        matches!(
            self,
            QuestionKind::Radio | QuestionKind::Checkbox | QuestionKind::Select
        )
    }
}

impl std::str::FromStr for QuestionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(QuestionKind::Text),
            "textarea" => Ok(QuestionKind::Textarea),
            "radio" => Ok(QuestionKind::Radio),
            "checkbox" => Ok(QuestionKind::Checkbox),
            "select" => Ok(QuestionKind::Select),
            other => Err(format!("unknown question type '{}'", other)),
        }
    }
}

impl std::fmt::Display for QuestionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            QuestionKind::Text => "text",
            QuestionKind::Textarea => "textarea",
            QuestionKind::Radio => "radio",
            QuestionKind::Checkbox => "checkbox",
            QuestionKind::Select => "select",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    /// Unique within the owning form
    pub id: u32,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    pub question: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub options: Vec<String>,
}

/// A submitted answer: one string, or several for checkbox questions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Answer {
    Single(String),
    Multiple(Vec<String>),
}

impl Answer {
    fn is_blank(&self) -> bool {
        match self {
            Answer::Single(s) => s.trim().is_empty(),
            Answer::Multiple(v) => v.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnswerEntry {
    pub question: String,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    pub answer: Answer,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub form_id: String,
    pub responses: BTreeMap<u32, AnswerEntry>,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub device_info: String,
    #[serde(default = "default_response_status")]
    pub status: String,
}

fn default_response_status() -> String {
    "submitted".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Form {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub responses: Vec<Response>,
}

fn default_enabled() -> bool {
    true
}

impl Form {
    /// Timestamp used for last-write-wins between copies of this form
    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        self.last_modified.or(self.created)
    }

    pub fn touch(&mut self) {
        self.last_modified = Some(Utc::now());
    }

    pub fn question(&self, id: u32) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == id)
    }

    pub fn has_response(&self, response_id: &str) -> bool {
        self.responses.iter().any(|r| r.id == response_id)
    }

    /// Append a response unless one with the same id is already present.
    ///
    /// Returns whether the response was added.
    pub fn append_response(&mut self, response: Response) -> bool {
        if self.has_response(&response.id) {
            return false;
        }
        self.responses.push(response);
        true
    }

    /// Validate raw answers against the questions and build a response
    pub fn build_response(
        &self,
        answers: BTreeMap<u32, Answer>,
        device_info: impl Into<String>,
    ) -> Result<Response, ValidationError> {
        if !self.enabled {
            return Err(ValidationError::FormDisabled {
                form_id: self.id.clone(),
            });
        }

        if let Some(&id) = answers.keys().find(|id| self.question(**id).is_none()) {
            return Err(ValidationError::UnknownQuestion { id });
        }

        let mut entries = BTreeMap::new();
        for question in &self.questions {
            let answer = answers.get(&question.id).filter(|a| !a.is_blank());
            let Some(answer) = answer else {
                if question.required {
                    return Err(ValidationError::MissingAnswer { id: question.id });
                }
                continue;
            };

            check_answer(question, answer)?;
            entries.insert(
                question.id,
                AnswerEntry {
                    question: question.question.clone(),
                    kind: question.kind,
                    answer: answer.clone(),
                },
            );
        }

        Ok(Response {
            id: Uuid::new_v4().to_string(),
            form_id: self.id.clone(),
            responses: entries,
            submitted_at: Utc::now(),
            device_info: device_info.into(),
            status: default_response_status(),
        })
    }
}

fn check_answer(question: &Question, answer: &Answer) -> Result<(), ValidationError> {
    let values: Vec<&String> = match (question.kind, answer) {
        (QuestionKind::Checkbox, Answer::Multiple(values)) => values.iter().collect(),
        (QuestionKind::Checkbox, Answer::Single(_)) => {
            return Err(ValidationError::AnswerShape {
                id: question.id,
                expected: "a list of options",
            })
        }
        (_, Answer::Single(value)) => vec![value],
        (_, Answer::Multiple(_)) => {
            return Err(ValidationError::AnswerShape {
                id: question.id,
                expected: "a single value",
            })
        }
    };

    if question.kind.is_choice() {
        if let Some(bad) = values.iter().find(|v| !question.options.contains(v)) {
            return Err(ValidationError::UnknownOption {
                id: question.id,
                answer: (*bad).clone(),
            });
        }
    }
    Ok(())
}

/// A form being assembled by the admin
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormDraft {
    pub title: String,
    pub description: String,
    questions: Vec<Question>,
    next_question_id: u32,
}

impl FormDraft {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            next_question_id: 1,
            ..Self::default()
        }
    }

    /// Start a draft from an existing form, keeping its question ids
    pub fn from_form(form: &Form) -> Self {
        Self {
            title: form.title.clone(),
            description: form.description.clone(),
            questions: form.questions.clone(),
            next_question_id: form.questions.iter().map(|q| q.id).max().unwrap_or(0) + 1,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a question and return its id
    pub fn add_question(
        &mut self,
        kind: QuestionKind,
        text: impl Into<String>,
        required: bool,
        options: Vec<String>,
    ) -> u32 {
        let id = self.next_question_id.max(1);
        self.next_question_id = id + 1;
        self.questions.push(Question {
            id,
            kind,
            question: text.into(),
            required,
            options,
        });
        id
    }

    pub fn remove_question(&mut self, id: u32) -> bool {
        let before = self.questions.len();
        self.questions.retain(|q| q.id != id);
        self.questions.len() != before
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    /// Check every question and produce a new, enabled form
    pub fn build(self) -> Result<Form, ValidationError> {
        self.validate()?;
        let now = Utc::now();
        Ok(Form {
            id: Uuid::new_v4().to_string(),
            title: self.title,
            description: self.description,
            enabled: true,
            questions: self.questions,
            created: Some(now),
            last_modified: Some(now),
            responses: Vec::new(),
        })
    }

    /// Apply this draft's content onto an existing form, keeping id and responses
    pub fn apply_to(self, form: &mut Form) -> Result<(), ValidationError> {
        self.validate()?;
        form.title = self.title;
        form.description = self.description;
        form.questions = self.questions;
        form.touch();
        Ok(())
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        if self.questions.is_empty() {
            return Err(ValidationError::NoQuestions);
        }

        let mut seen = HashSet::new();
        for q in &self.questions {
            if !seen.insert(q.id) {
                return Err(ValidationError::DuplicateQuestionId { id: q.id });
            }
            if q.question.trim().is_empty() {
                return Err(ValidationError::EmptyQuestion { id: q.id });
            }
            if q.kind.is_choice() && q.options.len() < 2 {
                return Err(ValidationError::TooFewOptions {
                    id: q.id,
                    found: q.options.len(),
                });
            }
            if !q.kind.is_choice() && !q.options.is_empty() {
                return Err(ValidationError::UnexpectedOptions { id: q.id });
            }
        }
        Ok(())
    }
}
