//! Validation errors
//!
//! Raised when a form, response or document entry has the wrong shape.
//! Storage and remote failures have their own error types in
//! [`crate::storage`] and [`crate::sync`].

use thiserror::Error;

/// A value failed a shape or content check
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Form title must not be empty")]
    EmptyTitle,

    #[error("Question {id} has no text")]
    EmptyQuestion { id: u32 },

    #[error("Question id {id} is used more than once")]
    DuplicateQuestionId { id: u32 },

    #[error("Question {id} needs at least 2 options, found {found}")]
    TooFewOptions { id: u32, found: usize },

    #[error("Question {id} is free text and must not carry options")]
    UnexpectedOptions { id: u32 },

    #[error("Form has no questions")]
    NoQuestions,

    #[error("Question {id} is required")]
    MissingAnswer { id: u32 },

    #[error("Question {id} expects {expected}")]
    AnswerShape { id: u32, expected: &'static str },

    #[error("'{answer}' is not an option of question {id}")]
    UnknownOption { id: u32, answer: String },

    #[error("Form has no question with id {id}")]
    UnknownQuestion { id: u32 },

    #[error("Form '{form_id}' does not exist")]
    UnknownForm { form_id: String },

    #[error("Form '{form_id}' is not accepting responses")]
    FormDisabled { form_id: String },

    #[error("Malformed {collection} entry at index {index}: {details}")]
    MalformedEntry {
        collection: &'static str,
        index: usize,
        /// Id of the entry, when one could still be read from it
        id: Option<String>,
        details: String,
    },

    #[error("Malformed document: {0}")]
    MalformedDocument(String),
}
