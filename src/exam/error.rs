use thiserror::Error;

use super::identity::QuestionKey;
use super::question::QuestionType;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("Select at least one question before applying the selection")]
    NothingRequested,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error("Question {0} is not in the working set")]
    UnknownQuestion(QuestionKey),
    #[error("Question {0} is locked; unlock it first")]
    QuestionLocked(QuestionKey),
    #[error("Question {0} is not being edited")]
    NotEditing(QuestionKey),
    #[error("An identical question is already in the working set")]
    DuplicateContent,
    #[error("Only fake answer groups can be locked as a whole, not '{0}' groups")]
    CategoryLockNotSupported(QuestionType),
    #[error("No '{category}' group of type '{question_type}' in the working set")]
    UnknownCategory {
        question_type: QuestionType,
        category: String,
    },
    #[error("At most {max} questions can be requested per category, not {requested}")]
    SelectionCountTooLarge { requested: i64, max: u32 },
    #[error("Session is no longer running")]
    SessionClosed,
    #[error("Exam generation failed: {0}")]
    Generation(String),
}
