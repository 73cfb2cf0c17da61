//! Error taxonomy of the session engine
//!
//! Every variant is recoverable: the caller can always follow up with a
//! different, valid request. Only an explicit close ends a session.

use serde::Serialize;
use thiserror::Error;

use crate::{session::Status, store::StoreError};

/// Errors returned by the session engine
#[derive(Error, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "code", content = "detail", rename_all = "snake_case")]
pub enum Error {
    /// The command is not legal in the current session state
    #[error("`{command}` is not allowed while the session is {status}")]
    IllegalTransition {
        /// State the session was in when the command arrived
        status: Status,
        /// Name of the rejected command
        command: &'static str,
    },
    /// The participant has used every try for the current question
    #[error("no tries left for this question")]
    TriesExhausted,
    /// The question is not accepting answers (not running, or still in its lead-in)
    #[error("the question is not accepting answers")]
    QuestionNotLive,
    /// A bucket ID does not exist in the active aggregation space
    #[error("unknown response bucket {0}")]
    UnknownBucket(u32),
    /// A bucket cannot be merged into itself
    #[error("a bucket cannot be merged into itself")]
    SelfMerge,
    /// There is no merge to undo
    #[error("nothing to undo")]
    NothingToUndo,
    /// `next` was issued after the last planned question
    #[error("no more planned questions")]
    NoMoreQuestions,
    /// A vote was started with no buckets selected
    #[error("at least one response must be selected for a vote")]
    EmptySelection,
    /// The caller is not allowed to control the session
    #[error("only the instructor can do that")]
    NotInstructor,
    /// A student acted without an open attempt in the session
    #[error("participant has not joined the session")]
    NotJoined,
    /// The participant already voted in the current vote round
    #[error("already voted in this round")]
    AlreadyVoted,
    /// A jump targeted a slot outside the planned sequence
    #[error("no planned question in slot {0}")]
    UnknownSlot(usize),
    /// The question bank does not know the referenced question
    #[error("unknown question {0}")]
    UnknownQuestion(u64),
    /// The command needs a current question and there is none
    #[error("no question has been asked yet")]
    NoCurrentQuestion,
    /// No session with the given ID exists
    #[error("unknown session")]
    UnknownSession,
    /// The activity already has an open session
    #[error("the activity already has an open session")]
    SessionAlreadyOpen,
    /// The session cannot take more participants
    #[error("maximum number of participants reached")]
    MaximumParticipants,
    /// The request payload failed validation
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    /// The storage collaborator failed; the request may be retried
    #[error("storage unavailable: {0}")]
    Storage(#[from] StoreError),
}

impl Error {
    /// Stable machine-readable code for the error
    pub fn code(&self) -> &'static str {
        match self {
            Self::IllegalTransition { .. } => "illegal_transition",
            Self::TriesExhausted => "tries_exhausted",
            Self::QuestionNotLive => "question_not_live",
            Self::UnknownBucket(_) => "unknown_bucket",
            Self::SelfMerge => "self_merge",
            Self::NothingToUndo => "nothing_to_undo",
            Self::NoMoreQuestions => "no_more_questions",
            Self::EmptySelection => "empty_selection",
            Self::NotInstructor => "not_instructor",
            Self::NotJoined => "not_joined",
            Self::AlreadyVoted => "already_voted",
            Self::UnknownSlot(_) => "unknown_slot",
            Self::UnknownQuestion(_) => "unknown_question",
            Self::NoCurrentQuestion => "no_current_question",
            Self::UnknownSession => "unknown_session",
            Self::SessionAlreadyOpen => "session_already_open",
            Self::MaximumParticipants => "maximum_participants",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::Storage(_) => "storage",
        }
    }

    /// Whether retrying the same request later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl From<garde::Report> for Error {
    fn from(report: garde::Report) -> Self {
        Self::InvalidPayload(report.to_string())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_code_matches_serialized_tag() {
        let errors = [
            Error::IllegalTransition {
                status: Status::Preparing,
                command: "end_question",
            },
            Error::TriesExhausted,
            Error::UnknownBucket(3),
            Error::InvalidPayload("bad".to_owned()),
            Error::Storage(StoreError::Unavailable("down".to_owned())),
        ];

        for error in errors {
            let json = serde_json::to_value(&error).unwrap();
            assert_eq!(json["code"], error.code());
        }
    }

    #[test]
    fn test_only_storage_is_transient() {
        assert!(Error::Storage(StoreError::Conflict).is_transient());
        assert!(!Error::TriesExhausted.is_transient());
        assert!(!Error::NoMoreQuestions.is_transient());
    }

    #[test]
    fn test_illegal_transition_message() {
        let error = Error::IllegalTransition {
            status: Status::Voting,
            command: "next",
        };
        assert_eq!(
            error.to_string(),
            "`next` is not allowed while the session is voting"
        );
    }
}
