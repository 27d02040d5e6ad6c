//! Error types for the orchestration layer.

use sortedchat_core::error::SortedChatError;
use sortedchat_core::types::ChatId;
use sortedchat_transport::TransportError;

/// Errors returned by session actions.
///
/// Every variant is recoverable; none of them invalidate the session state.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no active chat session")]
    NoActiveSession,
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error("a response is still streaming for chat {0}")]
    StreamInFlight(ChatId),
    #[error("no project selected")]
    NoActiveProject,
    #[error("embedding job submission failed: {0}")]
    JobSubmission(String),
    #[error("background task interrupted: {0}")]
    Interrupted(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<tokio::task::JoinError> for SessionError {
    fn from(err: tokio::task::JoinError) -> Self {
        SessionError::Interrupted(err.to_string())
    }
}

impl From<SessionError> for SortedChatError {
    fn from(err: SessionError) -> Self {
        SortedChatError::Session(err.to_string())
    }
}
