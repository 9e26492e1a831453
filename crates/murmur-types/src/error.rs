use thiserror::Error;

/// Failure taxonomy shared by every chat operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("invalid participant id")]
    InvalidParticipant,

    #[error("user is not a participant of this conversation")]
    NotParticipant,

    #[error("not found")]
    NotFound,

    #[error("message has no body and no attachment")]
    EmptyMessage,

    #[error("only the receiver may update message status")]
    Forbidden,

    #[error("storage failure: {0}")]
    StorageFailure(String),
}

impl ChatError {
    /// Stable machine-readable code, used in REST error bodies and gateway
    /// `Error` events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidParticipant => "invalid_participant",
            Self::NotParticipant => "not_participant",
            Self::NotFound => "not_found",
            Self::EmptyMessage => "empty_message",
            Self::Forbidden => "forbidden",
            Self::StorageFailure(_) => "storage_failure",
        }
    }

    /// Storage failures are the only transient class; callers may retry the
    /// idempotent operations on them.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageFailure(_))
    }
}

impl From<anyhow::Error> for ChatError {
    fn from(e: anyhow::Error) -> Self {
        Self::StorageFailure(format!("{:#}", e))
    }
}
