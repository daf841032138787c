use thiserror::Error;
use uuid::Uuid;

pub type DripResult<T> = Result<T, DripError>;

#[derive(Error, Debug)]
pub enum DripError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Sequence {0} not found")]
    SequenceNotFound(Uuid),

    #[error("Sequence {0} is not active")]
    SequenceInactive(Uuid),

    #[error("Sequence {0} has no active steps")]
    EmptySequence(Uuid),

    #[error("Recipient {0} not found")]
    RecipientNotFound(Uuid),

    #[error("No enrollment for user {user_id} in sequence {sequence_id}")]
    EnrollmentNotFound { user_id: Uuid, sequence_id: Uuid },

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
