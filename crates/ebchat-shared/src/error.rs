use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Invalid user id: {0:?}")]
    InvalidUserId(String),

    #[error("Invalid conversation id: {0:?}")]
    InvalidConversationId(String),

    #[error("Invalid realtime path: {0:?}")]
    InvalidPath(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
