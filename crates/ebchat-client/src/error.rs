use thiserror::Error;

use ebchat_shared::{MessageId, SharedError, UserId};
use ebchat_store::StoreError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Shared(#[from] SharedError),

    /// Sending to (or editing in) a blocked relationship.
    #[error("Conversation with {0} is blocked")]
    Blocked(UserId),

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Profile name is required")]
    NameRequired,

    #[error("Message too long: {len} bytes (max {max})")]
    TooLong { len: usize, max: usize },

    /// The attached image could not be stored; nothing was written.
    #[error("Image upload failed: {0}")]
    UploadFailed(#[source] StoreError),

    #[error("Message {0} not found in this conversation")]
    MessageNotFound(MessageId),

    #[error("Only the author may change message {0}")]
    NotAuthor(MessageId),

    /// Signed in, but profile setup has not been completed.
    #[error("No profile for {0}")]
    ProfileMissing(UserId),
}

pub type Result<T> = std::result::Result<T, ClientError>;
