//! Typed paths into the realtime store.
//!
//! Layout:
//!
//! ```text
//! status/{uid}                               PresenceRecord
//! chats/{conversationId}/messages/{msgId}    Message
//! typing/{conversationId}/{authorId}         bool
//! .info/connected                            bool (per connection)
//! ```

use serde_json::{json, Value};

use crate::constants::{
    CHATS_ROOT, CONNECTED_PATH, MESSAGES_SEGMENT, SERVER_VALUE_KEY, SERVER_VALUE_TIMESTAMP,
    STATUS_ROOT, TYPING_ROOT,
};
use crate::error::SharedError;
use crate::types::{ConversationId, MessageId, UserId};

/// A `/`-separated path with no empty segments. The empty path is the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RealtimePath(String);

impl RealtimePath {
    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn parse(raw: &str) -> Result<Self, SharedError> {
        let trimmed = raw.trim_matches('/');
        if trimmed.split('/').any(str::is_empty) && !trimmed.is_empty() {
            return Err(SharedError::InvalidPath(raw.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn connected() -> Self {
        Self(CONNECTED_PATH.to_string())
    }

    pub fn status_root() -> Self {
        Self(STATUS_ROOT.to_string())
    }

    pub fn status(uid: &UserId) -> Self {
        Self::status_root().child(uid.as_str())
    }

    pub fn chats_root() -> Self {
        Self(CHATS_ROOT.to_string())
    }

    pub fn messages(conversation: &ConversationId) -> Self {
        Self::chats_root()
            .child(conversation.as_str())
            .child(MESSAGES_SEGMENT)
    }

    pub fn message(conversation: &ConversationId, id: &MessageId) -> Self {
        Self::messages(conversation).child(id.as_str())
    }

    /// Every conversation's typing flags.
    pub fn typing_all() -> Self {
        Self(TYPING_ROOT.to_string())
    }

    pub fn typing_root(conversation: &ConversationId) -> Self {
        Self::typing_all().child(conversation.as_str())
    }

    /// Conversation-rooted typing flag of one author.
    pub fn typing(conversation: &ConversationId, author: &UserId) -> Self {
        Self::typing_root(conversation).child(author.as_str())
    }

    pub fn child(&self, segment: &str) -> Self {
        let segment = segment.trim_matches('/');
        if self.0.is_empty() {
            Self(segment.to_string())
        } else if segment.is_empty() {
            self.clone()
        } else {
            Self(format!("{}/{}", self.0, segment))
        }
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Last segment, `None` for the root.
    pub fn key(&self) -> Option<&str> {
        self.segments().last()
    }

    /// True if `self` equals `other` or contains it.
    pub fn is_ancestor_of(&self, other: &RealtimePath) -> bool {
        self.is_root()
            || other.0 == self.0
            || (other.0.starts_with(&self.0) && other.0.as_bytes().get(self.0.len()) == Some(&b'/'))
    }

    /// True if the two paths lie on one branch (a write to one is visible
    /// from the other).
    pub fn overlaps(&self, other: &RealtimePath) -> bool {
        self.is_ancestor_of(other) || other.is_ancestor_of(self)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RealtimePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}", self.0)
    }
}

/// Placeholder resolved to the store's clock when a write is applied.
pub fn server_timestamp() -> Value {
    json!({ SERVER_VALUE_KEY: SERVER_VALUE_TIMESTAMP })
}

pub fn is_server_timestamp(value: &Value) -> bool {
    match value.as_object() {
        Some(map) => {
            map.len() == 1
                && map.get(SERVER_VALUE_KEY).and_then(Value::as_str) == Some(SERVER_VALUE_TIMESTAMP)
        }
        None => false,
    }
}
