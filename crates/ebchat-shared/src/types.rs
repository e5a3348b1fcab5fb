use serde::{Deserialize, Serialize};

use crate::constants::{ASSISTANT_ID, CONVERSATION_SEPARATOR};
use crate::error::SharedError;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Current wall-clock time in milliseconds.
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

// User identity = opaque id assigned by the identity provider at registration.
// It is used verbatim as a path segment, so path and conversation separators
// are rejected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Result<Self, SharedError> {
        let id = id.into();
        let valid = !id.is_empty()
            && !id.contains(CONVERSATION_SEPARATOR)
            && !id.contains(['/', '.', '#', '$', '[', ']']);
        if valid {
            Ok(Self(id))
        } else {
            Err(SharedError::InvalidUserId(id))
        }
    }

    /// The assistant contact's synthetic id.
    pub fn assistant() -> Self {
        Self(ASSISTANT_ID.to_string())
    }

    pub fn is_assistant(&self) -> bool {
        self.0 == ASSISTANT_ID
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = SharedError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical id of the conversation between two users: both ids sorted and
/// joined with [`CONVERSATION_SEPARATOR`]. Never stored as an entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct ConversationId(String);

impl ConversationId {
    /// Derive the id for an unordered pair of participants.
    pub fn between(a: &UserId, b: &UserId) -> Self {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        Self(format!(
            "{}{}{}",
            first.as_str(),
            CONVERSATION_SEPARATOR,
            second.as_str()
        ))
    }

    /// Parse an id read back from the realtime store.
    pub fn parse(raw: &str) -> Result<Self, SharedError> {
        let (a, b) = raw
            .split_once(CONVERSATION_SEPARATOR)
            .ok_or_else(|| SharedError::InvalidConversationId(raw.to_string()))?;
        let a = UserId::new(a).map_err(|_| SharedError::InvalidConversationId(raw.to_string()))?;
        let b = UserId::new(b).map_err(|_| SharedError::InvalidConversationId(raw.to_string()))?;
        let id = Self::between(&a, &b);
        if id.0 != raw {
            return Err(SharedError::InvalidConversationId(raw.to_string()));
        }
        Ok(id)
    }

    /// Both participants, in canonical (sorted) order.
    pub fn participants(&self) -> (UserId, UserId) {
        // Constructed only through `between`/`parse`, so the split always succeeds.
        let (a, b) = self
            .0
            .split_once(CONVERSATION_SEPARATOR)
            .unwrap_or((self.0.as_str(), ""));
        (UserId(a.to_string()), UserId(b.to_string()))
    }

    pub fn involves(&self, user: &UserId) -> bool {
        let (a, b) = self.participants();
        &a == user || &b == user
    }

    /// The other participant, if `me` takes part in this conversation.
    pub fn peer_of(&self, me: &UserId) -> Option<UserId> {
        let (a, b) = self.participants();
        if &a == me {
            Some(b)
        } else if &b == me {
            Some(a)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ConversationId {
    type Error = SharedError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ConversationId> for String {
    fn from(id: ConversationId) -> Self {
        id.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store-assigned push key of a message. Used for addressing, never ordering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(s: &str) -> UserId {
        UserId::new(s).unwrap()
    }

    #[test]
    fn conversation_id_is_order_independent() {
        let a = uid("u1");
        let b = uid("u2");
        assert_eq!(ConversationId::between(&a, &b), ConversationId::between(&b, &a));
        assert_eq!(ConversationId::between(&a, &b).as_str(), "u1_u2");
    }

    #[test]
    fn conversation_ids_do_not_collide() {
        let ids = ["alice", "bob", "carol", "al", "ice", "eb-assistant-bot"];
        let mut seen = std::collections::HashSet::new();
        for (i, x) in ids.iter().enumerate() {
            for y in &ids[i + 1..] {
                assert!(seen.insert(ConversationId::between(&uid(x), &uid(y))));
            }
        }
        let a = uid("alice");
        assert_ne!(
            ConversationId::between(&a, &uid("bob")),
            ConversationId::between(&a, &uid("carol"))
        );
    }

    #[test]
    fn separator_is_rejected_in_user_ids() {
        assert!(UserId::new("a_b").is_err());
        assert!(UserId::new("").is_err());
        assert!(UserId::new("a/b").is_err());
        assert!(UserId::new("Xk29fQ").is_ok());
    }

    #[test]
    fn parse_and_peer_lookup() {
        let id = ConversationId::parse("u1_u2").unwrap();
        assert_eq!(id.peer_of(&uid("u1")), Some(uid("u2")));
        assert_eq!(id.peer_of(&uid("u2")), Some(uid("u1")));
        assert_eq!(id.peer_of(&uid("u3")), None);
        assert!(id.involves(&uid("u2")));

        // Not canonical: participants out of order.
        assert!(ConversationId::parse("u2_u1").is_err());
        assert!(ConversationId::parse("nosep").is_err());
    }

    #[test]
    fn assistant_uses_ordinary_derivation() {
        let me = uid("zed");
        let id = ConversationId::between(&me, &UserId::assistant());
        assert_eq!(id.as_str(), "eb-assistant-bot_zed");
        assert_eq!(id.peer_of(&me), Some(UserId::assistant()));
    }

    #[test]
    fn user_id_serde_validates() {
        let ok: UserId = serde_json::from_str("\"u1\"").unwrap();
        assert_eq!(ok, uid("u1"));
        assert!(serde_json::from_str::<UserId>("\"bad_id\"").is_err());
    }
}
