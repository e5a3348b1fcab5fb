//! Records stored in the document store (profiles) and the realtime store
//! (messages, presence).
//!
//! Field names are camelCase on the wire so the stored documents keep the
//! shape every client revision reads.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::constants::{ASSISTANT_BIO, ASSISTANT_EMAIL, ASSISTANT_NAME, ASSISTANT_PHOTO_URL};
use crate::types::{MessageId, Timestamp, UserId};

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// Owner-mutable visibility and notification flags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSettings {
    pub show_online_status: bool,
    pub read_receipts: bool,
    pub notifications_enabled: bool,
}

impl Default for ProfileSettings {
    fn default() -> Self {
        Self {
            show_online_status: true,
            read_receipts: true,
            notifications_enabled: true,
        }
    }
}

/// One registered identity.
///
/// `is_online` / `last_seen` are a mirror of the realtime presence record
/// and are not authoritative.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: UserId,
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dob: Option<String>,
    #[serde(rename = "photoURL", default)]
    pub photo_url: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub last_seen: Timestamp,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default)]
    pub created_at: Timestamp,
    /// Users this profile's owner has blocked.
    #[serde(default)]
    pub blocked_users: BTreeSet<UserId>,
    #[serde(default)]
    pub settings: ProfileSettings,
}

impl UserProfile {
    /// A fresh profile as written at the end of profile setup.
    pub fn new(uid: UserId, name: impl Into<String>, created_at: Timestamp) -> Self {
        Self {
            uid,
            name: name.into(),
            email: String::new(),
            dob: None,
            photo_url: String::new(),
            bio: String::new(),
            last_seen: created_at,
            is_online: false,
            created_at,
            blocked_users: BTreeSet::new(),
            settings: ProfileSettings::default(),
        }
    }

    /// The synthetic assistant contact. Always shown online.
    pub fn assistant(name: Option<&str>, now: Timestamp) -> Self {
        Self {
            uid: UserId::assistant(),
            name: name.unwrap_or(ASSISTANT_NAME).to_string(),
            email: ASSISTANT_EMAIL.to_string(),
            dob: None,
            photo_url: ASSISTANT_PHOTO_URL.to_string(),
            bio: ASSISTANT_BIO.to_string(),
            last_seen: now,
            is_online: true,
            created_at: 0,
            blocked_users: BTreeSet::new(),
            settings: ProfileSettings::default(),
        }
    }

    pub fn has_blocked(&self, user: &UserId) -> bool {
        self.blocked_users.contains(user)
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, patch: &ProfilePatch) {
        if let Some(ref name) = patch.name {
            self.name = name.clone();
        }
        if let Some(ref photo_url) = patch.photo_url {
            self.photo_url = photo_url.clone();
        }
        if let Some(ref bio) = patch.bio {
            self.bio = bio.clone();
        }
        if let Some(ref dob) = patch.dob {
            self.dob = dob.clone();
        }
        if let Some(is_online) = patch.is_online {
            self.is_online = is_online;
        }
        if let Some(last_seen) = patch.last_seen {
            self.last_seen = last_seen;
        }
        if let Some(ref settings) = patch.settings {
            self.settings = settings.clone();
        }
        for user in &patch.block {
            self.blocked_users.insert(user.clone());
        }
        for user in &patch.unblock {
            self.blocked_users.remove(user);
        }
    }
}

/// Partial profile update. `block`/`unblock` are set-union and
/// set-difference on `blocked_users`, so concurrent toggles of different
/// users do not overwrite each other.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePatch {
    pub name: Option<String>,
    pub photo_url: Option<String>,
    pub bio: Option<String>,
    /// `Some(None)` clears the date of birth.
    pub dob: Option<Option<String>>,
    pub is_online: Option<bool>,
    pub last_seen: Option<Timestamp>,
    pub settings: Option<ProfileSettings>,
    #[serde(default)]
    pub block: Vec<UserId>,
    #[serde(default)]
    pub unblock: Vec<UserId>,
}

impl ProfilePatch {
    /// The two-field presence mirror.
    pub fn presence(is_online: bool, last_seen: Timestamp) -> Self {
        Self {
            is_online: Some(is_online),
            last_seen: Some(last_seen),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Voice,
    Ai,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// One record of a conversation's message log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    #[serde(default)]
    pub text: String,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub seen: bool,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub edited: bool,
    /// Reacting user -> emoji.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub reactions: BTreeMap<UserId, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl Message {
    /// Whether `viewer` still has to acknowledge this message.
    pub fn is_unseen_by(&self, viewer: &UserId) -> bool {
        &self.sender_id != viewer && !self.seen
    }

    /// [`is_unseen_by`](Self::is_unseen_by) on a stored record that may not
    /// parse as a full message. Only `senderId` and `seen` are read, so a
    /// record the log cannot display still counts, and can still be
    /// acknowledged.
    pub fn record_is_unseen_by(record: &serde_json::Value, viewer: &UserId) -> bool {
        let sender = record.get("senderId").and_then(serde_json::Value::as_str);
        let seen = record
            .get("seen")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        matches!(sender, Some(s) if s != viewer.as_str()) && !seen
    }

    pub fn image_url(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.url.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// Authoritative presence, held in the realtime store at `status/{uid}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub is_online: bool,
    #[serde(default)]
    pub last_seen: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(s: &str) -> UserId {
        UserId::new(s).unwrap()
    }

    #[test]
    fn message_wire_shape() {
        let json = serde_json::json!({
            "id": "-Nabc",
            "senderId": "u1",
            "text": "hi",
            "timestamp": 1000,
            "type": "image",
            "seen": false,
            "metadata": { "url": "https://cdn/x.png" }
        });
        let msg: Message = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(msg.kind, MessageKind::Image);
        assert_eq!(msg.image_url(), Some("https://cdn/x.png"));
        assert!(!msg.edited);
        assert!(msg.is_unseen_by(&uid("u2")));
        assert!(!msg.is_unseen_by(&uid("u1")));
        assert!(Message::record_is_unseen_by(&json, &uid("u2")));

        let back = serde_json::to_value(&msg).unwrap();
        assert_eq!(back["type"], "image");
        assert!(back.get("edited").is_none());
        assert!(back.get("reactions").is_none());
    }

    #[test]
    fn profile_defaults_for_missing_fields() {
        let json = serde_json::json!({ "uid": "u1", "name": "Ada" });
        let profile: UserProfile = serde_json::from_value(json).unwrap();
        assert!(profile.blocked_users.is_empty());
        assert!(profile.settings.show_online_status);
        assert!(!profile.is_online);
    }

    #[test]
    fn patch_blocks_and_unblocks() {
        let mut profile = UserProfile::new(uid("u1"), "Ada", 10);
        profile.apply(&ProfilePatch {
            block: vec![uid("u2"), uid("u3")],
            ..ProfilePatch::default()
        });
        assert!(profile.has_blocked(&uid("u2")));

        profile.apply(&ProfilePatch {
            unblock: vec![uid("u2")],
            bio: Some("hello".into()),
            ..ProfilePatch::default()
        });
        assert!(!profile.has_blocked(&uid("u2")));
        assert!(profile.has_blocked(&uid("u3")));
        assert_eq!(profile.bio, "hello");
    }

    #[test]
    fn presence_patch_touches_two_fields() {
        let mut profile = UserProfile::new(uid("u1"), "Ada", 10);
        let before = profile.clone();
        profile.apply(&ProfilePatch::presence(true, 99));
        assert!(profile.is_online);
        assert_eq!(profile.last_seen, 99);
        assert_eq!(profile.name, before.name);
        assert_eq!(profile.blocked_users, before.blocked_users);
    }
}
