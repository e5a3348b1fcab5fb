//! Profile lifecycle operations on the signed-in account.

use serde_json::Value;
use tracing::{error, info, warn};

use ebchat_shared::{
    now_millis, ConversationId, ProfilePatch, ProfileSettings, RealtimePath, UserId, UserProfile,
};

use crate::conversation::OutgoingImage;
use crate::error::{ClientError, Result};
use crate::session::SessionContext;

/// Input of the one-time profile setup after registration.
#[derive(Debug, Clone, Default)]
pub struct ProfileSetup {
    pub name: String,
    pub bio: String,
    pub dob: Option<String>,
    pub avatar: Option<OutgoingImage>,
}

pub fn default_avatar_url(uid: &UserId) -> String {
    format!("https://api.dicebear.com/7.x/avataaars/svg?seed={uid}")
}

impl SessionContext {
    /// Create the profile document. An avatar that fails to upload aborts
    /// the setup.
    pub async fn complete_profile_setup(&self, setup: ProfileSetup) -> Result<UserProfile> {
        let name = setup.name.trim();
        if name.is_empty() {
            return Err(ClientError::NameRequired);
        }

        let photo_url = match setup.avatar {
            Some(avatar) => {
                let object = format!("profiles/{}", self.uid());
                match self.blobs().upload(&object, avatar.data).await {
                    Ok(url) => url,
                    Err(e) => {
                        error!(uid = %self.uid(), error = %e, "avatar upload failed");
                        self.notices().error("Avatar upload failed.");
                        return Err(ClientError::UploadFailed(e));
                    }
                }
            }
            None => default_avatar_url(self.uid()),
        };

        let now = now_millis();
        let mut profile = UserProfile::new(self.uid().clone(), name, now);
        profile.email = self.email().unwrap_or_default().to_string();
        profile.bio = setup.bio;
        profile.dob = setup.dob;
        profile.photo_url = photo_url;
        profile.is_online = true;

        if let Err(e) = self.documents().put_profile(&profile).await {
            error!(uid = %self.uid(), error = %e, "profile save failed");
            self.notices().error("Profile save failed.");
            return Err(e.into());
        }
        self.set_profile(Some(profile.clone()));
        info!(uid = %self.uid(), "profile created");
        self.notices().success("System Initialized!");
        Ok(profile)
    }

    /// Block `peer`, or unblock if already blocked. Returns the new state.
    pub async fn toggle_block(&self, peer: &UserId) -> Result<bool> {
        let profile = self.require_profile()?;
        let blocking = !profile.has_blocked(peer);
        let patch = if blocking {
            ProfilePatch {
                block: vec![peer.clone()],
                ..ProfilePatch::default()
            }
        } else {
            ProfilePatch {
                unblock: vec![peer.clone()],
                ..ProfilePatch::default()
            }
        };

        let label = match self.documents().get_profile(peer).await {
            Ok(Some(p)) => p.name,
            _ if peer.is_assistant() => self.assistant_profile().name,
            _ => peer.to_string(),
        };

        let updated = match self.documents().update_profile(self.uid(), &patch).await {
            Ok(updated) => updated,
            Err(e) => {
                warn!(uid = %self.uid(), peer = %peer, error = %e, "block toggle failed");
                self.notices().error("Sync failed.");
                return Err(e.into());
            }
        };
        self.set_profile(Some(updated));
        info!(uid = %self.uid(), peer = %peer, blocking, "block list updated");
        self.notices().success(if blocking {
            format!("Blocked {label}")
        } else {
            format!("Unblocked {label}")
        });
        Ok(blocking)
    }

    pub async fn update_settings(&self, settings: ProfileSettings) -> Result<UserProfile> {
        self.update_profile(ProfilePatch {
            settings: Some(settings),
            ..ProfilePatch::default()
        })
        .await
    }

    /// Apply a partial update to our own profile and cache the result.
    pub async fn update_profile(&self, patch: ProfilePatch) -> Result<UserProfile> {
        match self.documents().update_profile(self.uid(), &patch).await {
            Ok(updated) => {
                self.set_profile(Some(updated.clone()));
                self.notices().success("Profile updated");
                Ok(updated)
            }
            Err(e) => {
                warn!(uid = %self.uid(), error = %e, "profile update failed");
                self.notices().error("Sync failed.");
                Err(e.into())
            }
        }
    }

    /// Remove everything the account owns outside the message logs: the
    /// presence record, our typing flags and the profile document. Messages
    /// stay where they are, with a sender id that no longer resolves.
    ///
    /// On success the session is closed; the caller is expected to sign out.
    pub async fn delete_account(&self) -> Result<()> {
        self.set_deleted(true);
        let realtime = self.realtime();
        let status = RealtimePath::status(self.uid());
        if let Err(e) = realtime.cancel_on_disconnect(&status).await {
            warn!(error = %e, "presence hook not cancelled");
        }
        if let Err(e) = realtime.remove(&status).await {
            warn!(error = %e, "presence record not removed");
        }

        match realtime.get(&RealtimePath::typing_all()).await {
            Ok(Some(Value::Object(conversations))) => {
                for key in conversations.keys() {
                    let Ok(conversation) = ConversationId::parse(key) else {
                        continue;
                    };
                    if !conversation.involves(self.uid()) {
                        continue;
                    }
                    let flag = RealtimePath::typing(&conversation, self.uid());
                    let _ = realtime.cancel_on_disconnect(&flag).await;
                    if let Err(e) = realtime.remove(&flag).await {
                        warn!(flag = %flag, error = %e, "typing flag not removed");
                    }
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "typing flags not scanned"),
        }

        match self.documents().delete_profile(self.uid()).await {
            Ok(removed) => {
                self.set_profile(None);
                info!(uid = %self.uid(), removed, "account deleted");
                self.notices().success("Account deleted");
                self.close();
                Ok(())
            }
            Err(e) => {
                error!(uid = %self.uid(), error = %e, "profile delete failed");
                self.set_deleted(false);
                self.notices().error("Account deletion failed.");
                Err(e.into())
            }
        }
    }
}
