//! The document store seam: profile records addressed by user id.

use async_trait::async_trait;

use ebchat_shared::{ProfilePatch, UserId, UserProfile};

use crate::error::Result;
use crate::listener::Listener;

/// Keyed collection of [`UserProfile`] records.
///
/// No transactional isolation is assumed across separate calls.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_profile(&self, uid: &UserId) -> Result<Option<UserProfile>>;

    /// Create or replace a whole record.
    async fn put_profile(&self, profile: &UserProfile) -> Result<()>;

    /// Apply a partial update. Fails with `NotFound` if the record is missing.
    async fn update_profile(&self, uid: &UserId, patch: &ProfilePatch) -> Result<UserProfile>;

    /// Returns whether a record was removed.
    async fn delete_profile(&self, uid: &UserId) -> Result<bool>;

    async fn list_profiles(&self) -> Result<Vec<UserProfile>>;

    /// Live view of the whole collection: delivered on attach and after
    /// every mutation.
    fn subscribe_profiles(&self) -> Result<Listener<Vec<UserProfile>>>;
}
