//! Per-sign-in session context.
//!
//! A [`SessionContext`] is created once per signed-in identity and handed
//! (as `Arc`) to every component that needs the user id, the cached
//! profile, the backends or the notice channel. It replaces ambient global
//! auth state: when the user signs out, the owner calls
//! [`SessionContext::close`], which detaches every listener opened through
//! the context no matter who still holds the view.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use ebchat_shared::{now_millis, ConversationId, UserId, UserProfile};
use ebchat_store::{BlobStore, DocumentStore, FsBlobStore, RealtimeStore, SqliteDocumentStore};

use crate::assistant::{AiResponder, UnconfiguredResponder};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::notices::NoticeSink;
use crate::subscription::{Subscription, SubscriptionScope};

/// The external collaborators a session talks to.
#[derive(Clone)]
pub struct Backends {
    pub realtime: Arc<dyn RealtimeStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub responder: Arc<dyn AiResponder>,
}

impl Backends {
    /// Local profile database and blob directory from `config`, combined
    /// with the given realtime connection. Without a responder the
    /// assistant answers with an "unavailable" notice text.
    pub async fn open_local(
        config: &ClientConfig,
        realtime: Arc<dyn RealtimeStore>,
        responder: Option<Arc<dyn AiResponder>>,
    ) -> Result<Self> {
        let documents = match config.db_path {
            Some(ref path) => SqliteDocumentStore::open_at(path)?,
            None => SqliteDocumentStore::open_default()?,
        };
        let blobs = FsBlobStore::new(
            config.blob_dir.clone(),
            config.blob_base_url.clone(),
            config.max_blob_size,
        )
        .await?;

        Ok(Self {
            realtime,
            documents: Arc::new(documents),
            blobs: Arc::new(blobs),
            responder: responder.unwrap_or_else(|| Arc::new(UnconfiguredResponder)),
        })
    }
}

pub struct SessionContext {
    uid: UserId,
    email: Option<String>,
    profile: RwLock<Option<UserProfile>>,
    backends: Backends,
    notices: NoticeSink,
    config: Arc<ClientConfig>,
    scope: SubscriptionScope,
    deleted: AtomicBool,
}

impl SessionContext {
    pub fn new(
        uid: UserId,
        email: Option<String>,
        backends: Backends,
        notices: NoticeSink,
        config: Arc<ClientConfig>,
    ) -> Arc<Self> {
        debug!(uid = %uid, "session context created");
        Arc::new(Self {
            uid,
            email,
            profile: RwLock::new(None),
            backends,
            notices,
            config,
            scope: SubscriptionScope::new(),
            deleted: AtomicBool::new(false),
        })
    }

    pub fn uid(&self) -> &UserId {
        &self.uid
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// Cached copy of the signed-in user's profile.
    pub fn profile(&self) -> Option<UserProfile> {
        self.profile
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn require_profile(&self) -> Result<UserProfile> {
        self.profile()
            .ok_or_else(|| ClientError::ProfileMissing(self.uid.clone()))
    }

    pub(crate) fn set_profile(&self, profile: Option<UserProfile>) {
        *self.profile.write().unwrap_or_else(PoisonError::into_inner) = profile;
    }

    /// Reload the profile from the document store. `None` means profile
    /// setup has not been completed yet.
    pub async fn refresh_profile(&self) -> Result<Option<UserProfile>> {
        let profile = self.backends.documents.get_profile(&self.uid).await?;
        info!(uid = %self.uid, found = profile.is_some(), "profile refreshed");
        self.set_profile(profile.clone());
        Ok(profile)
    }

    pub fn realtime(&self) -> &Arc<dyn RealtimeStore> {
        &self.backends.realtime
    }

    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.backends.documents
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.backends.blobs
    }

    pub fn responder(&self) -> &Arc<dyn AiResponder> {
        &self.backends.responder
    }

    pub fn notices(&self) -> &NoticeSink {
        &self.notices
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Register a subscription opened for this session, so that
    /// [`close`](Self::close) can release it.
    pub(crate) fn adopt(&self, subscription: Subscription) -> Subscription {
        self.scope.adopt(subscription)
    }

    /// Detach every listener opened for this session. Views built on the
    /// context stay usable as values but receive nothing further.
    pub fn close(&self) {
        let released = self.scope.close();
        info!(uid = %self.uid, released, "session closed");
    }

    pub fn is_closed(&self) -> bool {
        self.scope.is_closed()
    }

    /// Set once the account has been deleted. Presence writes stop from
    /// then on so the teardown cannot recreate the status record.
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::SeqCst)
    }

    pub(crate) fn set_deleted(&self, deleted: bool) {
        self.deleted.store(deleted, Ordering::SeqCst);
    }

    /// The assistant contact as shown in the contact list.
    pub fn assistant_profile(&self) -> UserProfile {
        UserProfile::assistant(Some(&self.config.assistant_name), now_millis())
    }

    pub fn conversation_with(&self, peer: &UserId) -> ConversationId {
        ConversationId::between(&self.uid, peer)
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("uid", &self.uid)
            .field("has_profile", &self.profile().is_some())
            .field("closed", &self.is_closed())
            .finish()
    }
}
