//! Sign-in lifecycle.
//!
//! The identity provider publishes the current user (or `None`). The
//! [`SessionManager`] follows that stream: every sign-in gets a fresh
//! [`SessionContext`] with presence running, every sign-out (or user
//! switch) closes the old context, detaching every listener opened through
//! it, and takes presence offline.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use ebchat_shared::UserId;

use crate::config::ClientConfig;
use crate::notices::NoticeSink;
use crate::presence::{PresenceState, PresenceTracker};
use crate::session::{Backends, SessionContext};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub uid: UserId,
    pub email: Option<String>,
}

/// Source of authentication state. `None` means signed out.
pub trait IdentityProvider: Send + Sync {
    fn auth_state(&self) -> watch::Receiver<Option<AuthUser>>;
}

/// Identity provider driven directly by the embedding application.
#[derive(Debug)]
pub struct LocalIdentity {
    state: watch::Sender<Option<AuthUser>>,
}

impl LocalIdentity {
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self { state }
    }

    pub fn sign_in(&self, uid: UserId, email: Option<String>) {
        self.state.send_replace(Some(AuthUser { uid, email }));
    }

    pub fn sign_out(&self) {
        self.state.send_replace(None);
    }

    pub fn current(&self) -> Option<AuthUser> {
        self.state.borrow().clone()
    }
}

impl Default for LocalIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityProvider for LocalIdentity {
    fn auth_state(&self) -> watch::Receiver<Option<AuthUser>> {
        self.state.subscribe()
    }
}

/// What the rest of the application sees of the signed-in session.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub ctx: Arc<SessionContext>,
    pub presence: watch::Receiver<PresenceState>,
}

impl ActiveSession {
    /// Signed in, but the profile has not been created yet.
    pub fn needs_profile_setup(&self) -> bool {
        self.ctx.profile().is_none()
    }
}

pub struct SessionManager {
    session: watch::Receiver<Option<ActiveSession>>,
    task: JoinHandle<()>,
}

impl SessionManager {
    pub fn start(
        provider: Arc<dyn IdentityProvider>,
        backends: Backends,
        config: Arc<ClientConfig>,
        notices: NoticeSink,
    ) -> Self {
        let (tx, session) = watch::channel(None);
        let mut auth = provider.auth_state();

        let task = tokio::spawn(async move {
            let mut current: Option<(Arc<SessionContext>, PresenceTracker)> = None;
            loop {
                let user = auth.borrow_and_update().clone();
                let unchanged = match (&current, &user) {
                    (Some((ctx, _)), Some(user)) => ctx.uid() == &user.uid,
                    (None, None) => true,
                    _ => false,
                };

                if !unchanged {
                    if let Some((ctx, presence)) = current.take() {
                        end_session(&tx, ctx, presence).await;
                    }
                    if let Some(user) = user {
                        let ctx = SessionContext::new(
                            user.uid,
                            user.email,
                            backends.clone(),
                            notices.clone(),
                            config.clone(),
                        );
                        if let Err(e) = ctx.refresh_profile().await {
                            warn!(uid = %ctx.uid(), error = %e, "profile not loaded");
                            notices.error("Could not load your profile.");
                        }
                        let presence = PresenceTracker::start(ctx.clone());
                        tx.send_replace(Some(ActiveSession {
                            ctx: ctx.clone(),
                            presence: presence.watch(),
                        }));
                        info!(uid = %ctx.uid(), "session started");
                        current = Some((ctx, presence));
                    }
                }

                if auth.changed().await.is_err() {
                    break;
                }
            }

            if let Some((ctx, presence)) = current.take() {
                info!(uid = %ctx.uid(), "identity provider closed");
                end_session(&tx, ctx, presence).await;
            }
        });

        Self { session, task }
    }

    pub fn current(&self) -> Option<ActiveSession> {
        self.session.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Option<ActiveSession>> {
        self.session.clone()
    }
}

async fn end_session(
    tx: &watch::Sender<Option<ActiveSession>>,
    ctx: Arc<SessionContext>,
    presence: PresenceTracker,
) {
    ctx.close();
    presence.go_offline().await;
    tx.send_replace(None);
    info!(uid = %ctx.uid(), "session ended");
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.task.abort();
    }
}
