//! Presence tracking.
//!
//! Online state lives in the realtime store at `status/{uid}` and follows
//! the connection's own liveness signal. Every time the connection comes
//! up, the offline record is queued as an on-disconnect write first and
//! the online record is written second, so a crash between the two can
//! never leave the user stuck online. The profile document gets a
//! best-effort copy of the same two fields.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use ebchat_shared::paths::server_timestamp;
use ebchat_shared::{now_millis, ProfilePatch, RealtimePath};

use crate::session::SessionContext;
use crate::subscription::Subscription;

/// `Unknown → Connecting → Online → Offline`, and back to `Connecting` on
/// reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceState {
    Unknown,
    Connecting,
    Online,
    Offline,
}

fn status_value(is_online: bool) -> Value {
    json!({ "isOnline": is_online, "lastSeen": server_timestamp() })
}

pub struct PresenceTracker {
    ctx: Arc<SessionContext>,
    state: Arc<watch::Sender<PresenceState>>,
    subscription: Subscription,
}

impl PresenceTracker {
    /// Attach to the connection signal. Never fails: if the store refuses
    /// the subscription the session continues without presence.
    pub fn start(ctx: Arc<SessionContext>) -> Self {
        let (tx, _) = watch::channel(PresenceState::Unknown);
        let state = Arc::new(tx);

        let subscription = match ctx.realtime().subscribe(&RealtimePath::connected()) {
            Ok(listener) => {
                let ctx = ctx.clone();
                let state = state.clone();
                Subscription::spawn("presence", listener, move |snapshot| {
                    let ctx = ctx.clone();
                    let state = state.clone();
                    async move {
                        let connected = matches!(snapshot, Some(Value::Bool(true)));
                        if connected {
                            announce_online(&ctx, &state).await;
                        } else if *state.borrow() != PresenceState::Unknown {
                            state.send_replace(PresenceState::Offline);
                            debug!(uid = %ctx.uid(), "connection lost");
                        }
                    }
                })
            }
            Err(e) => {
                warn!(uid = %ctx.uid(), error = %e, "presence unavailable");
                Subscription::inactive("presence")
            }
        };
        let subscription = ctx.adopt(subscription);

        Self {
            ctx,
            state,
            subscription,
        }
    }

    pub fn state(&self) -> PresenceState {
        *self.state.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<PresenceState> {
        self.state.subscribe()
    }

    /// Explicit sign-out: stop following the connection, drop the pending
    /// hook and write the offline record directly.
    pub async fn go_offline(mut self) {
        self.subscription.stop();
        if self.ctx.is_deleted() {
            debug!(uid = %self.ctx.uid(), "account deleted, no offline record");
            self.state.send_replace(PresenceState::Offline);
            return;
        }
        let realtime = self.ctx.realtime();
        let path = RealtimePath::status(self.ctx.uid());

        if let Err(e) = realtime.cancel_on_disconnect(&path).await {
            debug!(error = %e, "could not cancel presence hook");
        }
        match realtime.set(&path, status_value(false)).await {
            Ok(()) => info!(uid = %self.ctx.uid(), "marked offline"),
            Err(e) => warn!(uid = %self.ctx.uid(), error = %e, "failed to mark offline"),
        }
        mirror(&self.ctx, false);
        self.state.send_replace(PresenceState::Offline);
    }
}

impl Drop for PresenceTracker {
    fn drop(&mut self) {
        self.subscription.stop();
    }
}

async fn announce_online(ctx: &Arc<SessionContext>, state: &watch::Sender<PresenceState>) {
    if ctx.is_deleted() {
        return;
    }
    state.send_replace(PresenceState::Connecting);
    let realtime = ctx.realtime();
    let path = RealtimePath::status(ctx.uid());

    if let Err(e) = realtime.on_disconnect_set(&path, status_value(false)).await {
        warn!(uid = %ctx.uid(), error = %e, "failed to register disconnect hook, staying offline");
        return;
    }
    if ctx.is_deleted() {
        let _ = realtime.cancel_on_disconnect(&path).await;
        return;
    }
    if let Err(e) = realtime.set(&path, status_value(true)).await {
        warn!(uid = %ctx.uid(), error = %e, "failed to write online status");
        return;
    }

    state.send_replace(PresenceState::Online);
    info!(uid = %ctx.uid(), "online");
    mirror(ctx, true);
}

/// Copy presence into the profile document. Failures are only logged.
fn mirror(ctx: &Arc<SessionContext>, is_online: bool) {
    let ctx = ctx.clone();
    let patch = ProfilePatch::presence(is_online, now_millis());
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        return;
    };
    handle.spawn(async move {
        if let Err(e) = ctx.documents().update_profile(ctx.uid(), &patch).await {
            debug!(uid = %ctx.uid(), error = %e, "presence mirror skipped");
        }
    });
}
