//! Typing indicators.
//!
//! One boolean per (conversation, author) at `typing/{conversation}/{author}`.
//! The local flag is written only when the input buffer flips between empty
//! and non-empty, and carries an on-disconnect removal so a dropped
//! connection never leaves the peer seeing "typing..." forever.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use ebchat_shared::{ConversationId, RealtimePath, UserId};

use crate::session::SessionContext;
use crate::subscription::Subscription;

pub struct TypingChannel {
    ctx: Arc<SessionContext>,
    conversation: ConversationId,
    own_flag: RealtimePath,
    typing: bool,
    active: bool,
    peer_typing: Arc<watch::Sender<bool>>,
    subscription: Subscription,
}

impl TypingChannel {
    /// Open the channel for the conversation with `peer`. For the assistant
    /// the channel is inert: nothing is written or watched.
    pub fn open(ctx: Arc<SessionContext>, peer: &UserId) -> Self {
        let conversation = ctx.conversation_with(peer);
        let own_flag = RealtimePath::typing(&conversation, ctx.uid());
        let (tx, _) = watch::channel(false);
        let peer_typing = Arc::new(tx);
        let active = !peer.is_assistant();

        let subscription = if active {
            let path = RealtimePath::typing(&conversation, peer);
            match ctx.realtime().subscribe(&path) {
                Ok(listener) => {
                    let peer_typing = peer_typing.clone();
                    Subscription::spawn("typing", listener, move |snapshot| {
                        peer_typing.send_replace(matches!(snapshot, Some(Value::Bool(true))));
                        async {}
                    })
                }
                Err(e) => {
                    warn!(conversation = %conversation, error = %e, "cannot watch peer typing");
                    Subscription::inactive("typing")
                }
            }
        } else {
            Subscription::inactive("typing")
        };
        let subscription = ctx.adopt(subscription);

        Self {
            ctx,
            conversation,
            own_flag,
            typing: false,
            active,
            peer_typing,
            subscription,
        }
    }

    pub fn conversation(&self) -> &ConversationId {
        &self.conversation
    }

    /// Report the current content of the input buffer.
    pub async fn input_changed(&mut self, input: &str) {
        if !self.active {
            return;
        }
        let typing = !input.is_empty();
        if typing == self.typing {
            return;
        }
        self.typing = typing;

        let realtime = self.ctx.realtime();
        let result = if typing {
            match realtime.on_disconnect_remove(&self.own_flag).await {
                Ok(()) => realtime.set(&self.own_flag, Value::Bool(true)).await,
                Err(e) => Err(e),
            }
        } else {
            realtime.remove(&self.own_flag).await
        };
        match result {
            Ok(()) => debug!(conversation = %self.conversation, typing, "typing flag written"),
            Err(e) => debug!(conversation = %self.conversation, error = %e, "typing flag dropped"),
        }
    }

    pub fn peer_typing(&self) -> bool {
        *self.peer_typing.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<bool> {
        self.peer_typing.subscribe()
    }

    /// Stop watching the peer and clear our own flag.
    pub async fn close(mut self) {
        self.subscription.stop();
        if self.typing {
            self.typing = false;
            if let Err(e) = self.ctx.realtime().remove(&self.own_flag).await {
                debug!(error = %e, "typing flag not cleared");
            }
        }
    }
}

impl Drop for TypingChannel {
    fn drop(&mut self) {
        self.subscription.stop();
        if !self.typing {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let ctx = self.ctx.clone();
        let path = self.own_flag.clone();
        handle.spawn(async move {
            if let Err(e) = ctx.realtime().remove(&path).await {
                debug!(error = %e, "typing flag not cleared");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ebchat_store::RealtimeServer;

    use super::*;
    use crate::testing;

    #[tokio::test]
    async fn flag_follows_input_emptiness() {
        let server = RealtimeServer::new();
        let (me, _n1, _d1) = testing::context_with("u1", Arc::new(server.connect())).await;
        let (peer, _n2, _d2) = testing::context_with("u2", Arc::new(server.connect())).await;

        let mut mine = TypingChannel::open(me.clone(), peer.uid());
        let theirs = TypingChannel::open(peer.clone(), me.uid());
        let mut seen = theirs.watch();
        let flag = RealtimePath::typing(mine.conversation(), me.uid());

        mine.input_changed("h").await;
        assert_eq!(server.snapshot(&flag), Some(Value::Bool(true)));
        tokio::time::timeout(Duration::from_secs(2), seen.wait_for(|t| *t))
            .await
            .unwrap()
            .unwrap();

        mine.input_changed("").await;
        assert_eq!(server.snapshot(&flag), None);
        tokio::time::timeout(Duration::from_secs(2), seen.wait_for(|t| !*t))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn disconnect_clears_flag() {
        let server = RealtimeServer::new();
        let client = Arc::new(server.connect());
        let (me, _n, _d) = testing::context_with("u1", client.clone()).await;
        let peer = UserId::new("u2").unwrap();

        let mut channel = TypingChannel::open(me.clone(), &peer);
        channel.input_changed("hello").await;
        let flag = RealtimePath::typing(channel.conversation(), me.uid());
        assert!(server.snapshot(&flag).is_some());

        client.disconnect();
        assert_eq!(server.snapshot(&flag), None);
    }

    #[tokio::test]
    async fn assistant_channel_is_inert() {
        let server = RealtimeServer::new();
        let (me, _n, _d) = testing::context_with("u1", Arc::new(server.connect())).await;

        let mut channel = TypingChannel::open(me, &UserId::assistant());
        channel.input_changed("hi").await;
        assert_eq!(server.snapshot(&RealtimePath::typing_all()), None);
        assert_eq!(server.watcher_count(), 0);
    }

    #[tokio::test]
    async fn close_detaches_listener() {
        let server = RealtimeServer::new();
        let (me, _n, _d) = testing::context_with("u1", Arc::new(server.connect())).await;
        let peer = UserId::new("u2").unwrap();

        let channel = TypingChannel::open(me, &peer);
        assert_eq!(server.watcher_count(), 1);
        channel.close().await;
        assert_eq!(server.watcher_count(), 0);
    }
}
