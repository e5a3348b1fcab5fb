//! Unread badges.
//!
//! Recomputed from scratch over every conversation on each delivery of the
//! `chats` tree. There are no counters to drift.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use ebchat_shared::{ConversationId, Message, RealtimePath, UserId};
use ebchat_store::Snapshot;

use crate::session::SessionContext;
use crate::subscription::Subscription;

/// Peers with at least one message to `me` that is still unseen. Only
/// conversations `me` takes part in are considered.
pub fn unread_peers(chats: &Snapshot, me: &UserId) -> BTreeSet<UserId> {
    let mut peers = BTreeSet::new();
    let Some(Value::Object(conversations)) = chats else {
        return peers;
    };

    for (key, conversation) in conversations {
        let Ok(id) = ConversationId::parse(key) else {
            continue;
        };
        let Some(peer) = id.peer_of(me) else {
            continue;
        };
        let Some(Value::Object(messages)) = conversation.get("messages") else {
            continue;
        };
        let has_unread = messages
            .values()
            .any(|record| Message::record_is_unseen_by(record, me));
        if has_unread {
            peers.insert(peer);
        }
    }
    peers
}

pub struct UnreadAggregator {
    unread: Arc<watch::Sender<BTreeSet<UserId>>>,
    subscription: Subscription,
}

impl UnreadAggregator {
    pub fn start(ctx: Arc<SessionContext>) -> Self {
        let (tx, _) = watch::channel(BTreeSet::new());
        let unread = Arc::new(tx);

        let subscription = match ctx.realtime().subscribe(&RealtimePath::chats_root()) {
            Ok(listener) => {
                let unread = unread.clone();
                let me = ctx.uid().clone();
                Subscription::spawn("unread", listener, move |snapshot| {
                    let peers = unread_peers(&snapshot, &me);
                    debug!(peers = peers.len(), "unread set recomputed");
                    unread.send_if_modified(|current| {
                        if *current == peers {
                            return false;
                        }
                        *current = peers;
                        true
                    });
                    async {}
                })
            }
            Err(e) => {
                warn!(error = %e, "unread tracking unavailable");
                ctx.notices().info("Unread indicators are unavailable.");
                Subscription::inactive("unread")
            }
        };
        let subscription = ctx.adopt(subscription);

        Self {
            unread,
            subscription,
        }
    }

    pub fn unread(&self) -> BTreeSet<UserId> {
        self.unread.borrow().clone()
    }

    pub fn has_unread(&self, peer: &UserId) -> bool {
        self.unread.borrow().contains(peer)
    }

    pub fn watch(&self) -> watch::Receiver<BTreeSet<UserId>> {
        self.unread.subscribe()
    }

    pub fn stop(&mut self) {
        self.subscription.stop();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn uid(s: &str) -> UserId {
        UserId::new(s).unwrap()
    }

    #[test]
    fn scans_every_conversation_of_the_viewer() {
        let chats = Some(json!({
            "u1_u2": { "messages": {
                "m1": { "senderId": "u2", "seen": false, "timestamp": 1, "type": "text" },
                "m2": { "senderId": "u1", "seen": false, "timestamp": 2, "type": "text" }
            }},
            "u1_u3": { "messages": {
                "m3": { "senderId": "u3", "seen": true, "timestamp": 3, "type": "text" }
            }},
            "u1_u4": { "messages": {
                "m4": { "senderId": "u4", "timestamp": 4, "type": "text" }
            }},
            "u2_u3": { "messages": {
                "m5": { "senderId": "u2", "seen": false, "timestamp": 5, "type": "text" }
            }},
            "garbage": 1
        }));

        let unread = unread_peers(&chats, &uid("u1"));
        assert_eq!(unread, [uid("u2"), uid("u4")].into_iter().collect());
    }

    #[test]
    fn own_messages_never_count() {
        let chats = Some(json!({
            "u1_u2": { "messages": {
                "m1": { "senderId": "u1", "seen": false, "timestamp": 1, "type": "text" }
            }}
        }));
        assert!(unread_peers(&chats, &uid("u1")).is_empty());
        assert!(unread_peers(&None, &uid("u1")).is_empty());
    }
}
