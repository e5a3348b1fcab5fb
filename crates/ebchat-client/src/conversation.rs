//! One open conversation: the ordered message log, read receipts, and the
//! write operations on it.
//!
//! The store hands over the whole `chats/{id}/messages` subtree on every
//! change. Each delivery is parsed, sorted by timestamp and published as a
//! fresh list; inbound records that are still unseen are then flipped to
//! `seen`. The receipt pass reads the raw records with the same rule as the
//! unread badges, so a record too malformed to display is still
//! acknowledged. Each record is requested once while the view is open,
//! unless its write fails, in which case the next delivery retries it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use futures::future::join_all;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use ebchat_shared::constants::MAX_MESSAGE_TEXT;
use ebchat_shared::{
    now_millis, ConversationId, Message, MessageId, MessageKind, MessageMetadata, RealtimePath,
    UserId,
};
use ebchat_store::{RealtimeStore, Snapshot};

use crate::assistant::{self, InlineImage, Processing, Prompt};
use crate::error::{ClientError, Result};
use crate::session::SessionContext;
use crate::subscription::Subscription;

/// An image attached to an outgoing message.
#[derive(Debug, Clone)]
pub struct OutgoingImage {
    pub file_name: String,
    pub mime_type: String,
    pub data: Bytes,
}

/// Result of a successful send.
#[derive(Debug)]
pub struct Sent {
    pub id: MessageId,
    /// The assistant's reply task, for conversations with the assistant.
    pub reply: Option<JoinHandle<()>>,
}

/// Parse a messages subtree into a list ordered by timestamp.
///
/// Records missing an `id` take it from their key. Records that do not
/// parse are skipped. Equal timestamps fall back to id order so the result
/// is stable across deliveries.
pub fn sorted_messages(snapshot: &Snapshot) -> Vec<Message> {
    let Some(Value::Object(entries)) = snapshot else {
        return Vec::new();
    };

    let mut messages: Vec<Message> = entries
        .iter()
        .filter_map(|(key, value)| {
            let mut value = value.clone();
            if let Value::Object(ref mut fields) = value {
                fields
                    .entry("id")
                    .or_insert_with(|| Value::String(key.clone()));
            }
            match serde_json::from_value::<Message>(value) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!(key = %key, error = %e, "skipping malformed message");
                    None
                }
            }
        })
        .collect();

    messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    messages
}

/// Keys of the records in a messages subtree that `viewer` has yet to
/// acknowledge.
fn unseen_record_ids(snapshot: &Snapshot, viewer: &UserId) -> Vec<MessageId> {
    let Some(Value::Object(entries)) = snapshot else {
        return Vec::new();
    };
    entries
        .iter()
        .filter(|(_, record)| Message::record_is_unseen_by(record, viewer))
        .map(|(key, _)| MessageId(key.clone()))
        .collect()
}

pub struct ConversationView {
    ctx: Arc<SessionContext>,
    peer: UserId,
    conversation: ConversationId,
    messages: Arc<watch::Sender<Vec<Message>>>,
    processing: Arc<Processing>,
    subscription: Subscription,
}

impl ConversationView {
    /// Attach to the conversation with `peer`. A refused subscription leaves
    /// an empty view and a notice; it is not an error.
    pub fn open(ctx: Arc<SessionContext>, peer: UserId) -> Self {
        let conversation = ctx.conversation_with(&peer);
        let (messages, _) = watch::channel(Vec::new());
        let messages = Arc::new(messages);

        let path = RealtimePath::messages(&conversation);
        let subscription = match ctx.realtime().subscribe(&path) {
            Ok(listener) => {
                let ctx = ctx.clone();
                let conversation = conversation.clone();
                let messages = messages.clone();
                let requested: Arc<Mutex<HashSet<MessageId>>> = Arc::default();
                Subscription::spawn("messages", listener, move |snapshot| {
                    let sorted = sorted_messages(&snapshot);
                    let mut unseen = unseen_record_ids(&snapshot, ctx.uid());
                    {
                        let mut requested = requested.lock().unwrap_or_else(PoisonError::into_inner);
                        unseen.retain(|id| requested.insert(id.clone()));
                    }
                    debug!(conversation = %conversation, count = sorted.len(), unseen = unseen.len(), "messages delivered");
                    messages.send_replace(sorted);

                    let realtime = ctx.realtime().clone();
                    let conversation = conversation.clone();
                    let requested = requested.clone();
                    async move {
                        let writes = unseen
                            .iter()
                            .map(|id| write_seen(realtime.as_ref(), &conversation, id));
                        for (id, result) in unseen.iter().zip(join_all(writes).await) {
                            if let Err(e) = result {
                                warn!(conversation = %conversation, message = %id, error = %e, "read receipt not written");
                                requested
                                    .lock()
                                    .unwrap_or_else(PoisonError::into_inner)
                                    .remove(id);
                            }
                        }
                    }
                })
            }
            Err(e) => {
                warn!(conversation = %conversation, error = %e, "cannot open conversation");
                ctx.notices().error("Could not load messages.");
                Subscription::inactive("messages")
            }
        };
        let subscription = ctx.adopt(subscription);

        info!(conversation = %conversation, peer = %peer, "conversation opened");
        Self {
            ctx,
            peer,
            conversation,
            messages,
            processing: Arc::new(Processing::new()),
            subscription,
        }
    }

    pub fn peer(&self) -> &UserId {
        &self.peer
    }

    pub fn conversation(&self) -> &ConversationId {
        &self.conversation
    }

    /// Messages in display order.
    pub fn messages(&self) -> Vec<Message> {
        self.messages.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Vec<Message>> {
        self.messages.subscribe()
    }

    /// Whether an assistant reply is being produced.
    pub fn is_processing(&self) -> bool {
        self.processing.is_active()
    }

    pub fn watch_processing(&self) -> watch::Receiver<bool> {
        self.processing.subscribe()
    }

    /// Send text, optionally with an image.
    ///
    /// The image is uploaded first; if that fails nothing is written. For
    /// the assistant, the reply is requested after the message is stored
    /// and does not delay the return.
    pub async fn send(&self, text: &str, image: Option<OutgoingImage>) -> Result<Sent> {
        let text = text.trim();
        if text.is_empty() && image.is_none() {
            return Err(ClientError::EmptyMessage);
        }
        check_length(text)?;
        self.ensure_not_blocked().await?;

        let mut metadata = None;
        if let Some(ref image) = image {
            let object = format!("chats/{}/{}_{}", self.conversation, now_millis(), image.file_name);
            match self.ctx.blobs().upload(&object, image.data.clone()).await {
                Ok(url) => {
                    metadata = Some(MessageMetadata {
                        url: Some(url),
                        ..MessageMetadata::default()
                    })
                }
                Err(e) => {
                    error!(conversation = %self.conversation, object = %object, error = %e, "image upload failed, send aborted");
                    self.ctx.notices().error("Image upload failed. Message not sent.");
                    return Err(ClientError::UploadFailed(e));
                }
            }
        }

        let realtime = self.ctx.realtime();
        let id = MessageId(realtime.push_key());
        let message = Message {
            id: id.clone(),
            sender_id: self.ctx.uid().clone(),
            text: text.to_string(),
            timestamp: now_millis(),
            seen: false,
            kind: if image.is_some() {
                MessageKind::Image
            } else {
                MessageKind::Text
            },
            edited: false,
            reactions: Default::default(),
            metadata,
        };
        let value = serde_json::to_value(&message).map_err(ebchat_store::StoreError::from)?;
        if let Err(e) = realtime
            .set(&RealtimePath::message(&self.conversation, &id), value)
            .await
        {
            error!(conversation = %self.conversation, error = %e, "message write failed");
            self.ctx.notices().error("Message could not be sent.");
            return Err(e.into());
        }
        debug!(conversation = %self.conversation, message = %id, "message sent");

        let reply = self.peer.is_assistant().then(|| {
            let prompt = Prompt {
                text: text.to_string(),
                image: image.map(|i| InlineImage::from_bytes(i.mime_type, &i.data)),
            };
            assistant::spawn_reply(
                self.ctx.clone(),
                self.conversation.clone(),
                prompt,
                self.processing.clone(),
            )
        });

        Ok(Sent { id, reply })
    }

    /// Replace the text of one of our own messages. Position in the log is
    /// unchanged.
    pub async fn edit(&self, id: &MessageId, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        check_length(text)?;
        self.own_message(id)?;
        self.ensure_not_blocked().await?;

        let mut fields = Map::new();
        fields.insert("text".into(), Value::String(text.to_string()));
        fields.insert("edited".into(), Value::Bool(true));
        self.ctx
            .realtime()
            .update(&RealtimePath::message(&self.conversation, id), fields)
            .await?;
        debug!(conversation = %self.conversation, message = %id, "message edited");
        Ok(())
    }

    /// Remove one of our own messages. There is no tombstone.
    pub async fn delete(&self, id: &MessageId) -> Result<()> {
        let notices = self.ctx.notices();
        if let Err(e) = self.own_message(id) {
            if matches!(e, ClientError::NotAuthor(_)) {
                notices.error("Permission Denied.");
            }
            return Err(e);
        }
        match self
            .ctx
            .realtime()
            .remove(&RealtimePath::message(&self.conversation, id))
            .await
        {
            Ok(()) => {
                notices.success("Message Unsent");
                Ok(())
            }
            Err(e) => {
                warn!(conversation = %self.conversation, message = %id, error = %e, "delete failed");
                notices.error("Permission Denied.");
                Err(e.into())
            }
        }
    }

    /// Set or clear our reaction on a message.
    pub async fn react(&self, id: &MessageId, emoji: Option<&str>) -> Result<()> {
        self.find(id)?;
        let mut fields = Map::new();
        fields.insert(
            format!("reactions/{}", self.ctx.uid()),
            emoji.map_or(Value::Null, |e| Value::String(e.to_string())),
        );
        self.ctx
            .realtime()
            .update(&RealtimePath::message(&self.conversation, id), fields)
            .await?;
        Ok(())
    }

    /// Write a read receipt for `id`. Repeating it changes nothing.
    pub async fn mark_seen(&self, id: &MessageId) -> Result<()> {
        let message = self.find(id)?;
        if message.sender_id == *self.ctx.uid() {
            return Ok(());
        }
        write_seen(self.ctx.realtime().as_ref(), &self.conversation, id).await?;
        Ok(())
    }

    /// Detach from the store. An assistant reply already in flight still
    /// lands in the log.
    pub fn close(mut self) {
        self.subscription.stop();
    }

    fn find(&self, id: &MessageId) -> Result<Message> {
        self.messages
            .borrow()
            .iter()
            .find(|m| &m.id == id)
            .cloned()
            .ok_or_else(|| ClientError::MessageNotFound(id.clone()))
    }

    fn own_message(&self, id: &MessageId) -> Result<Message> {
        let message = self.find(id)?;
        if message.sender_id != *self.ctx.uid() {
            return Err(ClientError::NotAuthor(id.clone()));
        }
        Ok(message)
    }

    /// Refuse to write when either side has blocked the other.
    async fn ensure_not_blocked(&self) -> Result<()> {
        let me = self.ctx.uid();
        let mut blocked = self
            .ctx
            .profile()
            .is_some_and(|p| p.has_blocked(&self.peer));

        if !blocked && !self.peer.is_assistant() {
            match self.ctx.documents().get_profile(&self.peer).await {
                Ok(Some(peer)) => blocked = peer.has_blocked(me),
                Ok(None) => {}
                Err(e) => debug!(peer = %self.peer, error = %e, "peer profile unavailable for block check"),
            }
        }

        if blocked {
            info!(conversation = %self.conversation, peer = %self.peer, "send rejected, relationship is blocked");
            self.ctx.notices().error("User is Blocked");
            return Err(ClientError::Blocked(self.peer.clone()));
        }
        Ok(())
    }
}

impl Drop for ConversationView {
    fn drop(&mut self) {
        self.subscription.stop();
    }
}

fn check_length(text: &str) -> Result<()> {
    if text.len() > MAX_MESSAGE_TEXT {
        return Err(ClientError::TooLong {
            len: text.len(),
            max: MAX_MESSAGE_TEXT,
        });
    }
    Ok(())
}

async fn write_seen(
    realtime: &dyn RealtimeStore,
    conversation: &ConversationId,
    id: &MessageId,
) -> ebchat_store::Result<()> {
    let mut fields = Map::new();
    fields.insert("seen".into(), Value::Bool(true));
    realtime
        .update(&RealtimePath::message(conversation, id), fields)
        .await
}
