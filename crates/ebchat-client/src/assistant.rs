//! The assistant contact.
//!
//! The generative model sits behind [`AiResponder`]. Replies are produced
//! out-of-band by [`spawn_reply`] after the human message has been written,
//! and always land in the conversation as an ordinary `ai` message: a
//! failed or empty response is replaced by a canned fallback text so the
//! log stays consistent.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use ebchat_shared::constants::{AI_EMPTY_FALLBACK, AI_ERROR_FALLBACK, IMAGINE_PREFIX};
use ebchat_shared::{
    now_millis, ConversationId, Message, MessageId, MessageKind, MessageMetadata, RealtimePath,
    UserId,
};

use crate::session::SessionContext;

/// Text returned when no model is configured.
pub const AI_UNAVAILABLE_TEXT: &str = "AI services are currently unavailable (API Key missing).";

/// Errors that can occur while asking the model.
#[derive(Debug, Error)]
pub enum ResponderError {
    /// The responder is temporarily unavailable.
    #[error("responder unavailable: {0}")]
    Unavailable(String),

    /// The request was made but failed.
    #[error("request failed: {0}")]
    Failed(String),

    #[error("request timed out")]
    Timeout,
}

/// An image passed inline with a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    /// Base64 (standard alphabet) payload.
    pub data: String,
}

impl InlineImage {
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }
}

/// A generated image payload.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub mime_type: String,
    pub data: Bytes,
}

/// Stateless generative model: every request stands alone, no
/// conversation context is kept on this side.
#[async_trait]
pub trait AiResponder: Send + Sync {
    /// Answer a prompt, optionally about one inline image.
    async fn respond(
        &self,
        prompt: &str,
        image: Option<&InlineImage>,
    ) -> Result<String, ResponderError>;

    /// Generate an image for a prompt. `Ok(None)` when the model returned
    /// no image part.
    async fn generate_image(&self, prompt: &str) -> Result<Option<GeneratedImage>, ResponderError>;

    fn name(&self) -> &str;
}

/// Responder used when no model is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredResponder;

#[async_trait]
impl AiResponder for UnconfiguredResponder {
    async fn respond(&self, _prompt: &str, _image: Option<&InlineImage>) -> Result<String, ResponderError> {
        Ok(AI_UNAVAILABLE_TEXT.to_string())
    }

    async fn generate_image(&self, _prompt: &str) -> Result<Option<GeneratedImage>, ResponderError> {
        Ok(None)
    }

    fn name(&self) -> &str {
        "Unconfigured"
    }
}

/// Replies in flight for one conversation, published as a single
/// "processing" flag that stays up until the last of them ends.
#[derive(Debug)]
pub(crate) struct Processing {
    pending: AtomicUsize,
    flag: watch::Sender<bool>,
}

impl Processing {
    pub(crate) fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            pending: AtomicUsize::new(0),
            flag,
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        *self.flag.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.flag.subscribe()
    }
}

/// Holds one slot of [`Processing`] however the reply task ends, including
/// cancellation.
struct ProcessingGuard(Arc<Processing>);

impl ProcessingGuard {
    fn raise(processing: Arc<Processing>) -> Self {
        processing.flag.send_modify(|busy| {
            processing.pending.fetch_add(1, Ordering::SeqCst);
            *busy = true;
        });
        Self(processing)
    }
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        let processing = &self.0;
        processing.flag.send_modify(|busy| {
            let left = processing.pending.fetch_sub(1, Ordering::SeqCst) - 1;
            *busy = left > 0;
        });
    }
}

/// What the human sent, as far as the responder is concerned.
#[derive(Debug, Clone)]
pub(crate) struct Prompt {
    pub text: String,
    pub image: Option<InlineImage>,
}

/// Request a reply for `prompt` and write it into `conversation`.
///
/// The processing flag is raised before this returns and lowered when the
/// last reply in flight finishes in any way.
pub(crate) fn spawn_reply(
    ctx: Arc<SessionContext>,
    conversation: ConversationId,
    prompt: Prompt,
    processing: Arc<Processing>,
) -> JoinHandle<()> {
    let guard = ProcessingGuard::raise(processing);
    tokio::spawn(async move {
        let _guard = guard;
        let responder = ctx.responder().clone();
        debug!(responder = responder.name(), conversation = %conversation, "requesting assistant reply");

        let (text, metadata) = match prompt.text.strip_prefix(IMAGINE_PREFIX) {
            Some(description) => imagine(&ctx, &conversation, responder.as_ref(), description).await,
            None => (answer(responder.as_ref(), &prompt).await, None),
        };

        if let Err(e) = write_reply(&ctx, &conversation, text, metadata).await {
            error!(error = %e, conversation = %conversation, "failed to store assistant reply");
            ctx.notices().error("Assistant reply could not be saved.");
        }
    })
}

async fn answer(responder: &dyn AiResponder, prompt: &Prompt) -> String {
    match responder.respond(&prompt.text, prompt.image.as_ref()).await {
        Ok(text) if !text.trim().is_empty() => text,
        Ok(_) => {
            info!(responder = responder.name(), "assistant returned an empty reply");
            AI_EMPTY_FALLBACK.to_string()
        }
        Err(e) => {
            warn!(responder = responder.name(), error = %e, "assistant request failed");
            AI_ERROR_FALLBACK.to_string()
        }
    }
}

async fn imagine(
    ctx: &SessionContext,
    conversation: &ConversationId,
    responder: &dyn AiResponder,
    description: &str,
) -> (String, Option<MessageMetadata>) {
    let image = match responder.generate_image(description).await {
        Ok(Some(image)) => image,
        Ok(None) => return (AI_EMPTY_FALLBACK.to_string(), None),
        Err(e) => {
            warn!(error = %e, "image generation failed");
            return (AI_ERROR_FALLBACK.to_string(), None);
        }
    };

    let extension = image.mime_type.rsplit('/').next().unwrap_or("png");
    let object = format!("chats/{}/{}_generated.{}", conversation, now_millis(), extension);
    match ctx.blobs().upload(&object, image.data).await {
        Ok(url) => (
            description.to_string(),
            Some(MessageMetadata {
                url: Some(url),
                ..MessageMetadata::default()
            }),
        ),
        Err(e) => {
            warn!(error = %e, object = %object, "generated image upload failed");
            (AI_ERROR_FALLBACK.to_string(), None)
        }
    }
}

async fn write_reply(
    ctx: &SessionContext,
    conversation: &ConversationId,
    text: String,
    metadata: Option<MessageMetadata>,
) -> ebchat_store::Result<()> {
    let realtime = ctx.realtime();
    let id = MessageId(realtime.push_key());
    let message = Message {
        id: id.clone(),
        sender_id: UserId::assistant(),
        text,
        timestamp: now_millis(),
        // Assistant replies never count as unread.
        seen: true,
        kind: MessageKind::Ai,
        edited: false,
        reactions: Default::default(),
        metadata,
    };
    realtime
        .set(
            &RealtimePath::message(conversation, &id),
            serde_json::to_value(&message)?,
        )
        .await?;
    debug!(message = %id, conversation = %conversation, "assistant reply stored");
    Ok(())
}
