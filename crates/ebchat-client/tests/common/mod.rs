//! Shared fixtures: one in-process realtime server, one profile database
//! and one blob directory shared by every simulated user.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::{mpsc, watch, Notify};

use ebchat_client::{
    AiResponder, Backends, ClientConfig, GeneratedImage, InlineImage, Notice, NoticeSink,
    ResponderError, SessionContext, UnconfiguredResponder,
};
use ebchat_shared::{ConversationId, MessageId, RealtimePath, UserId, UserProfile};
use ebchat_store::{
    BlobStore, DocumentStore, FsBlobStore, RealtimeClient, RealtimeServer, SqliteDocumentStore,
    StoreError,
};

pub fn uid(s: &str) -> UserId {
    UserId::new(s).expect("valid user id")
}

pub struct World {
    pub server: RealtimeServer,
    pub documents: Arc<SqliteDocumentStore>,
    pub blobs: Arc<FsBlobStore>,
    _dir: TempDir,
}

pub struct User {
    pub ctx: Arc<SessionContext>,
    pub notices: mpsc::UnboundedReceiver<Notice>,
    pub connection: Arc<RealtimeClient>,
}

impl User {
    /// Every notice emitted so far.
    pub fn drain_notices(&mut self) -> Vec<Notice> {
        let mut out = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            out.push(notice);
        }
        out
    }
}

impl World {
    pub async fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let blobs = FsBlobStore::new(
            dir.path().join("blobs"),
            Some("https://blobs.test".into()),
            1024 * 1024,
        )
        .await
        .expect("blob store");
        Self {
            server: RealtimeServer::new(),
            documents: Arc::new(SqliteDocumentStore::open_in_memory().expect("profile db")),
            blobs: Arc::new(blobs),
            _dir: dir,
        }
    }

    pub fn backends(&self, connection: Arc<RealtimeClient>) -> Backends {
        Backends {
            realtime: connection,
            documents: self.documents.clone(),
            blobs: self.blobs.clone(),
            responder: Arc::new(UnconfiguredResponder),
        }
    }

    /// Register a profile and sign the user in on a fresh connection.
    pub async fn user(&self, id: &str) -> User {
        let connection = Arc::new(self.server.connect());
        self.user_with(id, self.backends(connection.clone()), connection)
            .await
    }

    pub async fn user_with(&self, id: &str, backends: Backends, connection: Arc<RealtimeClient>) -> User {
        let uid = uid(id);
        if self.documents.get_profile(&uid).await.unwrap().is_none() {
            let profile = UserProfile::new(uid.clone(), id.to_uppercase(), 1);
            self.documents.put_profile(&profile).await.unwrap();
        }
        let (notices, rx) = NoticeSink::channel();
        let ctx = SessionContext::new(uid, None, backends, notices, Arc::new(ClientConfig::default()));
        ctx.refresh_profile().await.unwrap();
        User {
            ctx,
            notices: rx,
            connection,
        }
    }

    /// Write a message record directly, as another client would.
    pub fn message_path(&self, a: &str, b: &str, id: &str) -> RealtimePath {
        RealtimePath::message(&ConversationId::between(&uid(a), &uid(b)), &MessageId(id.into()))
    }

    pub fn messages_path(&self, a: &str, b: &str) -> RealtimePath {
        RealtimePath::messages(&ConversationId::between(&uid(a), &uid(b)))
    }
}

pub fn raw_message(sender: &str, text: &str, timestamp: i64, seen: bool) -> Value {
    json!({
        "senderId": sender,
        "text": text,
        "timestamp": timestamp,
        "type": "text",
        "seen": seen,
    })
}

pub async fn wait_until<T>(rx: &mut watch::Receiver<T>, mut check: impl FnMut(&T) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|v| check(v)))
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed");
}

/// Blob store that refuses every upload.
pub struct FailingBlobs;

#[async_trait]
impl BlobStore for FailingBlobs {
    async fn upload(&self, _object_path: &str, _data: Bytes) -> ebchat_store::Result<String> {
        Err(StoreError::BlobStorage("bucket unavailable".into()))
    }
}

/// Responder with a fixed answer, optionally held until released.
pub struct ScriptedResponder {
    pub reply: Result<String, String>,
    pub image: Option<GeneratedImage>,
    pub gate: Option<Arc<Notify>>,
    pub prompts: std::sync::Mutex<Vec<(String, Option<InlineImage>)>>,
}

impl ScriptedResponder {
    pub fn answering(text: &str) -> Self {
        Self {
            reply: Ok(text.into()),
            image: None,
            gate: None,
            prompts: Default::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: Err("quota exceeded".into()),
            image: None,
            gate: None,
            prompts: Default::default(),
        }
    }
}

#[async_trait]
impl AiResponder for ScriptedResponder {
    async fn respond(&self, prompt: &str, image: Option<&InlineImage>) -> Result<String, ResponderError> {
        self.prompts
            .lock()
            .unwrap()
            .push((prompt.to_string(), image.cloned()));
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.reply.clone().map_err(ResponderError::Failed)
    }

    async fn generate_image(&self, _prompt: &str) -> Result<Option<GeneratedImage>, ResponderError> {
        Ok(self.image.clone())
    }

    fn name(&self) -> &str {
        "Scripted"
    }
}
