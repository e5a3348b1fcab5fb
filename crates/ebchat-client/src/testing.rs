//! Fixtures for unit tests.

use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::mpsc;

use ebchat_shared::UserId;
use ebchat_store::{FsBlobStore, RealtimeStore, SqliteDocumentStore};

use crate::assistant::UnconfiguredResponder;
use crate::config::ClientConfig;
use crate::notices::{Notice, NoticeSink};
use crate::session::{Backends, SessionContext};

/// Fresh in-memory profiles and a temp blob directory around `realtime`.
pub(crate) async fn backends(realtime: Arc<dyn RealtimeStore>) -> (Backends, TempDir) {
    let dir = TempDir::new().unwrap();
    let blobs = FsBlobStore::new(
        dir.path().to_path_buf(),
        Some("https://blobs.test".into()),
        1024 * 1024,
    )
    .await
    .unwrap();
    let backends = Backends {
        realtime,
        documents: Arc::new(SqliteDocumentStore::open_in_memory().unwrap()),
        blobs: Arc::new(blobs),
        responder: Arc::new(UnconfiguredResponder),
    };
    (backends, dir)
}

pub(crate) async fn context_with(
    uid: &str,
    realtime: Arc<dyn RealtimeStore>,
) -> (Arc<SessionContext>, mpsc::UnboundedReceiver<Notice>, TempDir) {
    let (backends, dir) = backends(realtime).await;
    let (notices, rx) = NoticeSink::channel();
    let ctx = SessionContext::new(
        UserId::new(uid).unwrap(),
        None,
        backends,
        notices,
        Arc::new(ClientConfig::default()),
    );
    (ctx, rx, dir)
}
