//! The realtime key-value store seam.

use async_trait::async_trait;
use serde_json::{Map, Value};

use ebchat_shared::RealtimePath;

use crate::error::Result;
use crate::listener::Listener;

/// Full subtree at a path; `None` when nothing is stored there.
pub type Snapshot = Option<Value>;

/// A hierarchical, path-addressed store with live subscriptions.
///
/// Every subscription delivers the complete current subtree on attach and
/// after every change (replace-snapshot semantics). Values may contain the
/// [`server_timestamp`](ebchat_shared::paths::server_timestamp) placeholder,
/// which the backend resolves when the write is applied.
#[async_trait]
pub trait RealtimeStore: Send + Sync {
    async fn get(&self, path: &RealtimePath) -> Result<Snapshot>;

    /// Replace the subtree at `path`. Writing `Null` removes it.
    async fn set(&self, path: &RealtimePath, value: Value) -> Result<()>;

    /// Merge children into the subtree at `path`. Keys may be relative
    /// paths (`"a/b"`); `Null` values remove the child.
    async fn update(&self, path: &RealtimePath, fields: Map<String, Value>) -> Result<()>;

    async fn remove(&self, path: &RealtimePath) -> Result<()>;

    /// Generate a fresh child key. Keys sort chronologically.
    fn push_key(&self) -> String;

    /// Queue `value` to be written at `path` when this connection is lost.
    async fn on_disconnect_set(&self, path: &RealtimePath, value: Value) -> Result<()>;

    /// Queue a removal of `path` for when this connection is lost.
    async fn on_disconnect_remove(&self, path: &RealtimePath) -> Result<()>;

    /// Drop any queued on-disconnect write for `path`.
    async fn cancel_on_disconnect(&self, path: &RealtimePath) -> Result<()>;

    /// Subscribe to the subtree at `path`. The reserved
    /// [`RealtimePath::connected`] path reports this connection's liveness.
    fn subscribe(&self, path: &RealtimePath) -> Result<Listener<Snapshot>>;
}
