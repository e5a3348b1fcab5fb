//! In-process realtime store.
//!
//! [`RealtimeServer`] owns a single JSON tree shared by every connection.
//! Each [`RealtimeClient`] is one connection with its own liveness flag and
//! its own queue of on-disconnect writes, which the server applies when the
//! connection is lost ([`RealtimeClient::disconnect`] or drop). This mirrors
//! how a managed realtime backend executes those hooks server-side, without
//! any further action from the client that registered them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use ebchat_shared::paths::is_server_timestamp;
use ebchat_shared::{now_millis, RealtimePath, Timestamp};

use crate::error::{Result, StoreError};
use crate::listener::Listener;
use crate::realtime::{RealtimeStore, Snapshot};

// ---------------------------------------------------------------------------
// Server state
// ---------------------------------------------------------------------------

enum Deferred {
    Set(Value),
    Remove,
}

struct Watcher {
    client: u64,
    path: RealtimePath,
    tx: mpsc::UnboundedSender<Snapshot>,
}

struct Connection {
    connected: bool,
    on_disconnect: Vec<(RealtimePath, Deferred)>,
}

#[derive(Default)]
struct Rules {
    read_denied: Vec<RealtimePath>,
    write_denied: Vec<RealtimePath>,
}

struct ServerState {
    root: Value,
    watchers: HashMap<u64, Watcher>,
    connections: HashMap<u64, Connection>,
    rules: Rules,
    next_id: u64,
}

impl ServerState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn read(&self, path: &RealtimePath) -> Snapshot {
        let mut node = &self.root;
        for segment in path.segments() {
            node = node.as_object()?.get(segment)?;
        }
        Some(node.clone())
    }

    fn write(&mut self, path: &RealtimePath, value: Option<Value>, now: Timestamp) {
        let value = value.map(|v| resolve_server_values(v, now));
        let segments: Vec<&str> = path.segments().collect();
        write_at(&mut self.root, &segments, value);
        if !self.root.is_object() {
            self.root = Value::Object(Map::new());
        }
    }

    fn check(&self, path: &RealtimePath, denied: &[RealtimePath]) -> Result<()> {
        match denied.iter().find(|rule| rule.overlaps(path)) {
            Some(rule) => Err(StoreError::PermissionDenied(format!(
                "{path} (rule on {rule})"
            ))),
            None => Ok(()),
        }
    }

    fn check_read(&self, path: &RealtimePath) -> Result<()> {
        self.check(path, &self.rules.read_denied)
    }

    fn check_write(&self, client: u64, path: &RealtimePath) -> Result<()> {
        if !self.is_connected(client) {
            return Err(StoreError::Disconnected);
        }
        self.check(path, &self.rules.write_denied)
    }

    fn is_connected(&self, client: u64) -> bool {
        self.connections
            .get(&client)
            .map(|c| c.connected)
            .unwrap_or(false)
    }

    /// Deliver fresh snapshots to every watcher on the branch of `changed`.
    fn notify(&mut self, changed: &RealtimePath) {
        let connected = RealtimePath::connected();
        let mut dead = Vec::new();
        for (id, watcher) in &self.watchers {
            if watcher.path == connected || !watcher.path.overlaps(changed) {
                continue;
            }
            if watcher.tx.send(self.read(&watcher.path)).is_err() {
                dead.push(*id);
            }
        }
        for id in dead {
            self.watchers.remove(&id);
        }
    }

    fn notify_connected(&mut self, client: u64) {
        let connected = RealtimePath::connected();
        let value = Value::Bool(self.is_connected(client));
        self.watchers.retain(|_, w| {
            if w.client != client || w.path != connected {
                return true;
            }
            w.tx.send(Some(value.clone())).is_ok()
        });
    }
}

/// Replace every server-value placeholder with `now`.
fn resolve_server_values(value: Value, now: Timestamp) -> Value {
    if is_server_timestamp(&value) {
        return Value::from(now);
    }
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, resolve_server_values(v, now)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| resolve_server_values(v, now))
                .collect(),
        ),
        other => other,
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Write (or remove, for `None`/null/empty) at `segments` below `node`,
/// pruning parents left empty.
fn write_at(node: &mut Value, segments: &[&str], value: Option<Value>) {
    let Some((head, rest)) = segments.split_first() else {
        *node = match value {
            Some(v) if !is_empty_value(&v) => v,
            _ => Value::Null,
        };
        return;
    };

    if !node.is_object() {
        if value.as_ref().map_or(true, is_empty_value) {
            return;
        }
        *node = Value::Object(Map::new());
    }
    let Value::Object(map) = node else {
        return;
    };

    let child = map.entry(head.to_string()).or_insert(Value::Null);
    write_at(child, rest, value);
    if is_empty_value(child) {
        map.remove(*head);
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// The shared tree. Cloning yields another handle to the same server.
#[derive(Clone)]
pub struct RealtimeServer {
    inner: Arc<Mutex<ServerState>>,
    key_seq: Arc<AtomicU64>,
}

impl RealtimeServer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ServerState {
                root: Value::Object(Map::new()),
                watchers: HashMap::new(),
                connections: HashMap::new(),
                rules: Rules::default(),
                next_id: 0,
            })),
            key_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a new connection. It starts out connected.
    pub fn connect(&self) -> RealtimeClient {
        let id = {
            let mut state = self.state();
            let id = state.next_id();
            state.connections.insert(
                id,
                Connection {
                    connected: true,
                    on_disconnect: Vec::new(),
                },
            );
            id
        };
        debug!(client = id, "realtime connection opened");
        RealtimeClient {
            id,
            server: self.clone(),
        }
    }

    /// Reject reads of anything on the branch of `prefix`.
    pub fn deny_read(&self, prefix: RealtimePath) {
        self.state().rules.read_denied.push(prefix);
    }

    /// Reject writes to anything on the branch of `prefix`.
    pub fn deny_write(&self, prefix: RealtimePath) {
        self.state().rules.write_denied.push(prefix);
    }

    /// Read bypassing access rules and connection state.
    pub fn snapshot(&self, path: &RealtimePath) -> Snapshot {
        self.state().read(path)
    }

    /// Number of live subscriptions across all connections.
    pub fn watcher_count(&self) -> usize {
        self.state().watchers.len()
    }

    fn detach_fn(&self, watcher: u64) -> impl FnOnce() + Send + 'static {
        let weak: Weak<Mutex<ServerState>> = Arc::downgrade(&self.inner);
        move || {
            if let Some(inner) = weak.upgrade() {
                let mut state = inner.lock().unwrap_or_else(PoisonError::into_inner);
                state.watchers.remove(&watcher);
            }
        }
    }
}

impl Default for RealtimeServer {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Client connection
// ---------------------------------------------------------------------------

/// One connection to a [`RealtimeServer`].
pub struct RealtimeClient {
    id: u64,
    server: RealtimeServer,
}

impl RealtimeClient {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_connected(&self) -> bool {
        self.server.state().is_connected(self.id)
    }

    /// Abrupt connection loss: the server runs this connection's queued
    /// on-disconnect writes and reports `false` on `.info/connected`.
    pub fn disconnect(&self) {
        let mut state = self.server.state();
        let Some(conn) = state.connections.get_mut(&self.id) else {
            return;
        };
        if !conn.connected {
            return;
        }
        conn.connected = false;
        let deferred = std::mem::take(&mut conn.on_disconnect);

        let now = now_millis();
        for (path, op) in &deferred {
            let value = match op {
                Deferred::Set(v) => Some(v.clone()),
                Deferred::Remove => None,
            };
            state.write(path, value, now);
        }
        for (path, _) in &deferred {
            state.notify(path);
        }
        state.notify_connected(self.id);

        info!(
            client = self.id,
            hooks = deferred.len(),
            "realtime connection lost, on-disconnect writes applied"
        );
    }

    /// Restore connectivity. Previously applied hooks are not re-armed;
    /// clients re-register them when they see `.info/connected == true`.
    pub fn reconnect(&self) {
        let mut state = self.server.state();
        if let Some(conn) = state.connections.get_mut(&self.id) {
            if conn.connected {
                return;
            }
            conn.connected = true;
        }
        state.notify_connected(self.id);
        info!(client = self.id, "realtime connection restored");
    }

    fn apply(&self, path: &RealtimePath, value: Option<Value>) -> Result<()> {
        let mut state = self.server.state();
        state.check_write(self.id, path)?;
        state.write(path, value, now_millis());
        state.notify(path);
        Ok(())
    }

    fn queue(&self, path: &RealtimePath, op: Deferred) -> Result<()> {
        let mut state = self.server.state();
        state.check_write(self.id, path)?;
        let conn = state
            .connections
            .get_mut(&self.id)
            .ok_or(StoreError::Disconnected)?;
        conn.on_disconnect.retain(|(p, _)| p != path);
        conn.on_disconnect.push((path.clone(), op));
        Ok(())
    }
}

#[async_trait]
impl RealtimeStore for RealtimeClient {
    async fn get(&self, path: &RealtimePath) -> Result<Snapshot> {
        let state = self.server.state();
        if *path == RealtimePath::connected() {
            return Ok(Some(Value::Bool(state.is_connected(self.id))));
        }
        state.check_read(path)?;
        Ok(state.read(path))
    }

    async fn set(&self, path: &RealtimePath, value: Value) -> Result<()> {
        self.apply(path, Some(value))
    }

    async fn update(&self, path: &RealtimePath, fields: Map<String, Value>) -> Result<()> {
        let mut state = self.server.state();
        state.check_write(self.id, path)?;
        let now = now_millis();
        for (key, value) in fields {
            let relative = RealtimePath::parse(&key)?;
            let child = path.child(relative.as_str());
            state.check_write(self.id, &child)?;
            state.write(&child, Some(value), now);
        }
        state.notify(path);
        Ok(())
    }

    async fn remove(&self, path: &RealtimePath) -> Result<()> {
        self.apply(path, None)
    }

    fn push_key(&self) -> String {
        let seq = self.server.key_seq.fetch_add(1, Ordering::Relaxed);
        let salt = uuid::Uuid::new_v4().simple().to_string();
        format!("{:012x}{:06x}{}", now_millis(), seq & 0xff_ffff, &salt[..6])
    }

    async fn on_disconnect_set(&self, path: &RealtimePath, value: Value) -> Result<()> {
        self.queue(path, Deferred::Set(value))
    }

    async fn on_disconnect_remove(&self, path: &RealtimePath) -> Result<()> {
        self.queue(path, Deferred::Remove)
    }

    async fn cancel_on_disconnect(&self, path: &RealtimePath) -> Result<()> {
        let mut state = self.server.state();
        if let Some(conn) = state.connections.get_mut(&self.id) {
            conn.on_disconnect.retain(|(p, _)| p != path);
        }
        Ok(())
    }

    fn subscribe(&self, path: &RealtimePath) -> Result<Listener<Snapshot>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.server.state();

        let initial = if *path == RealtimePath::connected() {
            Some(Value::Bool(state.is_connected(self.id)))
        } else {
            state.check_read(path)?;
            state.read(path)
        };
        // The receiver is still held locally, so this cannot fail.
        let _ = tx.send(initial);

        let watcher = state.next_id();
        state.watchers.insert(
            watcher,
            Watcher {
                client: self.id,
                path: path.clone(),
                tx,
            },
        );
        drop(state);

        debug!(client = self.id, path = %path, watcher, "subscribed");
        Ok(Listener::new(rx, self.server.detach_fn(watcher)))
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        self.disconnect();
        let mut state = self.server.state();
        state.connections.remove(&self.id);
        let before = state.watchers.len();
        state.watchers.retain(|_, w| w.client != self.id);
        let dropped = before - state.watchers.len();
        if dropped > 0 {
            warn!(client = self.id, dropped, "connection closed with live subscriptions");
        }
    }
}
