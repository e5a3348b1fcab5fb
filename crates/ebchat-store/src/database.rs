//! SQLite-backed profile store.
//!
//! [`SqliteDocumentStore`] owns a [`rusqlite::Connection`] behind a mutex,
//! runs migrations before any other operation, and pushes the full profile
//! collection to every live subscriber after each mutation.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::mpsc;
use tracing::debug;

use ebchat_shared::{ProfilePatch, UserId, UserProfile};

use crate::document::DocumentStore;
use crate::error::{Result, StoreError};
use crate::listener::Listener;
use crate::migrations;

type Subscribers = Arc<Mutex<Vec<(u64, mpsc::UnboundedSender<Vec<UserProfile>>)>>>;

pub struct SqliteDocumentStore {
    conn: Mutex<Connection>,
    subscribers: Subscribers,
    next_subscriber: Mutex<u64>,
}

impl SqliteDocumentStore {
    /// Open (or create) the default application database.
    ///
    /// The file is placed in the platform data directory:
    /// - Linux:   `~/.local/share/ebchat/ebchat.db`
    /// - macOS:   `~/Library/Application Support/com.ebchat.ebchat/ebchat.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\ebchat\ebchat\data\ebchat.db`
    pub fn open_default() -> Result<Self> {
        let path = Self::default_path()?;
        tracing::info!(path = %path.display(), "opening profile database");
        Self::open_at(&path)
    }

    pub fn default_path() -> Result<PathBuf> {
        let project_dirs =
            ProjectDirs::from("com", "ebchat", "ebchat").ok_or(StoreError::NoDataDir)?;
        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;
        Ok(data_dir.join("ebchat.db"))
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::from_connection(conn)
    }

    /// Private, non-persistent database. Used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_subscriber: Mutex::new(0),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Filesystem path of the open database, `None` for in-memory stores.
    pub fn path(&self) -> Option<PathBuf> {
        self.conn().path().map(PathBuf::from)
    }

    fn read_profile(conn: &Connection, uid: &UserId) -> Result<Option<UserProfile>> {
        let json: Option<String> = conn
            .query_row(
                "SELECT json FROM profiles WHERE uid = ?1",
                params![uid.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn write_profile(conn: &Connection, profile: &UserProfile) -> Result<()> {
        let json = serde_json::to_string(profile)?;
        conn.execute(
            "INSERT INTO profiles (uid, json, updated_at, name) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(uid) DO UPDATE SET json = ?2, updated_at = ?3, name = ?4",
            params![
                profile.uid.as_str(),
                json,
                Utc::now().to_rfc3339(),
                profile.name
            ],
        )?;
        Ok(())
    }

    fn read_all(conn: &Connection) -> Result<Vec<UserProfile>> {
        let mut stmt = conn.prepare("SELECT json FROM profiles ORDER BY name ASC, uid ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut profiles = Vec::new();
        for row in rows {
            let json = row?;
            match serde_json::from_str(&json) {
                Ok(profile) => profiles.push(profile),
                Err(e) => tracing::warn!(error = %e, "skipping malformed profile row"),
            }
        }
        Ok(profiles)
    }

    /// Push the current collection to every subscriber, dropping closed ones.
    fn broadcast(&self) -> Result<()> {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if subscribers.is_empty() {
            return Ok(());
        }
        let all = Self::read_all(&self.conn())?;
        subscribers.retain(|(_, tx)| tx.send(all.clone()).is_ok());
        debug!(subscribers = subscribers.len(), profiles = all.len(), "profiles broadcast");
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get_profile(&self, uid: &UserId) -> Result<Option<UserProfile>> {
        Self::read_profile(&self.conn(), uid)
    }

    async fn put_profile(&self, profile: &UserProfile) -> Result<()> {
        Self::write_profile(&self.conn(), profile)?;
        self.broadcast()
    }

    async fn update_profile(&self, uid: &UserId, patch: &ProfilePatch) -> Result<UserProfile> {
        let updated = {
            let mut conn = self.conn();
            let tx = conn.transaction()?;
            let mut profile = Self::read_profile(&tx, uid)?.ok_or(StoreError::NotFound)?;
            profile.apply(patch);
            Self::write_profile(&tx, &profile)?;
            tx.commit()?;
            profile
        };
        self.broadcast()?;
        Ok(updated)
    }

    async fn delete_profile(&self, uid: &UserId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM profiles WHERE uid = ?1", params![uid.as_str()])?;
        if affected > 0 {
            self.broadcast()?;
        }
        Ok(affected > 0)
    }

    async fn list_profiles(&self) -> Result<Vec<UserProfile>> {
        Self::read_all(&self.conn())
    }

    fn subscribe_profiles(&self) -> Result<Listener<Vec<UserProfile>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Self::read_all(&self.conn())?);

        let id = {
            let mut next = self
                .next_subscriber
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *next += 1;
            *next
        };
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, tx));

        let subscribers = Arc::downgrade(&self.subscribers);
        Ok(Listener::new(rx, move || {
            if let Some(subscribers) = subscribers.upgrade() {
                subscribers
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .retain(|(sid, _)| *sid != id);
            }
        }))
    }
}
