//! # ebchat-store
//!
//! Backend seams for the ebchat synchronization core and the concrete
//! backends it ships with.
//!
//! * [`RealtimeStore`] -- hierarchical path store with live snapshots and
//!   on-disconnect hooks. [`RealtimeServer`] is the in-process
//!   implementation; each [`RealtimeClient`] is one connection to it.
//! * [`DocumentStore`] -- profile records by user id.
//!   [`SqliteDocumentStore`] keeps them in SQLite.
//! * [`BlobStore`] -- upload-by-path returning a URL. [`FsBlobStore`]
//!   writes to a local directory.

pub mod blobs;
pub mod database;
pub mod document;
pub mod listener;
pub mod memory;
pub mod migrations;
pub mod realtime;

mod error;

pub use blobs::{BlobStore, FsBlobStore};
pub use database::SqliteDocumentStore;
pub use document::DocumentStore;
pub use error::{Result, StoreError};
pub use listener::{DetachGuard, Listener};
pub use memory::{RealtimeClient, RealtimeServer};
pub use realtime::{RealtimeStore, Snapshot};
