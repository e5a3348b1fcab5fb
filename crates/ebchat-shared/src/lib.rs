//! Types shared by every ebchat crate: identifiers, stored records, realtime
//! paths and constants. Nothing in here performs I/O.

pub mod constants;
pub mod error;
pub mod models;
pub mod paths;
pub mod types;

pub use error::SharedError;
pub use models::*;
pub use paths::RealtimePath;
pub use types::{now_millis, ConversationId, MessageId, Timestamp, UserId};
