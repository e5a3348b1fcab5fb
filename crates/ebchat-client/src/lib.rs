//! # ebchat-client
//!
//! Presence and chat-session synchronization on top of the `ebchat-store`
//! backends.
//!
//! A [`SessionManager`] follows the identity provider and owns one
//! [`SessionContext`] per sign-in. Views built from that context each own
//! their subscriptions and detach them when closed or dropped:
//!
//! * [`PresenceTracker`] -- online/offline record with an on-disconnect hook.
//! * [`ContactDirectory`] -- profiles with live presence overlaid.
//! * [`ConversationView`] -- ordered message log, read receipts, send/edit/
//!   delete/react, assistant replies.
//! * [`TypingChannel`] -- per-conversation typing flags.
//! * [`UnreadAggregator`] -- peers with unseen inbound messages.

pub mod account;
pub mod assistant;
pub mod auth;
pub mod config;
pub mod contacts;
pub mod conversation;
pub mod error;
pub mod notices;
pub mod presence;
pub mod session;
pub mod subscription;
pub mod typing;
pub mod unread;

#[cfg(test)]
mod testing;

use tracing_subscriber::{fmt, EnvFilter};

pub use account::ProfileSetup;
pub use assistant::{AiResponder, GeneratedImage, InlineImage, ResponderError, UnconfiguredResponder};
pub use auth::{ActiveSession, AuthUser, IdentityProvider, LocalIdentity, SessionManager};
pub use config::ClientConfig;
pub use contacts::{format_last_seen, Contact, ContactDirectory};
pub use conversation::{sorted_messages, ConversationView, OutgoingImage, Sent};
pub use error::{ClientError, Result};
pub use notices::{Notice, NoticeSink};
pub use presence::{PresenceState, PresenceTracker};
pub use session::{Backends, SessionContext};
pub use subscription::{Subscription, SubscriptionScope};
pub use typing::TypingChannel;
pub use unread::{unread_peers, UnreadAggregator};

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured filter. Calling this twice is harmless.
pub fn init_tracing(config: &ClientConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
