/// Application name
pub const APP_NAME: &str = "EB Chat";

/// Synthetic user id of the AI assistant contact
pub const ASSISTANT_ID: &str = "eb-assistant-bot";

/// Default display name of the assistant contact
pub const ASSISTANT_NAME: &str = "EB Assistant";

pub const ASSISTANT_EMAIL: &str = "ai@eb.com";
pub const ASSISTANT_PHOTO_URL: &str = "https://cdn-icons-png.flaticon.com/512/4712/4712035.png";
pub const ASSISTANT_BIO: &str = "Official EB Intelligence Node.";

/// Separator between the two sorted participant ids of a conversation id.
/// User ids must never contain it.
pub const CONVERSATION_SEPARATOR: char = '_';

/// Realtime store roots
pub const STATUS_ROOT: &str = "status";
pub const CHATS_ROOT: &str = "chats";
pub const MESSAGES_SEGMENT: &str = "messages";
pub const TYPING_ROOT: &str = "typing";

/// Reserved path reporting this connection's own connectivity
pub const CONNECTED_PATH: &str = ".info/connected";

/// Key of the server-value placeholder object (`{".sv": "timestamp"}`)
pub const SERVER_VALUE_KEY: &str = ".sv";
pub const SERVER_VALUE_TIMESTAMP: &str = "timestamp";

/// Reply used when the responder produced no text
pub const AI_EMPTY_FALLBACK: &str = "I couldn't process that.";

/// Reply used when the responder failed
pub const AI_ERROR_FALLBACK: &str = "Error processing AI response.";

/// Prefix asking the assistant for a generated image instead of text
pub const IMAGINE_PREFIX: &str = "/imagine ";

/// Maximum message text length in bytes (16 KiB)
pub const MAX_MESSAGE_TEXT: usize = 16 * 1024;

/// Default maximum upload size in bytes (10 MiB)
pub const DEFAULT_MAX_BLOB_SIZE: usize = 10 * 1024 * 1024;
