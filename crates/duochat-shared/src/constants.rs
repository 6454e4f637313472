/// Access token lifetime in seconds (15 minutes)
pub const ACCESS_TOKEN_TTL_SECS: i64 = 15 * 60;

/// Refresh token lifetime in seconds (7 days)
pub const REFRESH_TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// QR pairing token lifetime in seconds (5 minutes)
pub const QR_TOKEN_TTL_SECS: u64 = 5 * 60;

/// Key-value namespace for pending QR pairings
pub const QR_KEY_PREFIX: &str = "qr:";

/// Relay room namespace; one room per user
pub const ROOM_PREFIX: &str = "user:";

/// Simulated key material size in bytes (256 bits)
pub const KEY_MATERIAL_SIZE: usize = 32;

/// AES-CBC initialisation vector size in bytes
pub const IV_SIZE: usize = 16;

/// Constant stand-in for an authentication tag. CBC has none.
pub const PLACEHOLDER_AUTH_TAG: &str = "0000000000000000";

/// Rendered in place of message content that failed to decrypt
pub const DECRYPTION_FAILED: &str = "[Decryption Error]";

/// Default HTTP port (server)
pub const DEFAULT_HTTP_PORT: u16 = 3000;

/// WebSocket relay path
pub const SOCKET_PATH: &str = "/socket";

/// Relay event names
pub const EVENT_CONNECT: &str = "connect";
pub const EVENT_MESSAGE: &str = "message";
pub const EVENT_DELETE_MESSAGE: &str = "deleteMessage";
pub const EVENT_ERROR: &str = "error";
