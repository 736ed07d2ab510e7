// Fundamental configuration constants
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3030;
pub const WS_PATH: &str = "ws";
pub const HEALTH_PATH: &str = "health";

// Connection limits
pub const MAX_CONNECTIONS_PER_USER: usize = 3;
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

// Message validation
pub const MAX_MESSAGE_LENGTH: usize = 1000;
pub const MAX_ATTACHMENTS: usize = 5;
pub const MAX_FRAME_SIZE: usize = 16 * 1024;

// Throttle intervals
pub const TYPING_INTERVAL_MS: u64 = 3_000;
pub const JOIN_LEAVE_INTERVAL_MS: u64 = 2_000;
pub const PRESENCE_TOGGLE_INTERVAL_MS: u64 = 10_000;

// Duplicate suppression window
pub const DUPLICATE_WINDOW_MS: u64 = 5_000;

// Presence debounce
pub const PRESENCE_THROTTLE_MS: u64 = 10_000;

// Housekeeping
pub const CLEANUP_INTERVAL_MS: u64 = 5 * 60 * 1000;
pub const RATE_LIMIT_RETENTION_MARGIN_MS: u64 = 60_000;

/// Reason string carried by the eviction notice
pub const REPLACED_REASON: &str = "replaced";
pub const CONNECTION_LIMIT_MESSAGE: &str =
    "Connection limit reached: this session was replaced by a newer one";
