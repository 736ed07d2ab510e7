use std::error::Error;
use std::fmt;
use std::sync::PoisonError;

use crate::constants::CONNECTION_LIMIT_MESSAGE;

#[derive(Debug)]
pub enum RelayError {
    // Lock errors
    LockPoisoned(String),

    // Authentication errors
    AuthError(String),
    HandshakeTimeout,

    // Connection errors
    ConnectionClosed,
    ConnectionReplaced,

    // Message errors
    MessageParseError(String),
    MessageTooLong(usize),
    TooManyAttachments(usize),
    EmptyMessage,
    DuplicateMessage,

    // Room errors
    NotInConversation(String),

    // Collaborator errors, for store and directory implementations
    StorageError(String),
    DirectoryError(String),

    // Configuration errors
    ConfigError(String),
}

impl RelayError {
    /// Stable machine-readable code sent to clients in error events
    pub fn code(&self) -> &'static str {
        match self {
            Self::LockPoisoned(_) => "INTERNAL",
            Self::AuthError(_) => "AUTH_FAILED",
            Self::HandshakeTimeout => "AUTH_TIMEOUT",
            Self::ConnectionClosed => "CONNECTION_CLOSED",
            Self::ConnectionReplaced => "CONNECTION_REPLACED",
            Self::MessageParseError(_) => "INVALID_EVENT",
            Self::MessageTooLong(_) => "MESSAGE_TOO_LONG",
            Self::TooManyAttachments(_) => "TOO_MANY_ATTACHMENTS",
            Self::EmptyMessage => "EMPTY_MESSAGE",
            Self::DuplicateMessage => "DUPLICATE_MESSAGE",
            Self::NotInConversation(_) => "NOT_IN_CONVERSATION",
            Self::StorageError(_) => "STORAGE_ERROR",
            Self::DirectoryError(_) => "DIRECTORY_ERROR",
            Self::ConfigError(_) => "CONFIG_ERROR",
        }
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LockPoisoned(msg) => write!(f, "Lock poisoned: {}", msg),
            Self::AuthError(msg) => write!(f, "Authentication error: {}", msg),
            Self::HandshakeTimeout => write!(f, "Authentication handshake timed out"),
            Self::ConnectionClosed => write!(f, "Connection closed unexpectedly"),
            Self::ConnectionReplaced => write!(f, "{}", CONNECTION_LIMIT_MESSAGE),
            Self::MessageParseError(msg) => write!(f, "Message parse error: {}", msg),
            Self::MessageTooLong(len) => {
                write!(f, "Message too long: {} characters", len)
            }
            Self::TooManyAttachments(count) => {
                write!(f, "Too many attachments: {}", count)
            }
            Self::EmptyMessage => write!(f, "Message cannot be empty"),
            Self::DuplicateMessage => {
                write!(f, "Duplicate message: identical content was just sent")
            }
            Self::NotInConversation(id) => {
                write!(f, "Not a member of conversation {}", id)
            }
            Self::StorageError(msg) => write!(f, "Storage error: {}", msg),
            Self::DirectoryError(msg) => write!(f, "Participant lookup error: {}", msg),
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl Error for RelayError {}

// Converting from PoisonError to facilitate poisoned lock handling
impl<T> From<PoisonError<T>> for RelayError {
    fn from(err: PoisonError<T>) -> Self {
        RelayError::LockPoisoned(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
