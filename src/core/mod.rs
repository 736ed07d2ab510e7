//! Real-time core: connections, rooms, throttling and presence

pub mod cleanup;
pub mod clock;
pub mod connection;
pub mod dedup;
pub mod gateway;
pub mod message;
pub mod message_types;
pub mod presence;
pub mod rate_limiter;
pub mod registry;
pub mod room;

// Re-export main components for convenience
pub use cleanup::{CleanupReport, CleanupScheduler};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use connection::{Connection, ConnectionId};
pub use dedup::DuplicateSuppressor;
pub use gateway::{Gateway, GatewayStats, SharedGateway};
pub use message::{Attachment, ChatMessage, ReadReceipt};
pub use message_types::{ClientEvent, ServerEvent};
pub use presence::{PresenceStatus, PresenceTracker};
pub use rate_limiter::{EventKind, EventRateLimiter};
pub use registry::ConnectionRegistry;
pub use room::{RoomId, RoomRouter};
