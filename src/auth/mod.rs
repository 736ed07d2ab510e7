//! Credential to identity resolution

pub mod identity;
pub mod token;

// Re-export main components
pub use identity::IdentityResolver;
pub use token::{Claims, TokenManager};
