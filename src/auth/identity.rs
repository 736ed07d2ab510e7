use async_trait::async_trait;

use crate::error::Result;

/// Resolves a connection credential to the user it belongs to
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, credential: &str) -> Result<String>;
}
