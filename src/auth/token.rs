use async_trait::async_trait;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::auth::identity::IdentityResolver;
use crate::error::{RelayError, Result};

/// Upper bound on accepted token size
const MAX_TOKEN_LENGTH: usize = 4096;

/// JWT Claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Expiration time (as UTC timestamp)
    pub exp: usize,
    /// Issued at (as UTC timestamp)
    pub iat: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

fn unix_now() -> usize {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as usize)
        .unwrap_or(0)
}

impl Claims {
    /// Creates claims valid for 24 hours
    pub fn new(user_id: String, username: Option<String>) -> Self {
        Self::with_expiration(user_id, username, 24)
    }

    pub fn with_expiration(user_id: String, username: Option<String>, hours: usize) -> Self {
        let now = unix_now();
        Self {
            sub: user_id,
            exp: now + hours * 3600,
            iat: now,
            username,
        }
    }

    pub fn is_expired(&self) -> bool {
        unix_now() > self.exp
    }
}

/// Validates HS256 tokens issued by the surrounding platform
pub struct TokenManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenManager {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }

    /// Signs claims; issuance belongs to the platform, this exists for tooling and tests
    pub fn generate_token(&self, claims: &Claims) -> Result<String> {
        encode(&Header::default(), claims, &self.encoding_key)
            .map_err(|e| RelayError::AuthError(format!("Failed to generate token: {}", e)))
    }

    pub fn validate_token(&self, token: &str) -> Result<TokenData<Claims>> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| RelayError::AuthError(format!("Invalid token: {}", e)))
    }

    /// Validates a token and returns the user ID if valid
    pub fn validate_and_get_user_id(&self, token: &str) -> Result<String> {
        if token.len() > MAX_TOKEN_LENGTH {
            return Err(RelayError::AuthError("Token too long".to_string()));
        }
        if token.chars().any(|c| c.is_control()) {
            return Err(RelayError::AuthError(
                "Token contains invalid characters".to_string(),
            ));
        }

        let claims = self.validate_token(token)?.claims;
        if claims.is_expired() {
            return Err(RelayError::AuthError("Token expired".to_string()));
        }
        if claims.sub.trim().is_empty() || claims.sub.len() > 128 {
            return Err(RelayError::AuthError("Invalid token subject".to_string()));
        }

        Ok(claims.sub)
    }
}

#[async_trait]
impl IdentityResolver for TokenManager {
    async fn resolve(&self, credential: &str) -> Result<String> {
        self.validate_and_get_user_id(credential)
    }
}

/// Extracts bearer token from Authorization header
pub fn extract_bearer_token(auth_header: &str) -> Option<String> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}
