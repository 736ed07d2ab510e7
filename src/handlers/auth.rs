//! Handshake credential extraction
//!
//! Tokens are only read from headers, never from the URL, so they stay out
//! of access logs and referrers. Clients that cannot set headers send an
//! `authenticate` event as their first frame instead.

use warp::http::HeaderMap;

use crate::auth::token::extract_bearer_token;

const SUBPROTOCOL_PREFIXES: [&str; 2] = ["bearer.", "token."];

/// Find a `bearer.{jwt}` or `token.{jwt}` entry in Sec-WebSocket-Protocol
///
/// Returns the full protocol entry (to echo back) together with the token.
pub fn extract_token_from_subprotocol(headers: &HeaderMap) -> Option<(String, String)> {
    let protocols = headers.get("sec-websocket-protocol")?.to_str().ok()?;
    protocols.split(',').map(str::trim).find_map(|protocol| {
        SUBPROTOCOL_PREFIXES.iter().find_map(|prefix| {
            protocol
                .strip_prefix(prefix)
                .filter(|token| !token.is_empty())
                .map(|token| (protocol.to_string(), token.to_string()))
        })
    })
}

/// Token offered during the upgrade, by priority: Authorization header,
/// WebSocket subprotocol, X-Auth-Token header
pub fn extract_handshake_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(extract_bearer_token)
    {
        log::debug!("Token extracted from Authorization header");
        return Some(token);
    }

    if let Some((_, token)) = extract_token_from_subprotocol(headers) {
        log::debug!("Token extracted from WebSocket subprotocol");
        return Some(token);
    }

    if let Some(token) = headers
        .get("x-auth-token")
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        log::debug!("Token extracted from X-Auth-Token header");
        return Some(token.to_string());
    }

    None
}
