//! HTTP surface: the WebSocket upgrade and a health check

use serde_json::json;
use std::convert::Infallible;
use warp::http::header::SEC_WEBSOCKET_PROTOCOL;
use warp::http::{HeaderMap, HeaderValue, StatusCode};
use warp::{Filter, Rejection, Reply};

use crate::constants::{HEALTH_PATH, WS_PATH};
use crate::core::gateway::SharedGateway;
use crate::handlers::auth::{extract_handshake_token, extract_token_from_subprotocol};
use crate::handlers::websocket::handle_ws_client;

pub fn routes(
    gateway: SharedGateway,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let ws_route = warp::path(WS_PATH)
        .and(warp::path::end())
        .and(warp::ws())
        .and(warp::header::headers_cloned())
        .and(with_gateway(gateway.clone()))
        .map(|ws: warp::ws::Ws, headers: HeaderMap, gateway: SharedGateway| {
            let token = extract_handshake_token(&headers);
            let mut response = ws
                .on_upgrade(move |socket| handle_ws_client(socket, gateway, token))
                .into_response();

            // Browsers drop the socket unless the offered protocol is echoed
            if let Some((protocol, _)) = extract_token_from_subprotocol(&headers) {
                if let Ok(value) = HeaderValue::from_str(&protocol) {
                    response.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
                }
            }
            response
        });

    let health_route = warp::path(HEALTH_PATH)
        .and(warp::path::end())
        .and(warp::get())
        .and(with_gateway(gateway))
        .map(|gateway: SharedGateway| match gateway.stats() {
            Ok(stats) => warp::reply::with_status(
                warp::reply::json(&json!({
                    "status": "ok",
                    "connections": stats.connections,
                    "users": stats.users,
                    "rooms": stats.rooms,
                })),
                StatusCode::OK,
            ),
            Err(e) => {
                log::error!("Health check failed: {}", e);
                warp::reply::with_status(
                    warp::reply::json(&json!({"status": "degraded"})),
                    StatusCode::SERVICE_UNAVAILABLE,
                )
            }
        });

    ws_route.or(health_route)
}

// Helper function to include the gateway in request handlers
fn with_gateway(
    gateway: SharedGateway,
) -> impl Filter<Extract = (SharedGateway,), Error = Infallible> + Clone {
    warp::any().map(move || gateway.clone())
}
