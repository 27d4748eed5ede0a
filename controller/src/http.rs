//! The HTTP surface: `/` (embedded UI placeholder), `/api` and `/api2`
//! (JSON command dispatch), with JSONP wrapping, permissive CORS, and a
//! per-peer anti-bruteforce counter that clears on a successful auth.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::Value;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;
use utils::http::json::wrap_body;

use crate::auth::{authorize, loopback_auto_auth, AuthorizeRequest};
use crate::config_store::ConfigDoc;
use crate::dispatch::{build_envelope, dispatch, minimal_streams_envelope};

/// Requests from one peer are locked out after this many consecutive
/// unauthorized attempts, matching the "at most 4 unauthenticated attempts"
/// contract; a successful auth clears the count.
pub const MAX_UNAUTHORIZED_ATTEMPTS: u32 = 4;
const BRUTEFORCE_PENALTY: Duration = Duration::from_millis(1000);

pub struct AppState {
    pub doc: Mutex<ConfigDoc>,
    pub failed_attempts: Mutex<HashMap<String, u32>>,
    pub now: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl AppState {
    pub fn new(doc: ConfigDoc, now: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        AppState {
            doc: Mutex::new(doc),
            failed_attempts: Mutex::new(HashMap::new()),
            now: Box::new(now),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/", get(ui_handler))
        .route("/api", get(api_handler).post(api_handler))
        .route("/api2", get(api2_handler).post(api2_handler))
        .layer(cors)
        .with_state(state)
}

async fn ui_handler() -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/html")],
        "<!doctype html><title>controller</title>",
    )
}

#[derive(Debug, serde::Deserialize, Default)]
pub struct ApiQuery {
    command: Option<String>,
    callback: Option<String>,
    jsonp: Option<String>,
}

async fn api_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<ApiQuery>,
) -> impl IntoResponse {
    handle_api(state, addr, query, false).await
}

async fn api2_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<ApiQuery>,
) -> impl IntoResponse {
    handle_api(state, addr, query, true).await
}

async fn handle_api(
    state: Arc<AppState>,
    addr: SocketAddr,
    query: ApiQuery,
    minimal: bool,
) -> Response {
    let peer_host = addr.ip().to_string();
    let now = (state.now)();

    let command_value: Option<Value> = query
        .command
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok());
    let Some(Value::Object(command)) = command_value else {
        return plain_text_response(StatusCode::BAD_REQUEST, "command must be a JSON object", &query);
    };

    {
        let mut attempts = state.failed_attempts.lock().await;
        let count = attempts.entry(peer_host.clone()).or_insert(0);
        if *count >= MAX_UNAUTHORIZED_ATTEMPTS {
            return plain_text_response(StatusCode::TOO_MANY_REQUESTS, "too many failed attempts", &query);
        }
    }

    let peer_is_loopback = addr.ip().is_loopback();
    let has_real_ip_header = false; // header inspection omitted: no reverse proxy in this deployment shape
    let authorized = if loopback_auto_auth(peer_is_loopback, has_real_ip_header) {
        true
    } else if let Some(auth_value) = command.get("authorize") {
        let request = parse_authorize(auth_value);
        let mut doc = state.doc.lock().await;
        let (result, created) = authorize(&doc.accounts, &peer_host, &request);
        if let Some((username, account)) = created {
            doc.accounts.insert(username, account);
        }
        if !result.authorized {
            warn!(peer = peer_host, "failed auth attempt");
        }
        result.authorized
    } else {
        false
    };

    if authorized {
        // A successful auth clears this peer's strikes; only consecutive
        // failures count toward the lockout.
        state.failed_attempts.lock().await.remove(&peer_host);
    } else {
        tokio::time::sleep(BRUTEFORCE_PENALTY).await;
        let mut attempts = state.failed_attempts.lock().await;
        *attempts.entry(peer_host).or_insert(0) += 1;
        return plain_text_response(StatusCode::UNAUTHORIZED, "unauthorized", &query);
    }

    let mut doc = state.doc.lock().await;
    let touched = dispatch(&mut doc, &command, now);
    let saw_stream_mutation = command.contains_key("addstream") || command.contains_key("deletestream");

    let body_value = if minimal && saw_stream_mutation {
        minimal_streams_envelope(&doc, &touched)
    } else if minimal {
        serde_json::json!({})
    } else {
        build_envelope(&doc, now)
    };

    json_response(StatusCode::OK, &body_value, &query)
}

fn parse_authorize(value: &Value) -> AuthorizeRequest {
    AuthorizeRequest {
        username: value.get("username").and_then(Value::as_str).map(str::to_string),
        password: value.get("password").and_then(Value::as_str).map(str::to_string),
        new_username: value.get("new_username").and_then(Value::as_str).map(str::to_string),
        new_password: value.get("new_password").and_then(Value::as_str).map(str::to_string),
    }
}

fn jsonp_name(query: &ApiQuery) -> Option<&str> {
    query.callback.as_deref().or(query.jsonp.as_deref())
}

fn json_response(status: StatusCode, value: &Value, query: &ApiQuery) -> Response {
    let body = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    plain_text_response(status, &body, query)
}

fn plain_text_response(status: StatusCode, body: &str, query: &ApiQuery) -> Response {
    let wrapped = wrap_body(body, jsonp_name(query));
    let mut response = (status, wrapped).into_response();
    response
        .headers_mut()
        .insert(axum::http::header::CONTENT_TYPE, HeaderValue::from_static("text/javascript"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jsonp_prefers_callback_over_jsonp_param() {
        let query = ApiQuery {
            command: None,
            callback: Some("cb".to_string()),
            jsonp: Some("other".to_string()),
        };
        assert_eq!(jsonp_name(&query), Some("cb"));
    }
}
