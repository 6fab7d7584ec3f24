//! HTTP server - one query endpoint plus a health probe

use crate::error::ServiceError;
use crate::pipeline::App;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Shared application state
pub type AppState = Arc<App>;

/// Start the web server
pub async fn start_server(app: App, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let host = app.config.server.host.clone();
    let state: AppState = Arc::new(app);
    let router = router(state);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", host, port)).await?;
    info!(%host, port, "query service listening");
    axum::serve(listener, router).await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/query",
            post(handle_query).fallback(method_not_allowed),
        )
        .route("/health", get(health_check))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Deserialize)]
struct QueryRequest {
    question: Option<String>,
    #[serde(default)]
    minimal: Option<bool>,
}

#[derive(Serialize)]
struct ErrorBody {
    ok: bool,
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sql: Option<String>,
}

async fn handle_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> (StatusCode, Json<serde_json::Value>) {
    if !is_authorized(&headers, &state.config.auth.service_api_key) {
        return error_response(&ServiceError::Unauthorized);
    }

    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => {
            return error_response(&ServiceError::BadJson {
                detail: rejection.body_text(),
            })
        }
    };

    let question = body
        .question
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();
    if question.is_empty() {
        return error_response(&ServiceError::MissingQuestion);
    }

    let minimal = body.minimal.unwrap_or(false) || header_flag(&headers, "x-minimal");

    let deadline = state.config.server.request_timeout();
    let outcome = match tokio::time::timeout(deadline, state.answer_question(question)).await {
        Ok(result) => result,
        Err(_) => Err(ServiceError::DeadlineExceeded),
    };

    match outcome {
        Ok(outcome) => {
            let body = if minimal {
                json!({ "ok": true, "answer": outcome.answer })
            } else {
                json!({
                    "ok": true,
                    "answer": outcome.answer,
                    "sql": outcome.sql,
                    "rows": outcome.rows,
                })
            };
            (StatusCode::OK, Json(body))
        }
        Err(err) => error_response(&err),
    }
}

async fn method_not_allowed() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "ok": false, "error": "method_not_allowed" })),
    )
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Error bodies never carry env vars, stack frames or connection strings;
/// only the taxonomy kind, a message and (where useful) the candidate SQL
fn error_response(err: &ServiceError) -> (StatusCode, Json<serde_json::Value>) {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let detail = match err {
        ServiceError::Internal { message } if message.is_empty() => None,
        _ => Some(err.to_string()),
    };
    let body = ErrorBody {
        ok: false,
        error: err.kind(),
        detail,
        sql: err.sql().map(str::to_string),
    };
    (
        status,
        Json(serde_json::to_value(body).unwrap_or_else(|_| json!({ "ok": false }))),
    )
}

/// The shared key authorizes outright; otherwise the request must prove it
/// is same-origin (Referer or Origin host equal to the Host header)
fn is_authorized(headers: &HeaderMap, expected_key: &str) -> bool {
    if let Some(value) = headers.get("x-service-key").and_then(|v| v.to_str().ok()) {
        return value == expected_key;
    }
    same_origin(headers)
}

fn same_origin(headers: &HeaderMap) -> bool {
    let Some(host) = headers.get(header::HOST).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    for name in [header::REFERER, header::ORIGIN] {
        if let Some(value) = headers.get(&name).and_then(|v| v.to_str().ok()) {
            if let Some(authority) = authority_of(value) {
                if authority.eq_ignore_ascii_case(host)
                    || hostname(authority).eq_ignore_ascii_case(hostname(host))
                {
                    return true;
                }
            }
        }
    }
    false
}

fn authority_of(url: &str) -> Option<&str> {
    let rest = url.split("://").nth(1)?;
    Some(rest.split('/').next().unwrap_or(rest))
}

fn hostname(authority: &str) -> &str {
    authority.split(':').next().unwrap_or(authority)
}

fn header_flag(headers: &HeaderMap, name: &str) -> bool {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_matching_service_key_authorizes() {
        let h = headers(&[("x-service-key", "sekrit")]);
        assert!(is_authorized(&h, "sekrit"));
    }

    #[test]
    fn test_mismatched_service_key_rejected_even_same_origin() {
        let h = headers(&[
            ("x-service-key", "wrong"),
            ("host", "api.example.com"),
            ("referer", "https://api.example.com/app"),
        ]);
        assert!(!is_authorized(&h, "sekrit"));
    }

    #[test]
    fn test_same_origin_referer_bypasses_key() {
        let h = headers(&[
            ("host", "api.example.com"),
            ("referer", "https://api.example.com/dashboard"),
        ]);
        assert!(is_authorized(&h, "sekrit"));
    }

    #[test]
    fn test_same_origin_via_origin_header() {
        let h = headers(&[
            ("host", "api.example.com:8080"),
            ("origin", "https://api.example.com:8080"),
        ]);
        assert!(is_authorized(&h, "sekrit"));
    }

    #[test]
    fn test_cross_origin_without_key_rejected() {
        let h = headers(&[
            ("host", "api.example.com"),
            ("referer", "https://evil.example.net/"),
        ]);
        assert!(!is_authorized(&h, "sekrit"));
    }

    #[test]
    fn test_no_headers_rejected() {
        assert!(!is_authorized(&HeaderMap::new(), "sekrit"));
    }

    #[test]
    fn test_minimal_header_flag() {
        let h = headers(&[("x-minimal", "1")]);
        assert!(header_flag(&h, "x-minimal"));
        assert!(!header_flag(&HeaderMap::new(), "x-minimal"));
    }
}
