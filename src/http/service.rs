//! HTTP handlers exposing the guard to a non-Rust web tier.

use axum::{
    extract::{Path, Query, State},
    http::{header::RETRY_AFTER, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::GuardError;
use crate::guard::{
    AbuseGuard, ActivityRecord, BlockedIp, Decision, DenyReason, InspectionResult, LimitClass,
    RequestMeta, DEFAULT_BLOCK_REASON, DEFAULT_TAIL,
};

/// Body of `POST /v1/check`.
#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub class: String,
    /// Headers of the request being checked
    #[serde(default)]
    pub headers: ForwardedHeaders,
}

/// Body of `POST /v1/inspect`.
#[derive(Debug, Deserialize)]
pub struct InspectRequest {
    #[serde(default = "default_method")]
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: ForwardedHeaders,
    #[serde(default)]
    pub body: Option<Value>,
}

/// Header pairs of a forwarded request, kept in the order the JSON object
/// lists them. When a name repeats under different casing, the first
/// occurrence is the one identity resolution sees.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardedHeaders(pub Vec<(String, String)>);

impl<'de> Deserialize<'de> for ForwardedHeaders {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct PairsVisitor;

        impl<'de> Visitor<'de> for PairsVisitor {
            type Value = ForwardedHeaders;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object mapping header names to string values")
            }

            fn visit_map<A>(self, mut access: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut pairs = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some(pair) = access.next_entry::<String, String>()? {
                    pairs.push(pair);
                }
                Ok(ForwardedHeaders(pairs))
            }
        }

        deserializer.deserialize_map(PairsVisitor)
    }
}

fn default_method() -> String {
    "GET".to_string()
}

/// Body of `POST /v1/admin/blocked`.
#[derive(Debug, Deserialize)]
pub struct BlockRequest {
    pub ip: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClearQuery {
    pub class: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<usize>,
}

/// JSON error body shared by the service and the middleware.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// Errors returned by the HTTP handlers.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
}

impl From<GuardError> for ApiError {
    fn from(err: GuardError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody {
                    error: "bad_request",
                    message,
                    retry_after: None,
                }),
            )
                .into_response(),
        }
    }
}

/// 403 for blocked clients, 429 for rate limited ones.
pub(crate) fn deny_status(reason: DenyReason) -> StatusCode {
    match reason {
        DenyReason::Blocked => StatusCode::FORBIDDEN,
        DenyReason::RateLimited => StatusCode::TOO_MANY_REQUESTS,
    }
}

pub(crate) fn insert_retry_after(headers: &mut HeaderMap, retry_after_secs: u64) {
    if let Ok(v) = HeaderValue::from_str(&retry_after_secs.to_string()) {
        headers.insert(RETRY_AFTER, v);
    }
}

/// Build a router serving the check, inspect and admin endpoints.
pub fn router(guard: Arc<AbuseGuard>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/check", post(check))
        .route("/v1/inspect", post(inspect))
        .route("/v1/admin/blocked", get(list_blocked).post(block_ip))
        .route("/v1/admin/blocked/{ip}", delete(unblock_ip))
        .route("/v1/admin/limits/{ip}", delete(clear_limits))
        .route("/v1/admin/activity", get(activity))
        .with_state(guard)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn check(
    State(guard): State<Arc<AbuseGuard>>,
    Json(req): Json<CheckRequest>,
) -> Result<Response, ApiError> {
    debug!(class = %req.class, "Processing limit check");
    let class: LimitClass = req.class.parse()?;
    let headers = header_map(&req.headers);
    let decision = guard.check_limit(class, &headers);

    let response = match decision {
        Decision::Allowed { .. } => (StatusCode::OK, Json(decision)).into_response(),
        Decision::Denied {
            reason,
            retry_after_secs,
        } => {
            let mut response = (deny_status(reason), Json(decision)).into_response();
            insert_retry_after(response.headers_mut(), retry_after_secs);
            response
        }
    };

    Ok(response)
}

async fn inspect(
    State(guard): State<Arc<AbuseGuard>>,
    Json(req): Json<InspectRequest>,
) -> Json<InspectionResult> {
    debug!(method = %req.method, path = %req.path, "Processing inspection");
    let meta = RequestMeta::new(&req.method, &req.path).with_headers(header_map(&req.headers));
    Json(guard.inspect(&meta, req.body.as_ref()))
}

async fn list_blocked(State(guard): State<Arc<AbuseGuard>>) -> Json<Vec<BlockedIp>> {
    Json(guard.blocked_entries())
}

async fn block_ip(
    State(guard): State<Arc<AbuseGuard>>,
    Json(req): Json<BlockRequest>,
) -> Result<Json<BlockedIp>, ApiError> {
    let ip = req.ip.trim();
    if ip.is_empty() {
        return Err(ApiError::BadRequest("ip is required".to_string()));
    }

    let reason = req.reason.as_deref().unwrap_or(DEFAULT_BLOCK_REASON);
    info!(ip = %ip, reason = %reason, "Admin block requested");
    Ok(Json(guard.block(ip, reason)))
}

async fn unblock_ip(State(guard): State<Arc<AbuseGuard>>, Path(ip): Path<String>) -> StatusCode {
    guard.unblock(&ip);
    StatusCode::NO_CONTENT
}

async fn clear_limits(
    State(guard): State<Arc<AbuseGuard>>,
    Path(ip): Path<String>,
    Query(query): Query<ClearQuery>,
) -> Result<StatusCode, ApiError> {
    let class = query
        .class
        .as_deref()
        .map(str::parse::<LimitClass>)
        .transpose()?;
    guard.clear_limit(&ip, class);
    Ok(StatusCode::NO_CONTENT)
}

async fn activity(
    State(guard): State<Arc<AbuseGuard>>,
    Query(query): Query<ActivityQuery>,
) -> Json<Vec<ActivityRecord>> {
    Json(guard.tail_activity(query.limit.unwrap_or(DEFAULT_TAIL)))
}

/// Convert forwarded header pairs in order, skipping names or values HTTP
/// rejects. Values may carry non-ASCII bytes.
fn header_map(headers: &ForwardedHeaders) -> HeaderMap {
    let mut map = HeaderMap::with_capacity(headers.0.len());
    for (name, value) in &headers.0 {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            (Ok(name), Ok(value)) => {
                map.append(name, value);
            }
            _ => debug!(header = %name, "Skipping invalid forwarded header"),
        }
    }
    map
}
