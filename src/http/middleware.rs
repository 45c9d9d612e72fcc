//! Axum middleware enforcing a limit class on a host router.
//!
//! ```ignore
//! use axum::middleware::from_fn_with_state;
//! use abuse_guard::http::{enforce_limit, LimitLayerState};
//!
//! Router::new()
//!     .route("/login", post(login))
//!     .layer(from_fn_with_state(
//!         LimitLayerState::new(guard.clone(), LimitClass::Auth),
//!         enforce_limit,
//!     ))
//! ```

use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::debug;

use super::service::{deny_status, insert_retry_after, ErrorBody};
use crate::guard::{AbuseGuard, Decision, DenyReason, LimitClass};

const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// State for [`enforce_limit`]: the shared guard and the class to apply.
#[derive(Clone)]
pub struct LimitLayerState {
    pub guard: Arc<AbuseGuard>,
    pub class: LimitClass,
}

impl LimitLayerState {
    pub fn new(guard: Arc<AbuseGuard>, class: LimitClass) -> Self {
        Self { guard, class }
    }
}

/// Reject requests that are blocked (403) or over the class limit (429).
pub async fn enforce_limit(
    State(state): State<LimitLayerState>,
    request: Request,
    next: Next,
) -> Response {
    match state.guard.check_limit(state.class, request.headers()) {
        Decision::Allowed {
            remaining,
            window_reset_at,
        } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert(REMAINING_HEADER, HeaderValue::from(remaining));
            headers.insert(RESET_HEADER, HeaderValue::from(window_reset_at.timestamp()));
            response
        }
        Decision::Denied {
            reason,
            retry_after_secs,
        } => {
            debug!(
                class = %state.class,
                reason = ?reason,
                retry_after = retry_after_secs,
                "Request denied by abuse guard"
            );
            denial_response(reason, retry_after_secs)
        }
    }
}

fn denial_response(reason: DenyReason, retry_after_secs: u64) -> Response {
    let body = match reason {
        DenyReason::Blocked => ErrorBody {
            error: "ip_blocked",
            message: "Your IP has been temporarily blocked due to suspicious activity".to_string(),
            retry_after: Some(retry_after_secs),
        },
        DenyReason::RateLimited => ErrorBody {
            error: "rate_limited",
            message: "Too many requests. Please try again later.".to_string(),
            retry_after: Some(retry_after_secs),
        },
    };

    let mut response = (deny_status(reason), Json(body)).into_response();
    insert_retry_after(response.headers_mut(), retry_after_secs);
    response
}
