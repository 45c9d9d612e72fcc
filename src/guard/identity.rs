//! Client identity resolution from request headers.
//!
//! The resolved key comes straight from client-supplied headers and is only
//! trustworthy when a reverse proxy in front of the application strips or
//! overwrites them. Deployments must terminate traffic at such a proxy.

use axum::http::HeaderMap;

/// Key returned when no identifying header is present.
pub const UNKNOWN_CLIENT: &str = "unknown";

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";
const CF_CONNECTING_IP: &str = "cf-connecting-ip";

/// Resolve a best-effort client identifier from request headers.
///
/// Checks `X-Forwarded-For` (first entry), then `X-Real-IP`, then
/// `CF-Connecting-IP`. Empty or non-UTF-8 values are skipped. Falls back to
/// [`UNKNOWN_CLIENT`].
pub fn resolve_client_key(headers: &HeaderMap) -> String {
    if let Some(forwarded) = header_str(headers, FORWARDED_FOR) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    for name in [REAL_IP, CF_CONNECTING_IP] {
        if let Some(value) = header_str(headers, name) {
            return value.to_string();
        }
    }

    UNKNOWN_CLIENT.to_string()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
