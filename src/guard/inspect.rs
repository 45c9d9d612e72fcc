//! Suspicious request pattern detection.
//!
//! The [`Inspector`] is pure: it reports which signatures a request matches.
//! Logging and blocking on a match happen in
//! [`AbuseGuard::inspect`](super::AbuseGuard::inspect).

use axum::http::{header::USER_AGENT, HeaderMap, Request, Uri};
use serde::Serialize;
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;

use crate::config::InspectionConfig;

const SQL_PATTERNS: &[&str] = &[
    "union select",
    "drop table",
    "1=1",
    "or 1=1",
    "--",
    "xp_cmdshell",
];

const XSS_PATTERNS: &[&str] = &["<script", "javascript:", "onerror=", "onload=", "<iframe"];

const BOT_PATTERNS: &[&str] = &["bot", "crawler", "spider", "scraper", "curl", "wget"];

const SUSPICIOUS_PATHS: &[&str] = &["admin", "wp-admin", ".env", "config", "backup"];

const MIN_USER_AGENT_LEN: usize = 10;

/// Request metadata seen by the inspector.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub method: String,
    /// Request path or absolute URL; only the path component is inspected
    pub path: String,
    pub headers: HeaderMap,
}

impl RequestMeta {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            headers: HeaderMap::new(),
        }
    }

    /// Capture method, path and headers from an HTTP request.
    pub fn from_request<B>(request: &Request<B>) -> Self {
        Self {
            method: request.method().as_str().to_string(),
            path: request.uri().path().to_string(),
            headers: request.headers().clone(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    fn pathname(&self) -> Cow<'_, str> {
        match self.path.parse::<Uri>() {
            Ok(uri) => Cow::Owned(uri.path().to_string()),
            Err(_) => {
                let end = self.path.find(['?', '#']).unwrap_or(self.path.len());
                Cow::Borrowed(&self.path[..end])
            }
        }
    }

    /// User-Agent value; bytes outside UTF-8 are replaced rather than dropped.
    fn user_agent(&self) -> Cow<'_, str> {
        self.headers
            .get(USER_AGENT)
            .map(|v| String::from_utf8_lossy(v.as_bytes()))
            .unwrap_or(Cow::Borrowed(""))
    }
}

/// Family of a matched signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternKind {
    SqlInjection,
    XssAttempt,
    BotDetected,
    MissingUserAgent,
    SuspiciousUrl,
    ExcessivePayloadSize,
}

impl PatternKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::SqlInjection => "SQL_INJECTION",
            PatternKind::XssAttempt => "XSS_ATTEMPT",
            PatternKind::BotDetected => "BOT_DETECTED",
            PatternKind::MissingUserAgent => "MISSING_USER_AGENT",
            PatternKind::SuspiciousUrl => "SUSPICIOUS_URL",
            PatternKind::ExcessivePayloadSize => "EXCESSIVE_PAYLOAD_SIZE",
        }
    }

    /// Critical kinds block the client immediately.
    pub fn is_critical(&self) -> bool {
        matches!(self, PatternKind::SqlInjection | PatternKind::XssAttempt)
    }
}

/// One matched signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternMatch {
    pub kind: PatternKind,
    /// The substring that matched, for body signatures
    pub signature: Option<&'static str>,
}

impl PatternMatch {
    fn new(kind: PatternKind) -> Self {
        Self {
            kind,
            signature: None,
        }
    }

    fn with_signature(kind: PatternKind, signature: &'static str) -> Self {
        Self {
            kind,
            signature: Some(signature),
        }
    }
}

impl fmt::Display for PatternMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.signature {
            Some(signature) => write!(f, "{}: {}", self.kind.as_str(), signature),
            None => f.write_str(self.kind.as_str()),
        }
    }
}

/// Outcome of inspecting one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InspectionResult {
    pub suspicious: bool,
    pub blocked: bool,
    /// Labels of every matched signature, in check order
    pub patterns: Vec<String>,
}

/// Scans request metadata and payload for injection, XSS and bot signatures.
#[derive(Debug, Clone)]
pub struct Inspector {
    max_payload_bytes: usize,
    admin_prefix: String,
}

impl Default for Inspector {
    fn default() -> Self {
        Self::new(&InspectionConfig::default())
    }
}

impl Inspector {
    pub fn new(config: &InspectionConfig) -> Self {
        Self {
            max_payload_bytes: config.max_payload_bytes,
            admin_prefix: config.admin_prefix.clone(),
        }
    }

    /// Run every check and collect all matches; nothing short-circuits.
    pub fn scan(&self, request: &RequestMeta, body: Option<&Value>) -> Vec<PatternMatch> {
        let mut matches = Vec::new();

        // A JSON null counts as no body
        let serialized = body.filter(|b| !b.is_null()).map(Value::to_string);

        if let Some(ref serialized) = serialized {
            let lowered = serialized.to_lowercase();
            scan_substrings(&lowered, SQL_PATTERNS, PatternKind::SqlInjection, &mut matches);
            scan_substrings(&lowered, XSS_PATTERNS, PatternKind::XssAttempt, &mut matches);
        }

        let user_agent = request.user_agent();
        let lowered_agent = user_agent.to_lowercase();
        if BOT_PATTERNS.iter().any(|p| lowered_agent.contains(p)) {
            matches.push(PatternMatch::new(PatternKind::BotDetected));
        }

        if user_agent.chars().count() < MIN_USER_AGENT_LEN {
            matches.push(PatternMatch::new(PatternKind::MissingUserAgent));
        }

        let path = request.pathname();
        if SUSPICIOUS_PATHS.iter().any(|p| path.contains(p))
            && !path.starts_with(self.admin_prefix.as_str())
        {
            matches.push(PatternMatch::new(PatternKind::SuspiciousUrl));
        }

        if let Some(ref serialized) = serialized {
            if serialized.len() > self.max_payload_bytes {
                matches.push(PatternMatch::new(PatternKind::ExcessivePayloadSize));
            }
        }

        matches
    }
}

fn scan_substrings(
    haystack: &str,
    patterns: &[&'static str],
    kind: PatternKind,
    matches: &mut Vec<PatternMatch>,
) {
    for &pattern in patterns {
        if haystack.contains(pattern) {
            matches.push(PatternMatch::with_signature(kind, pattern));
        }
    }
}
