//! Core abuse guard: rate limiting, blocklisting and inspection.

use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use super::activity::{ActivityKind, ActivityLog, ActivityRecord};
use super::blocklist::{BlockedIp, Blocklist};
use super::class::LimitClass;
use super::counter::{ceil_secs, CounterKey, WindowCounter};
use super::identity::resolve_client_key;
use super::inspect::{InspectionResult, Inspector, RequestMeta};
use crate::clock::{Clock, SystemClock};
use crate::config::GuardConfig;

/// Reason attached to a manual block when the caller gives none.
pub const DEFAULT_BLOCK_REASON: &str = "Suspicious activity";

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// The client key is on the blocklist
    Blocked,
    /// The class limit for the current window was exceeded
    RateLimited,
}

/// Outcome of a limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Allowed {
        remaining: u64,
        window_reset_at: DateTime<Utc>,
    },
    Denied {
        reason: DenyReason,
        retry_after_secs: u64,
    },
}

impl Decision {
    /// True for [`Decision::Allowed`].
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// The abuse guard.
///
/// Construct one per process and share it as `Arc<AbuseGuard>`. Counter
/// updates hold the counter's map entry for the whole
/// check/increment/escalate sequence; locks are always taken in the order
/// counter entry, blocklist, activity log.
pub struct AbuseGuard {
    config: GuardConfig,
    inspector: Inspector,
    clock: Arc<dyn Clock>,
    counters: DashMap<CounterKey, WindowCounter>,
    blocklist: Mutex<Blocklist>,
    activity: Mutex<ActivityLog>,
}

impl AbuseGuard {
    /// Create a guard reading wall clock time.
    pub fn new(config: GuardConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a guard with an explicit time source.
    pub fn with_clock(config: GuardConfig, clock: Arc<dyn Clock>) -> Self {
        let inspector = Inspector::new(&config.inspection);
        let activity = ActivityLog::new(config.activity_log.capacity);
        Self {
            config,
            inspector,
            clock,
            counters: DashMap::new(),
            blocklist: Mutex::new(Blocklist::new()),
            activity: Mutex::new(activity),
        }
    }

    /// Configuration this guard was built with.
    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Check and count a request from the client identified by `headers`.
    pub fn check_limit(&self, class: LimitClass, headers: &HeaderMap) -> Decision {
        let client = resolve_client_key(headers);
        self.check(class, &client)
    }

    /// Check and count a request from `client` under `class`.
    pub fn check(&self, class: LimitClass, client: &str) -> Decision {
        let now = self.clock.now();
        let rule = self.config.limits.rule(class);
        let key = CounterKey::new(class, client);

        trace!(key = %key, "Checking rate limit");

        let entry = self.counters.entry(key);

        if let Some(blocked_until) = self.blocked_until(client, now) {
            debug!(class = %class, client = %client, "Rejecting blocked client");
            return Decision::Denied {
                reason: DenyReason::Blocked,
                retry_after_secs: ceil_secs(blocked_until - now),
            };
        }

        let mut counter = entry.or_insert_with(|| WindowCounter::new(now, rule.window()));
        let count = counter.hit(now, rule);

        if count <= rule.max_requests {
            return Decision::Allowed {
                remaining: rule.max_requests - count,
                window_reset_at: counter.window_reset_at(),
            };
        }

        debug!(
            class = %class,
            client = %client,
            count = count,
            max = rule.max_requests,
            "Rate limit exceeded"
        );

        self.record(
            client,
            ActivityKind::RateLimitExceeded,
            format!("{}: {} requests", class, count),
            now,
        );

        if count - rule.max_requests > self.config.blocking.escalation_threshold {
            self.block_at(
                client,
                &format!("Excessive {} requests: {}", class, count),
                now,
            );
        }

        Decision::Denied {
            reason: DenyReason::RateLimited,
            retry_after_secs: counter.retry_after_secs(now),
        }
    }

    /// Inspect a request for suspicious patterns, logging matches and
    /// blocking the client on SQL injection or XSS signatures.
    pub fn inspect(&self, request: &RequestMeta, body: Option<&Value>) -> InspectionResult {
        let matches = self.inspector.scan(request, body);
        if matches.is_empty() {
            return InspectionResult::default();
        }

        let now = self.clock.now();
        let ip = resolve_client_key(&request.headers);
        let patterns: Vec<String> = matches.iter().map(ToString::to_string).collect();

        warn!(
            ip = %ip,
            method = %request.method,
            path = %request.path,
            patterns = ?patterns,
            "Suspicious request patterns detected"
        );
        self.record(&ip, ActivityKind::SuspiciousPatterns, patterns.join(", "), now);

        let critical: Vec<String> = matches
            .iter()
            .filter(|m| m.kind.is_critical())
            .map(ToString::to_string)
            .collect();

        let blocked = !critical.is_empty();
        if blocked {
            self.block_at(&ip, &critical.join(", "), now);
        }

        InspectionResult {
            suspicious: true,
            blocked,
            patterns,
        }
    }

    /// Block `ip` for the configured duration.
    pub fn block(&self, ip: &str, reason: &str) -> BlockedIp {
        self.block_at(ip, reason, self.clock.now())
    }

    /// Remove `ip` from the blocklist. Returns whether it was blocked.
    pub fn unblock(&self, ip: &str) -> bool {
        let removed = self.blocklist.lock().unblock(ip);
        if removed {
            info!(ip = %ip, "IP unblocked");
        }
        removed
    }

    /// Whether `ip` is on the blocklist and its block has not expired.
    pub fn is_blocked(&self, ip: &str) -> bool {
        self.blocklist.lock().is_blocked(ip, self.clock.now())
    }

    /// Currently blocked IPs, sorted.
    pub fn blocked_ips(&self) -> Vec<String> {
        self.blocked_entries().into_iter().map(|b| b.ip).collect()
    }

    /// Currently blocked IPs with reason and expiry, sorted by IP.
    pub fn blocked_entries(&self) -> Vec<BlockedIp> {
        self.blocklist.lock().list(self.clock.now())
    }

    /// Drop the counters for `ip`, for one class or all of them.
    /// Returns the number of counters removed.
    pub fn clear_limit(&self, ip: &str, class: Option<LimitClass>) -> usize {
        let removed = match class {
            Some(class) => usize::from(self.counters.remove(&CounterKey::new(class, ip)).is_some()),
            None => {
                let before = self.counters.len();
                self.counters.retain(|key, _| key.client != ip);
                before.saturating_sub(self.counters.len())
            }
        };

        info!(
            ip = %ip,
            class = class.map(|c| c.as_str()).unwrap_or("all"),
            removed = removed,
            "Cleared rate limit counters"
        );
        removed
    }

    /// The most recent `limit` activity records, oldest first.
    pub fn tail_activity(&self, limit: usize) -> Vec<ActivityRecord> {
        self.activity.lock().tail(limit)
    }

    /// Number of live counters.
    pub fn counter_count(&self) -> usize {
        self.counters.len()
    }

    /// Requests counted in the current window for a client, if tracked.
    pub fn counter_value(&self, class: LimitClass, client: &str) -> Option<u64> {
        self.counters
            .get(&CounterKey::new(class, client))
            .map(|c| c.count())
    }

    fn blocked_until(&self, ip: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.blocklist.lock().get(ip, now).map(|b| b.blocked_until)
    }

    fn block_duration(&self) -> Duration {
        let secs = i64::try_from(self.config.blocking.block_duration_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs.min(i64::MAX / 1000))
    }

    fn block_at(&self, ip: &str, reason: &str, now: DateTime<Utc>) -> BlockedIp {
        let entry = self
            .blocklist
            .lock()
            .block(ip, reason, now, self.block_duration())
            .clone();

        warn!(
            ip = %ip,
            reason = %reason,
            blocked_until = %entry.blocked_until,
            "IP blocked"
        );
        self.record(ip, ActivityKind::IpBlocked, reason.to_string(), now);
        entry
    }

    fn record(&self, ip: &str, kind: ActivityKind, details: String, now: DateTime<Utc>) {
        warn!(ip = %ip, kind = %kind, details = %details, "Suspicious activity recorded");
        self.activity.lock().record(ActivityRecord {
            ip: ip.to_string(),
            kind,
            details,
            timestamp: now,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use axum::http::HeaderValue;

    fn guard() -> (AbuseGuard, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            DateTime::<Utc>::UNIX_EPOCH + Duration::days(100),
        ));
        let guard = AbuseGuard::with_clock(GuardConfig::default(), clock.clone());
        (guard, clock)
    }

    #[test]
    fn test_first_request_creates_counter() {
        let (guard, _clock) = guard();

        let decision = guard.check(LimitClass::Api, "10.0.0.1");

        assert!(decision.is_allowed());
        assert_eq!(guard.counter_count(), 1);
        assert_eq!(guard.counter_value(LimitClass::Api, "10.0.0.1"), Some(1));
    }

    #[test]
    fn test_remaining_counts_down() {
        let (guard, clock) = guard();
        let now = clock.now();

        for expected in [2, 1, 0] {
            let decision = guard.check(LimitClass::Forms, "10.0.0.1");
            assert_eq!(
                decision,
                Decision::Allowed {
                    remaining: expected,
                    window_reset_at: now + Duration::seconds(60),
                }
            );
        }
    }

    #[test]
    fn test_over_limit_denied_with_retry_after() {
        let (guard, clock) = guard();

        for _ in 0..3 {
            assert!(guard.check(LimitClass::Forms, "10.0.0.1").is_allowed());
        }

        clock.advance(Duration::milliseconds(20_500));
        let decision = guard.check(LimitClass::Forms, "10.0.0.1");
        assert_eq!(
            decision,
            Decision::Denied {
                reason: DenyReason::RateLimited,
                retry_after_secs: 40,
            }
        );

        let log = guard.tail_activity(10);
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].kind, ActivityKind::RateLimitExceeded);
        assert_eq!(log[0].details, "forms: 4 requests");
    }

    #[test]
    fn test_classes_and_clients_are_separate() {
        let (guard, _clock) = guard();

        for _ in 0..3 {
            guard.check(LimitClass::Forms, "10.0.0.1");
        }

        assert!(!guard.check(LimitClass::Forms, "10.0.0.1").is_allowed());
        assert!(guard.check(LimitClass::Forms, "10.0.0.2").is_allowed());
        assert!(guard.check(LimitClass::Search, "10.0.0.1").is_allowed());
    }

    #[test]
    fn test_escalation_blocks_after_threshold() {
        let (guard, _clock) = guard();
        let ip = "10.0.0.66";

        // 3 allowed, then 20 rate limited without a block
        for _ in 0..23 {
            guard.check(LimitClass::Forms, ip);
        }
        assert!(!guard.is_blocked(ip));

        // 21st request over the limit escalates
        let decision = guard.check(LimitClass::Forms, ip);
        assert!(matches!(
            decision,
            Decision::Denied {
                reason: DenyReason::RateLimited,
                ..
            }
        ));
        assert!(guard.is_blocked(ip));

        let kinds: Vec<ActivityKind> = guard.tail_activity(2).iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![ActivityKind::RateLimitExceeded, ActivityKind::IpBlocked]
        );
        assert_eq!(guard.tail_activity(1)[0].details, "Excessive forms requests: 24");

        // Counting stops once blocked
        let decision = guard.check(LimitClass::Forms, ip);
        assert!(matches!(
            decision,
            Decision::Denied {
                reason: DenyReason::Blocked,
                retry_after_secs: 86_400,
            }
        ));
        assert_eq!(guard.counter_value(LimitClass::Forms, ip), Some(24));
    }

    #[test]
    fn test_blocked_client_does_not_create_counters() {
        let (guard, _clock) = guard();
        guard.block("10.0.0.7", "manual");

        let decision = guard.check(LimitClass::Search, "10.0.0.7");
        assert!(!decision.is_allowed());
        assert_eq!(guard.counter_count(), 0);
    }

    #[test]
    fn test_check_limit_resolves_client_from_headers() {
        let (guard, _clock) = guard();
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.4"));

        guard.check_limit(LimitClass::Auth, &headers);
        assert_eq!(guard.counter_value(LimitClass::Auth, "198.51.100.4"), Some(1));

        guard.check_limit(LimitClass::Auth, &HeaderMap::new());
        assert_eq!(guard.counter_value(LimitClass::Auth, "unknown"), Some(1));
    }

    #[test]
    fn test_clear_single_class() {
        let (guard, _clock) = guard();
        guard.check(LimitClass::Api, "10.0.0.1");
        guard.check(LimitClass::Search, "10.0.0.1");

        assert_eq!(guard.clear_limit("10.0.0.1", Some(LimitClass::Api)), 1);
        assert_eq!(guard.counter_value(LimitClass::Api, "10.0.0.1"), None);
        assert_eq!(guard.counter_value(LimitClass::Search, "10.0.0.1"), Some(1));
    }

    #[test]
    fn test_clear_all_classes_for_ip() {
        let (guard, _clock) = guard();
        guard.check(LimitClass::Api, "10.0.0.1");
        guard.check(LimitClass::Search, "10.0.0.1");
        guard.check(LimitClass::Api, "10.0.0.10");

        assert_eq!(guard.clear_limit("10.0.0.1", None), 2);
        assert_eq!(guard.counter_count(), 1);
        assert_eq!(guard.counter_value(LimitClass::Api, "10.0.0.10"), Some(1));
    }

    #[test]
    fn test_manual_block_records_activity() {
        let (guard, clock) = guard();

        let entry = guard.block("10.0.0.3", DEFAULT_BLOCK_REASON);
        assert_eq!(entry.blocked_until, clock.now() + Duration::hours(24));

        let log = guard.tail_activity(1);
        assert_eq!(log[0].kind, ActivityKind::IpBlocked);
        assert_eq!(log[0].details, "Suspicious activity");
        assert_eq!(guard.blocked_ips(), vec!["10.0.0.3"]);
    }

    #[test]
    fn test_decision_serialization() {
        let decision = Decision::Denied {
            reason: DenyReason::RateLimited,
            retry_after_secs: 12,
        };
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "decision": "denied",
                "reason": "rate_limited",
                "retry_after_secs": 12
            })
        );
    }
}
