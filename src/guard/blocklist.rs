//! IP blocklist with lazy expiry.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// A single blocklist entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedIp {
    pub ip: String,
    pub reason: String,
    pub blocked_at: DateTime<Utc>,
    pub blocked_until: DateTime<Utc>,
}

/// Set of blocked client keys.
///
/// Each entry stores its own expiry instead of owning a timer. Expired
/// entries are evicted whenever they are looked up or listed, so an unblock
/// can never be undone by a stale expiry.
#[derive(Debug, Default)]
pub struct Blocklist {
    entries: HashMap<String, BlockedIp>,
}

impl Blocklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block `ip` until `now + duration`. Blocking an already blocked IP
    /// replaces its reason and restarts its expiry.
    pub fn block(
        &mut self,
        ip: &str,
        reason: &str,
        now: DateTime<Utc>,
        duration: Duration,
    ) -> &BlockedIp {
        let entry = BlockedIp {
            ip: ip.to_string(),
            reason: reason.to_string(),
            blocked_at: now,
            blocked_until: now
                .checked_add_signed(duration)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        self.entries.insert(ip.to_string(), entry);
        &self.entries[ip]
    }

    /// Remove `ip`. Returns whether it was blocked.
    pub fn unblock(&mut self, ip: &str) -> bool {
        self.entries.remove(ip).is_some()
    }

    /// Look up an active block, evicting it if it has expired.
    pub fn get(&mut self, ip: &str, now: DateTime<Utc>) -> Option<&BlockedIp> {
        let expired = match self.entries.get(ip) {
            Some(entry) => now >= entry.blocked_until,
            None => return None,
        };

        if expired {
            self.entries.remove(ip);
            return None;
        }

        self.entries.get(ip)
    }

    pub fn is_blocked(&mut self, ip: &str, now: DateTime<Utc>) -> bool {
        self.get(ip, now).is_some()
    }

    /// Active blocks, ordered by IP.
    pub fn list(&mut self, now: DateTime<Utc>) -> Vec<BlockedIp> {
        self.evict_expired(now);
        let mut blocked: Vec<BlockedIp> = self.entries.values().cloned().collect();
        blocked.sort_by(|a, b| a.ip.cmp(&b.ip));
        blocked
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_expired(&mut self, now: DateTime<Utc>) {
        self.entries.retain(|_, entry| now < entry.blocked_until);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::days(10)
    }

    #[test]
    fn test_block_and_lookup() {
        let mut blocklist = Blocklist::new();
        let now = start();

        let entry = blocklist.block("10.0.0.1", "testing", now, Duration::hours(24));
        assert_eq!(entry.blocked_until, now + Duration::hours(24));

        assert!(blocklist.is_blocked("10.0.0.1", now));
        assert!(!blocklist.is_blocked("10.0.0.2", now));
    }

    #[test]
    fn test_block_expires_lazily() {
        let mut blocklist = Blocklist::new();
        let now = start();
        blocklist.block("10.0.0.1", "testing", now, Duration::hours(24));

        assert!(blocklist.is_blocked("10.0.0.1", now + Duration::hours(23)));
        // Still stored until something looks at it
        assert_eq!(blocklist.len(), 1);

        assert!(!blocklist.is_blocked("10.0.0.1", now + Duration::hours(24)));
        assert!(blocklist.is_empty());
    }

    #[test]
    fn test_unblock_is_idempotent() {
        let mut blocklist = Blocklist::new();
        let now = start();
        blocklist.block("10.0.0.1", "testing", now, Duration::hours(24));

        assert!(blocklist.unblock("10.0.0.1"));
        assert!(!blocklist.unblock("10.0.0.1"));
        assert!(!blocklist.is_blocked("10.0.0.1", now));
    }

    #[test]
    fn test_reblock_restarts_expiry() {
        let mut blocklist = Blocklist::new();
        let now = start();
        blocklist.block("10.0.0.1", "first", now, Duration::hours(24));

        let later = now + Duration::hours(12);
        blocklist.block("10.0.0.1", "second", later, Duration::hours(24));

        let entry = blocklist.get("10.0.0.1", now + Duration::hours(30)).unwrap();
        assert_eq!(entry.reason, "second");
        assert_eq!(entry.blocked_until, later + Duration::hours(24));
    }

    #[test]
    fn test_list_skips_expired_and_sorts() {
        let mut blocklist = Blocklist::new();
        let now = start();
        blocklist.block("10.0.0.9", "b", now, Duration::hours(24));
        blocklist.block("10.0.0.1", "a", now, Duration::hours(24));
        blocklist.block("10.0.0.5", "short", now, Duration::hours(1));

        let ips: Vec<String> = blocklist
            .list(now + Duration::hours(2))
            .into_iter()
            .map(|b| b.ip)
            .collect();
        assert_eq!(ips, vec!["10.0.0.1", "10.0.0.9"]);
    }
}
