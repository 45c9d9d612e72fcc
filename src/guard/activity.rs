//! Bounded suspicious activity audit log.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

/// Default number of records returned by [`ActivityLog::tail`].
pub const DEFAULT_TAIL: usize = 100;

/// What triggered an activity record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityKind {
    RateLimitExceeded,
    IpBlocked,
    SuspiciousPatterns,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ActivityKind::IpBlocked => "IP_BLOCKED",
            ActivityKind::SuspiciousPatterns => "SUSPICIOUS_PATTERNS",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityRecord {
    pub ip: String,
    pub kind: ActivityKind,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only ring buffer keeping the most recent `capacity` records.
#[derive(Debug)]
pub struct ActivityLog {
    records: VecDeque<ActivityRecord>,
    capacity: usize,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append a record, evicting the oldest one when full.
    pub fn record(&mut self, record: ActivityRecord) {
        if self.capacity == 0 {
            return;
        }
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// The most recent `limit` records, oldest first.
    pub fn tail(&self, limit: usize) -> Vec<ActivityRecord> {
        let skip = self.records.len().saturating_sub(limit);
        self.records.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
