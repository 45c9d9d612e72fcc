//! Limit classes and their window/threshold rules.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::GuardError;

/// Kind of traffic being limited. Each class has its own window and threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitClass {
    /// Generic API traffic
    Api,
    /// Authentication attempts
    Auth,
    /// Form submissions
    Forms,
    /// Search queries
    Search,
}

impl LimitClass {
    /// Identifier used in counter keys, config and log details.
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitClass::Api => "api",
            LimitClass::Auth => "auth",
            LimitClass::Forms => "forms",
            LimitClass::Search => "search",
        }
    }

    /// Every class, in declaration order.
    pub fn all() -> &'static [LimitClass] {
        &[
            LimitClass::Api,
            LimitClass::Auth,
            LimitClass::Forms,
            LimitClass::Search,
        ]
    }
}

impl fmt::Display for LimitClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LimitClass {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api" => Ok(LimitClass::Api),
            "auth" => Ok(LimitClass::Auth),
            "forms" => Ok(LimitClass::Forms),
            "search" => Ok(LimitClass::Search),
            other => Err(GuardError::InvalidLimitClass(other.to_string())),
        }
    }
}

/// A fixed window and the number of requests allowed within it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitRule {
    /// Window length in seconds
    pub window_secs: u64,
    /// Requests allowed per window
    pub max_requests: u64,
}

impl LimitRule {
    /// Rule allowing `max_requests` per `window_secs`.
    pub fn new(window_secs: u64, max_requests: u64) -> Self {
        Self {
            window_secs,
            max_requests,
        }
    }

    /// Window length as a duration.
    pub fn window(&self) -> Duration {
        let secs = i64::try_from(self.window_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs.min(i64::MAX / 1000))
    }
}
