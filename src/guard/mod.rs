//! Rate limiting, blocklisting and suspicious request detection.

mod activity;
mod blocklist;
mod class;
mod counter;
mod identity;
mod inspect;
mod limiter;

pub use activity::{ActivityKind, ActivityLog, ActivityRecord, DEFAULT_TAIL};
pub use blocklist::{BlockedIp, Blocklist};
pub use class::{LimitClass, LimitRule};
pub use counter::{CounterKey, WindowCounter};
pub use identity::{resolve_client_key, UNKNOWN_CLIENT};
pub use inspect::{InspectionResult, Inspector, PatternKind, PatternMatch, RequestMeta};
pub use limiter::{AbuseGuard, Decision, DenyReason, DEFAULT_BLOCK_REASON};
