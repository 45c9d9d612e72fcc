//! Abuse Guard - in-process rate limiting and abuse detection
//!
//! This crate guards a web application's request handlers with fixed-window
//! rate limits per traffic class, an IP blocklist with automatic expiry, a
//! bounded audit log of suspicious activity, and a request inspector that
//! flags injection, XSS and bot signatures. It can be embedded as axum
//! middleware or run as a sidecar HTTP service.

pub mod clock;
pub mod config;
pub mod error;
pub mod guard;
pub mod http;
