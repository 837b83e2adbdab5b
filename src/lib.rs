//! Turnstile - Per-Identity Admission Control
//!
//! This crate decides, per user identifier, whether each incoming request is
//! admitted. Two independent strategies are provided: a sliding-window
//! limiter that caps admissions within a trailing window, and an interval
//! throttle that enforces a minimum spacing between admissions. Both can be
//! used directly as a library or served over gRPC.

pub mod config;
pub mod error;
pub mod grpc;
pub mod ratelimit;
