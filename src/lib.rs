//! Ratewarden - In-process Sliding-Window Rate Limiting
//!
//! This crate implements a memory-bounded, sliding-window rate limiter that
//! sits in front of HTTP handlers as admission middleware. Partitions are
//! keyed by rule and caller identity, held in a concurrent map with
//! per-partition locking, and evicted by a background sweeper once idle.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
