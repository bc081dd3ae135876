//! Ratewire - fixed-window rate limiting backed by a remote counter store
//!
//! This crate decides whether a client may proceed by keeping one counter
//! per client identity in a Redis-compatible store. It talks to the store
//! through a small hand-written client for the store's line protocol and
//! opens a fresh connection for every decision.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod wire;
