//! Turnstile - Per-Client Admission Gate
//!
//! This crate decides, per originating client, whether an HTTP request may
//! proceed or must be rejected because the client is sending too fast. Each
//! client gets a token bucket held in an in-memory registry; a background
//! janitor evicts clients that have gone idle.

pub mod config;
pub mod error;
pub mod gate;
pub mod http;
pub mod ratelimit;
