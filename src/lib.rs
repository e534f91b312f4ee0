//! Threadline - Resumable streaming chat backend
//!
//! Streams model responses over SSE while persisting them durably: a
//! generation survives client disconnects and can be resumed from any
//! client, and per-user daily quotas are enforced atomically.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
