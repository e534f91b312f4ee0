//! Adapters binding the ports to concrete infrastructure.

pub mod ai;
pub mod http;
pub mod memory;
pub mod postgres;
pub mod redis;
