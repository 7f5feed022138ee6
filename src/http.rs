//! Upstream HTTP exchange and response envelope handling.

pub mod client;
pub mod envelope;
