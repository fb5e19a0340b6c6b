//! HTTP request handlers.

pub mod bridge;
pub mod health;

pub use bridge::{bridge_request, reply_response};
pub use health::{Readiness, health_check, readiness};
