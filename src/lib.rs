//! quotad
//!
//! Layered quota resolution and atomic usage tracking. A request for a
//! (subject, feature) pair resolves to exactly one effective limit drawn
//! from user overrides, subscription plans, global guest defaults or the
//! system default, and consumption is enforced against calendar windows
//! that reset lazily.

pub mod admin_server;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod quota;
