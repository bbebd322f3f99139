//! HTTP front end for the `phone_auth` core.
//!
//! The binary in `main.rs` wires configuration, storage, and the rate limiter
//! together; this library exposes the pieces so they can be tested in
//! process.

pub mod api;
pub mod config;
pub mod logging;
pub mod maintenance;
pub mod metrics;
