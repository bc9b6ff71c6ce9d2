//! site-bootstrap library crate.
//!
//! Provisions the blog site's remote singletons (VAPID keypair, settings row)
//! exactly once and writes the local `.env` snapshot. `main.rs` wires these
//! modules to the process environment; tests drive them directly.

pub mod app;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod logger;
pub mod resource;
pub mod snapshot;
pub mod store;
pub mod vapid;
