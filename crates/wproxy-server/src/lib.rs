//! # wproxy-server
//!
//! Axum HTTP server that upgrades clients on one route and relays each one
//! to the configured target through [`wproxy::ProxyServer`].

#![deny(unsafe_code)]

pub mod health;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod shutdown;

pub use server::{AppState, WproxyServer};
pub use shutdown::ShutdownCoordinator;
