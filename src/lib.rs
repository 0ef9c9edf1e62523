//! Gatewarden - supervisor and authenticating front door for a local gateway
//!
//! This library provides a single-tenant reverse proxy that:
//! - Launches one gateway child process and supervises it without restarting it
//! - Waits for the gateway to answer on any of several candidate health paths
//! - Injects the gateway's bearer token into every proxied request, WebSocket
//!   upgrades included, so clients never hold the credential
//! - Deflects traffic to a setup surface until the gateway has been configured
//! - Generates and persists the gateway token with owner-only permissions

pub mod config;
pub mod error;
pub mod pool;
pub mod probe;
pub mod proxy;
pub mod setup;
pub mod state;
pub mod supervisor;
pub mod token;

pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
