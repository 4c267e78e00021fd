//! This crate contains the plumbing shared by feedpush agents: settings
//! loading, tracing, metrics and their HTTP server, the on-chain feed state
//! cache, the upstream report store and the uptime webhook.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Settings and configuration loading
pub mod settings;

mod agent;
pub use agent::*;

mod cache;
pub use cache::*;

mod metrics;
pub use metrics::*;

mod server;
pub use server::*;

/// Upstream price source clients
pub mod source;

mod uptime;
pub use uptime::*;
