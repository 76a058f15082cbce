//! # feedwire-server
//!
//! Axum HTTP + `WebSocket` front end for the feedwire hub.
//!
//! - `WebSocket` gateway: connection cap, heartbeat, subscription protocol
//! - HTTP endpoints: `/health`, `/stats`, `/metrics`
//! - Upstream feed pollers guarded by circuit breakers
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod feed;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::{Result, ServerError};
pub use feed::{FeedPoller, PollOutcome, build_pollers, http_client};
pub use server::FeedwireServer;
pub use shutdown::ShutdownCoordinator;
