//! # feedwire-breaker
//!
//! Guards calls to unreliable upstream operations.
//!
//! A [`CircuitBreaker`] runs an [`Operation`] under a per-call timeout and
//! tracks outcomes in a [`RollingWindow`]. When the error rate crosses the
//! configured threshold the breaker opens and rejects calls (optionally
//! serving a fallback) until `reset_timeout` has passed, then lets exactly one
//! probe through.
//!
//! The [`BreakerRegistry`] owns the named breakers of a process, fans their
//! [`BreakerEvent`]s into one channel and reports aggregated [`Health`].

#![deny(unsafe_code)]

pub mod breaker;
pub mod config;
pub mod errors;
pub mod events;
pub mod registry;
pub mod window;

pub use breaker::{BreakerHandle, BreakerState, BreakerStats, CircuitBreaker, Operation};
pub use config::BreakerConfig;
pub use errors::{BreakerError, Result};
pub use events::{BreakerEvent, BreakerEventKind};
pub use registry::{BreakerRegistry, Health, HealthReport};
pub use window::{RollingWindow, WindowCounts};
