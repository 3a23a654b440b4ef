//! Top-level wiring for the herald campaign delivery engine.
//!
//! This crate loads configuration, initialises tracing, and assembles the
//! stores, durable queue, worker pool, control plane, and health monitor
//! into one service. The send transport stays injectable: deployments
//! embed [`Herald`] with their provider client, while the bundled binary
//! runs with a dry-run transport for local use.

pub mod config;
pub mod service;

pub use config::{ConfigError, HeraldConfig, QueueBackend, QueueConfig};
pub use service::{DryRunTransport, Herald, ServiceError};
