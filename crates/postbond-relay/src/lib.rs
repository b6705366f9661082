//! postbond relay — HTTP surface for the bonded-message escrow engine.
//!
//! The relay accepts sender intake, places provider holds, ingests provider
//! webhooks, serves the receiver's signed accept/release links, and exposes
//! the expiry sweep trigger. All escrow semantics live in the core
//! [`postbond`] crate; this crate provides the HTTP server, configuration,
//! and metrics.
//!
//! # Modules
//!
//! - [`routes`] — HTTP endpoints (intake, hold, actions, webhook, sweep, health, metrics)
//! - [`state`] — Shared [`AppState`](state::AppState) wiring engine, ingestor, and signer
//! - [`config`] — Environment configuration read once at startup
//! - [`metrics`] — Prometheus metrics for actions, webhooks, and sweeps

pub mod config;
pub mod metrics;
pub mod routes;
pub mod state;
