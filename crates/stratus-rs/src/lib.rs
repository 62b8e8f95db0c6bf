//! # Stratus Gateway Core
//!
//! The request-processing core of a multi-tenant HTTP API gateway built
//! with Rust and Actix Web: a layered handler pipeline with early-abort
//! semantics, a four-algorithm rate-limiting engine, health-aware load
//! balancing over dynamically registered upstream services, and atomic
//! hot reload of the whole pipeline.
//!
//! ## Request Flow
//!
//! ```text
//! Client → Context → Engine → [Security → CORS → Auth → Rate Limit
//!        → Router (→ route sub-chain) → Proxy (→ LB → upstream)]
//!        → Response → async AccessLog
//! ```
//!
//! Every request runs against one immutable pipeline *generation*; reload
//! builds a replacement generation off to the side and swaps it in with a
//! single atomic store, so in-flight requests always finish on the
//! pipeline they started with.
//!
//! ## Quick Start
//!
//! ```no_run
//! use stratus_rs::config::settings::load_settings;
//! use stratus_rs::server::Gateway;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = load_settings()?;
//!     let gateway = Gateway::new(settings)?;
//!     gateway.start().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`config`] - Snapshot loading, validation, hot reload
//! - [`models`] - Configuration and domain types, error taxonomy
//! - [`pipeline`] - Per-request context, handler chain, generations
//! - [`middleware`] - Admission stages and the router
//! - [`services`] - Registry, health checking, balancing, proxying
//! - [`logs`] - Logger setup and access-record emission
//! - [`server`] - Listener lifecycle and in-process management surface
//! - [`utils`] - Route matching and path rewriting helpers
//!
//! ## Environment Variables
//!
//! - `STRATUS_CONFIG_PATH`: configuration file path (default: `./config.json`)
//! - `RUST_LOG`: log filter (default: `info`)
//! - `NO_COLOR`: disable colored log output

pub mod config;
pub mod logs;
pub mod middleware;
pub mod models;
pub mod pipeline;
pub mod server;
pub mod services;
pub mod utils;
