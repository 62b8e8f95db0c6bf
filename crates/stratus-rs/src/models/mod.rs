//! Data models and domain types for the gateway core.
//!
//! This module contains the configuration snapshot consumed from the
//! external loader, the route and service definitions built from it, and
//! the error taxonomy shared across the pipeline.
//!
//! # Module Organization
//!
//! - [`error`] - Error types with status-code and log-code mapping
//! - [`route`] - Route definitions, match types, retry and header policies
//! - [`service`] - Service definitions, nodes, health-check parameters
//! - [`settings`] - Complete configuration snapshot (`GatewaySettings`)

pub mod error;
pub mod route;
pub mod service;
pub mod settings;
