//! Logging: process logger configuration and access-log emission.

pub mod access;
pub mod logger;
