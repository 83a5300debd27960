//! # execbox-core
//!
//! Core types, configuration, and utilities for execbox.
//!
//! This crate provides shared functionality used across all execbox crates:
//!
//! - **Configuration**: Loading, validation, and persistence of the config file
//! - **Errors**: Configuration error type
//! - **Utilities**: Path resolution, ID generation, and environment handling

pub mod config;
pub mod env;
pub mod error;
pub mod id;
pub mod paths;

// Re-exports for convenience
pub use config::Config;
pub use error::ConfigError;
