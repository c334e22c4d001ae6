//! Shared utilities for stock-analyzer
//!
//! This crate provides the ambient pieces used across the workspace:
//! logging setup and the file/environment configuration model.

pub mod config;
pub mod logging;

pub use config::{Config, ConfigError, LogFormat};
pub use logging::{init_tracing, init_tracing_with};
