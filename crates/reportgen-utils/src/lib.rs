//! Shared utilities for reportgen
//!
//! This crate provides common functionality used across the reportgen workspace:
//! tracing initialisation and typed environment-variable lookup used by the
//! configuration layers of the other crates.

pub mod env;
pub mod logging;

pub use env::{EnvError, env_flag, env_opt, env_or};
pub use logging::{LogFormat, init_tracing, init_tracing_with};
