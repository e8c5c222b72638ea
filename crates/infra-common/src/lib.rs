//! Common infrastructure for the CCCP real-time services
//!
//! This crate holds the pieces every CCCP binary needs before it can do any
//! real work:
//!
//! - [`logging`]: `tracing-subscriber` initialisation from a serde-friendly
//!   [`logging::LoggingConfig`]
//! - [`config`]: layered configuration loading (TOML file + environment)
//! - [`errors`]: the shared [`Error`] type and error context helpers

pub mod config;
pub mod errors;
pub mod logging;

pub use errors::types::{Error, Result};
