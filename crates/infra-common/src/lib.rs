//! # Infrastructure Common
//!
//! Ambient building blocks shared by the B2B media server crates:
//!
//! - [`errors`]: the infrastructure error type
//! - [`logging`]: `tracing` subscriber setup
//! - [`config`]: layered configuration loading (file + environment)

pub mod config;
pub mod errors;
pub mod logging;

pub use errors::{Error, Result};
