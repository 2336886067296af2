//! Error types shared by the media server crates

pub mod types;

pub use types::{Error, Result};
