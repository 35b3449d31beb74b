// src/utils/mod.rs
//! Shared configuration, errors and status helpers

pub mod config;
pub mod errors;
pub mod status;

pub use config::EngineConfig;
pub use errors::{EngineError, ErrorKind, Result};
