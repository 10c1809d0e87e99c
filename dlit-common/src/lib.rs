//! # DLIT Common Library
//!
//! Shared code for the D-Log land-use tooling:
//! - Error type shared by every crate
//! - TOML configuration model and config file resolution
//! - GFA infill method selection
//! - Tracing subscriber initialisation

pub mod config;
pub mod error;
pub mod logging;

pub use config::{InfillMethod, TomlConfig};
pub use error::{Error, Result};
