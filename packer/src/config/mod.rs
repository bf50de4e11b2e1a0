//! Configuration management for the packer: the optional TOML config file and its merge with CLI flags.
//!
//! This module provides a unified interface to all configuration-related functionality,
//! including data types, loading utilities, and settings resolution.

mod loader;
mod settings;
mod types;

pub use loader::*;
pub use settings::*;
pub use types::*;
