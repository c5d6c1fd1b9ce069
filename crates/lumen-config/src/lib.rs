//! Configuration for the Lumen world client.
//!
//! Settings persist to disk as `config.ron`. Missing sections and fields fall
//! back to defaults, unknown fields are ignored, and CLI flags override
//! whatever was loaded.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{Config, DebugConfig, MovementConfig, NetworkConfig, default_config_dir};
pub use error::ConfigError;
