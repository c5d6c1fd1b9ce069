//! Command-line argument parsing for the Lumen client.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Lumen client command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "lumen", about = "Lumen world client")]
pub struct CliArgs {
    /// Server address.
    #[arg(long)]
    pub server: Option<String>,

    /// Server port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Session token handed out by the login service.
    #[arg(long, env = "LUMEN_TOKEN", default_value = "")]
    pub token: String,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Stop after this many frames (runs until disconnect when absent).
    #[arg(long)]
    pub frames: Option<u64>,

    /// Frame loop rate in Hz.
    #[arg(long, default_value_t = 60)]
    pub frame_rate: u32,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref addr) = args.server {
            self.network.server_address = addr.clone();
        }
        if let Some(port) = args.port {
            self.network.server_port = port;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            server: Some("192.168.1.1".to_string()),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.network.server_address, "192.168.1.1");
        assert_eq!(config.debug.log_level, "debug");
        // Non-overridden fields retain defaults
        assert_eq!(config.network.server_port, 8080);
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_cli_parses_flags() {
        let args = CliArgs::try_parse_from([
            "lumen", "--server", "example.org", "--port", "9001", "--token", "abc", "--frames",
            "10",
        ])
        .unwrap();
        assert_eq!(args.server.as_deref(), Some("example.org"));
        assert_eq!(args.port, Some(9001));
        assert_eq!(args.token, "abc");
        assert_eq!(args.frames, Some(10));
        assert_eq!(args.frame_rate, 60);
    }
}
