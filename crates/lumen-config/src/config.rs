//! Configuration structs with sensible defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const APP_NAME: &str = "lumen";

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Connection and heartbeat settings.
    pub network: NetworkConfig,
    /// Entity movement smoothing settings.
    pub movement: MovementConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Game server host name or address.
    pub server_address: String,
    /// Game server port.
    pub server_port: u16,
    /// Version string sent in the authentication message.
    pub client_version: String,
    /// Interval between heartbeat pings while connected.
    pub ping_interval_ms: u64,
    /// Upper bound on the TCP connect call.
    pub connect_timeout_ms: u64,
    /// Largest accepted frame payload in bytes.
    pub max_frame_size: u32,
}

/// Movement synchronizer tuning.
///
/// Distances are in world coordinate units, times in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MovementConfig {
    /// Keyframes retained per entity.
    pub max_keyframes: usize,
    /// How far past the newest keyframe velocity is trusted.
    pub max_extrapolation_ms: f64,
    /// Render/target error above which the render position snaps.
    pub snap_distance: f64,
    /// Fraction of the remaining error closed each frame.
    pub correction_factor: f64,
    /// Velocity multiplier per 100 ms beyond `max_extrapolation_ms`.
    pub velocity_decay: f64,
    /// Keyframe history kept behind the render time.
    pub history_ms: f64,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
    /// Number of recently dispatched messages to remember (0 disables).
    pub dispatch_history: usize,
}

// --- Default implementations ---

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1".to_string(),
            server_port: 8080,
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            ping_interval_ms: 5_000,
            connect_timeout_ms: 10_000,
            max_frame_size: 1_048_576,
        }
    }
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            max_keyframes: 32,
            max_extrapolation_ms: 180.0,
            snap_distance: 2400.0,
            correction_factor: 0.15,
            velocity_decay: 0.9,
            history_ms: 500.0,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            dispatch_history: 0,
        }
    }
}

impl NetworkConfig {
    /// `host:port` string suitable for `TcpStream::connect`.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.server_address, self.server_port)
    }
}

/// The platform configuration directory for the client, e.g.
/// `~/.config/lumen` on Linux.
pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|base| base.join(APP_NAME))
        .ok_or(ConfigError::NoConfigDir)
}

// --- Load / Save / Reload ---

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("config.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("config.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(2)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }

    /// Hot-reload: returns `Some(new_config)` if the file changed, `None` otherwise.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config_path = config_dir.join("config.ron");
        let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
        let new_config: Config = ron::from_str(&contents).map_err(ConfigError::ParseError)?;

        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }
}
