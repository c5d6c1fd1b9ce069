use lumen_config::ConfigError;
use lumen_net::{ConnectionFault, NetError};

/// Errors that end a client run.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Loading or creating the config failed.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Connecting failed.
    #[error("network error: {0}")]
    Net(#[from] NetError),

    /// The async runtime could not be built.
    #[error("runtime error: {0}")]
    Io(#[from] std::io::Error),

    /// The server session ended with a fault.
    #[error("session ended: {0}")]
    Session(ConnectionFault),
}
