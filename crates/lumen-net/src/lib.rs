//! Networking for the Lumen client: framing, message codec, connection
//! lifecycle, message dispatch and connection diagnostics.

pub mod connection;
pub mod diagnostics;
pub mod dispatch;
pub mod framing;
pub mod messages;

pub use connection::{
    ConnectionConfig, ConnectionEvent, ConnectionFault, ConnectionState, ConnectionStateWatch,
    GameConnection, MIN_PING_INTERVAL, NetError, PongSample, unix_time_ms,
};
pub use diagnostics::{DiagnosticsConfig, DiagnosticsTracker, NetworkDiagnostics};
pub use dispatch::{
    DebugEntry, DispatchOutcome, DispatchStats, HandlerError, MessageDispatcher, MessageHandler,
};
pub use framing::{DEFAULT_MAX_PAYLOAD, FrameConfig, FrameError, read_frame, write_frame};
pub use messages::{
    ClientEnvelope, ClientMessage, EntityId, MessageError, MessageKind, PROTOCOL_VERSION,
    ServerEnvelope, ServerMessage, decode_client, decode_server, encode_client, encode_server,
};
