//! Network message types and serialization.
//!
//! Every frame carries one envelope: an outbound sequence number plus exactly
//! one payload, selected by a numeric kind. On the wire:
//!
//! ```text
//! [version: u8] [postcard(RawEnvelope { sequence, kind, body })]
//! ```
//!
//! `body` is the postcard encoding of the payload struct for `kind`. Keeping
//! the body length-delimited lets [`decode_server`] skip kinds it does not
//! know instead of failing the whole frame.

use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Current wire-protocol version. Prepended to every serialized message.
pub const PROTOCOL_VERSION: u8 = 1;

/// Server-assigned entity identifier.
pub type EntityId = u64;

// ---------------------------------------------------------------------------
// Shared value types
// ---------------------------------------------------------------------------

/// Position in world coordinates plus facing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    /// X in world coordinate units.
    pub x: f64,
    /// Y in world coordinate units.
    pub y: f64,
    /// Facing, server-defined units.
    pub heading: f64,
}

/// Two-component vector (velocity, size, target).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Vector2 {
    /// X component.
    pub x: f64,
    /// Y component.
    pub y: f64,
}

/// Movement style reported by the server.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MoveMode {
    /// Normal walking.
    #[default]
    Walk,
    /// Running.
    Run,
    /// Sprinting.
    FastRun,
    /// Swimming.
    Swim,
}

/// Full movement state of an entity at one server instant.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EntityMovement {
    /// Authoritative position.
    pub position: Position,
    /// Velocity in coordinate units per second.
    pub velocity: Vector2,
    /// Movement style.
    pub move_mode: MoveMode,
    /// Whether the entity is actively moving.
    pub is_moving: bool,
    /// Where the entity is heading, if it follows a path.
    pub target_position: Option<Vector2>,
}

/// Spawn placement: position plus footprint.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct EntityPosition {
    /// Where the entity stands.
    pub position: Position,
    /// Footprint size.
    pub size: Vector2,
}

/// Terrain chunk grid coordinate.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChunkCoord {
    /// Chunk column.
    pub x: i32,
    /// Chunk row.
    pub y: i32,
}

/// Terrain tiles for one chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkData {
    /// Which chunk this is.
    pub coord: ChunkCoord,
    /// Row-major tile ids.
    pub tiles: Vec<u8>,
    /// Server-side revision of the chunk.
    pub version: u32,
}

// ---------------------------------------------------------------------------
// Client -> server payloads
// ---------------------------------------------------------------------------

/// First message on every connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Auth {
    /// Opaque session token from the login service.
    pub token: String,
    /// Client build version.
    pub client_version: String,
}

/// Heartbeat ping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ping {
    /// Client wall-clock time when the ping was sent.
    pub client_time_ms: i64,
}

// ---------------------------------------------------------------------------
// Server -> client payloads
// ---------------------------------------------------------------------------

/// Outcome of the authentication handshake.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthResult {
    /// Whether the token was accepted.
    pub success: bool,
    /// Reason for rejection; empty on success.
    pub error_message: String,
}

/// Heartbeat pong (response to [`Ping`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pong {
    /// Echoed client send time.
    pub client_time_ms: i64,
    /// Server wall-clock time when the pong was sent.
    pub server_time_ms: i64,
}

/// The player has entered a world session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerEnterWorld {
    /// The player's own entity.
    pub entity_id: EntityId,
    /// Character name.
    pub name: String,
    /// World coordinate units per tile.
    pub coord_per_tile: u32,
    /// Tiles per chunk edge.
    pub chunk_size: u32,
    /// Epoch tagging every movement update of this session.
    pub stream_epoch: u32,
    /// Server simulation ticks per second.
    pub tick_rate: u32,
}

/// The player has left the world session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerLeaveWorld {
    /// The player's entity.
    pub entity_id: EntityId,
}

/// Terrain chunk became visible.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkLoad {
    /// Chunk contents.
    pub chunk: ChunkData,
}

/// Terrain chunk left visibility.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkUnload {
    /// Which chunk to drop.
    pub coord: ChunkCoord,
}

/// An entity became visible.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectSpawn {
    /// New entity.
    pub entity_id: EntityId,
    /// Object type id.
    pub object_type: u32,
    /// Asset path for the renderer.
    pub resource_path: String,
    /// Initial placement.
    pub position: EntityPosition,
}

/// An entity left visibility.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectDespawn {
    /// Removed entity.
    pub entity_id: EntityId,
}

/// Authoritative movement snapshot for one entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectMove {
    /// Moving entity.
    pub entity_id: EntityId,
    /// Server time the snapshot was taken.
    pub server_time_ms: i64,
    /// Per-entity movement sequence.
    pub move_seq: u32,
    /// Session epoch the snapshot belongs to.
    pub stream_epoch: u32,
    /// Deliberate discontinuity; bypasses smoothing.
    pub is_teleport: bool,
    /// Movement state.
    pub movement: EntityMovement,
}

/// Server-side request failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerError {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable description.
    pub message: String,
}

/// Non-fatal server notice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerWarning {
    /// Numeric warning code.
    pub code: u32,
    /// Human-readable description.
    pub message: String,
}

// ---------------------------------------------------------------------------
// Tagged unions
// ---------------------------------------------------------------------------

/// Kind of a server message, used as the routing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum MessageKind {
    /// [`AuthResult`].
    AuthResult = 1,
    /// [`Pong`].
    Pong = 2,
    /// [`PlayerEnterWorld`].
    PlayerEnterWorld = 3,
    /// [`PlayerLeaveWorld`].
    PlayerLeaveWorld = 4,
    /// [`ChunkLoad`].
    ChunkLoad = 5,
    /// [`ChunkUnload`].
    ChunkUnload = 6,
    /// [`ObjectSpawn`].
    ObjectSpawn = 7,
    /// [`ObjectDespawn`].
    ObjectDespawn = 8,
    /// [`ObjectMove`].
    ObjectMove = 9,
    /// [`ServerError`].
    Error = 10,
    /// [`ServerWarning`].
    Warning = 11,
}

impl MessageKind {
    /// Every known kind, in wire order.
    pub const ALL: [MessageKind; 11] = [
        MessageKind::AuthResult,
        MessageKind::Pong,
        MessageKind::PlayerEnterWorld,
        MessageKind::PlayerLeaveWorld,
        MessageKind::ChunkLoad,
        MessageKind::ChunkUnload,
        MessageKind::ObjectSpawn,
        MessageKind::ObjectDespawn,
        MessageKind::ObjectMove,
        MessageKind::Error,
        MessageKind::Warning,
    ];

    /// Wire discriminant.
    pub fn wire_id(self) -> u16 {
        self as u16
    }

    /// Map a wire discriminant back to a kind.
    pub fn from_wire(id: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.wire_id() == id)
    }
}

/// Decoded server-to-client payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Handshake outcome.
    AuthResult(AuthResult),
    /// Heartbeat reply.
    Pong(Pong),
    /// World session started.
    PlayerEnterWorld(PlayerEnterWorld),
    /// World session ended.
    PlayerLeaveWorld(PlayerLeaveWorld),
    /// Terrain arrived.
    ChunkLoad(ChunkLoad),
    /// Terrain dropped.
    ChunkUnload(ChunkUnload),
    /// Entity appeared.
    ObjectSpawn(ObjectSpawn),
    /// Entity disappeared.
    ObjectDespawn(ObjectDespawn),
    /// Entity moved.
    ObjectMove(ObjectMove),
    /// Request failed.
    Error(ServerError),
    /// Non-fatal notice.
    Warning(ServerWarning),
    /// A kind this client build does not understand.
    Unknown {
        /// Raw wire discriminant.
        kind: u16,
    },
}

impl ServerMessage {
    /// Routing kind, or `None` for [`ServerMessage::Unknown`].
    pub fn kind(&self) -> Option<MessageKind> {
        Some(match self {
            ServerMessage::AuthResult(_) => MessageKind::AuthResult,
            ServerMessage::Pong(_) => MessageKind::Pong,
            ServerMessage::PlayerEnterWorld(_) => MessageKind::PlayerEnterWorld,
            ServerMessage::PlayerLeaveWorld(_) => MessageKind::PlayerLeaveWorld,
            ServerMessage::ChunkLoad(_) => MessageKind::ChunkLoad,
            ServerMessage::ChunkUnload(_) => MessageKind::ChunkUnload,
            ServerMessage::ObjectSpawn(_) => MessageKind::ObjectSpawn,
            ServerMessage::ObjectDespawn(_) => MessageKind::ObjectDespawn,
            ServerMessage::ObjectMove(_) => MessageKind::ObjectMove,
            ServerMessage::Error(_) => MessageKind::Error,
            ServerMessage::Warning(_) => MessageKind::Warning,
            ServerMessage::Unknown { .. } => return None,
        })
    }
}

/// Client-to-server payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Authentication handshake.
    Auth(Auth),
    /// Heartbeat.
    Ping(Ping),
}

const CLIENT_AUTH: u16 = 1;
const CLIENT_PING: u16 = 2;

/// A server message with its envelope sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerEnvelope {
    /// Server-side outbound sequence.
    pub sequence: u64,
    /// The single payload.
    pub message: ServerMessage,
}

/// A client message with its envelope sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientEnvelope {
    /// Client-side outbound sequence.
    pub sequence: u64,
    /// The single payload.
    pub message: ClientMessage,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during message (de)serialization.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The payload was empty (no version byte).
    #[error("empty payload, missing version byte")]
    EmptyPayload,

    /// The version byte does not match [`PROTOCOL_VERSION`].
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// A client frame carried a kind this codec does not know.
    #[error("unknown client message kind: {0}")]
    UnknownClientKind(u16),

    /// Postcard (de)serialization failed.
    #[error("postcard error: {0}")]
    Postcard(#[from] postcard::Error),
}

// ---------------------------------------------------------------------------
// Serialization helpers
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct RawEnvelope {
    sequence: u64,
    kind: u16,
    body: Vec<u8>,
}

fn seal(sequence: u64, kind: u16, body: Vec<u8>) -> Result<Vec<u8>, MessageError> {
    let raw = postcard::to_allocvec(&RawEnvelope {
        sequence,
        kind,
        body,
    })?;
    let mut out = Vec::with_capacity(1 + raw.len());
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&raw);
    Ok(out)
}

fn open(data: &[u8]) -> Result<RawEnvelope, MessageError> {
    let (&version, rest) = data.split_first().ok_or(MessageError::EmptyPayload)?;
    if version != PROTOCOL_VERSION {
        return Err(MessageError::UnsupportedVersion(version));
    }
    Ok(postcard::from_bytes(rest)?)
}

fn body<T: Serialize>(payload: &T) -> Result<Vec<u8>, MessageError> {
    Ok(postcard::to_allocvec(payload)?)
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T, MessageError> {
    Ok(postcard::from_bytes(body)?)
}

/// Serialize a client envelope into a versioned frame payload.
pub fn encode_client(envelope: &ClientEnvelope) -> Result<Vec<u8>, MessageError> {
    let (kind, bytes) = match &envelope.message {
        ClientMessage::Auth(auth) => (CLIENT_AUTH, body(auth)?),
        ClientMessage::Ping(ping) => (CLIENT_PING, body(ping)?),
    };
    seal(envelope.sequence, kind, bytes)
}

/// Deserialize a client frame payload. Used by servers and test peers.
pub fn decode_client(data: &[u8]) -> Result<ClientEnvelope, MessageError> {
    let raw = open(data)?;
    let message = match raw.kind {
        CLIENT_AUTH => ClientMessage::Auth(parse(&raw.body)?),
        CLIENT_PING => ClientMessage::Ping(parse(&raw.body)?),
        other => return Err(MessageError::UnknownClientKind(other)),
    };
    Ok(ClientEnvelope {
        sequence: raw.sequence,
        message,
    })
}

/// Serialize a server envelope. Used by servers and test peers.
///
/// [`ServerMessage::Unknown`] is written with an empty body, which is how a
/// newer server's extra kinds look to this client.
pub fn encode_server(envelope: &ServerEnvelope) -> Result<Vec<u8>, MessageError> {
    let (kind, bytes) = match &envelope.message {
        ServerMessage::AuthResult(m) => (MessageKind::AuthResult, body(m)?),
        ServerMessage::Pong(m) => (MessageKind::Pong, body(m)?),
        ServerMessage::PlayerEnterWorld(m) => (MessageKind::PlayerEnterWorld, body(m)?),
        ServerMessage::PlayerLeaveWorld(m) => (MessageKind::PlayerLeaveWorld, body(m)?),
        ServerMessage::ChunkLoad(m) => (MessageKind::ChunkLoad, body(m)?),
        ServerMessage::ChunkUnload(m) => (MessageKind::ChunkUnload, body(m)?),
        ServerMessage::ObjectSpawn(m) => (MessageKind::ObjectSpawn, body(m)?),
        ServerMessage::ObjectDespawn(m) => (MessageKind::ObjectDespawn, body(m)?),
        ServerMessage::ObjectMove(m) => (MessageKind::ObjectMove, body(m)?),
        ServerMessage::Error(m) => (MessageKind::Error, body(m)?),
        ServerMessage::Warning(m) => (MessageKind::Warning, body(m)?),
        ServerMessage::Unknown { kind } => return seal(envelope.sequence, *kind, Vec::new()),
    };
    seal(envelope.sequence, kind.wire_id(), bytes)
}

/// Deserialize a server frame payload.
///
/// Unrecognised kinds become [`ServerMessage::Unknown`]; only a bad version
/// byte or malformed bytes are errors.
pub fn decode_server(data: &[u8]) -> Result<ServerEnvelope, MessageError> {
    let raw = open(data)?;
    let Some(kind) = MessageKind::from_wire(raw.kind) else {
        return Ok(ServerEnvelope {
            sequence: raw.sequence,
            message: ServerMessage::Unknown { kind: raw.kind },
        });
    };
    let b = &raw.body;
    let message = match kind {
        MessageKind::AuthResult => ServerMessage::AuthResult(parse(b)?),
        MessageKind::Pong => ServerMessage::Pong(parse(b)?),
        MessageKind::PlayerEnterWorld => ServerMessage::PlayerEnterWorld(parse(b)?),
        MessageKind::PlayerLeaveWorld => ServerMessage::PlayerLeaveWorld(parse(b)?),
        MessageKind::ChunkLoad => ServerMessage::ChunkLoad(parse(b)?),
        MessageKind::ChunkUnload => ServerMessage::ChunkUnload(parse(b)?),
        MessageKind::ObjectSpawn => ServerMessage::ObjectSpawn(parse(b)?),
        MessageKind::ObjectDespawn => ServerMessage::ObjectDespawn(parse(b)?),
        MessageKind::ObjectMove => ServerMessage::ObjectMove(parse(b)?),
        MessageKind::Error => ServerMessage::Error(parse(b)?),
        MessageKind::Warning => ServerMessage::Warning(parse(b)?),
    };
    Ok(ServerEnvelope {
        sequence: raw.sequence,
        message,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_move() -> ObjectMove {
        ObjectMove {
            entity_id: 42,
            server_time_ms: 1_700_000_000_123,
            move_seq: 17,
            stream_epoch: 3,
            is_teleport: false,
            movement: EntityMovement {
                position: Position {
                    x: 1024.0,
                    y: -512.5,
                    heading: 90.0,
                },
                velocity: Vector2 { x: 300.0, y: 0.0 },
                move_mode: MoveMode::Run,
                is_moving: true,
                target_position: Some(Vector2 { x: 2048.0, y: -512.5 }),
            },
        }
    }

    #[test]
    fn test_object_move_survives_encoding() {
        let envelope = ServerEnvelope {
            sequence: 9,
            message: ServerMessage::ObjectMove(sample_move()),
        };
        let bytes = encode_server(&envelope).unwrap();
        assert_eq!(decode_server(&bytes).unwrap(), envelope);
    }

    #[test]
    fn test_auth_survives_encoding() {
        let envelope = ClientEnvelope {
            sequence: 1,
            message: ClientMessage::Auth(Auth {
                token: "secret".into(),
                client_version: "0.1.0".into(),
            }),
        };
        let bytes = encode_client(&envelope).unwrap();
        assert_eq!(decode_client(&bytes).unwrap(), envelope);
    }

    #[test]
    fn test_unknown_server_kind_is_not_an_error() {
        let bytes = seal(4, 999, vec![1, 2, 3]).unwrap();
        let decoded = decode_server(&bytes).unwrap();
        assert_eq!(decoded.sequence, 4);
        assert_eq!(decoded.message, ServerMessage::Unknown { kind: 999 });
        assert_eq!(decoded.message.kind(), None);
    }

    #[test]
    fn test_unknown_client_kind_rejected() {
        let bytes = seal(1, 77, Vec::new()).unwrap();
        assert!(matches!(
            decode_client(&bytes),
            Err(MessageError::UnknownClientKind(77))
        ));
    }

    #[test]
    fn test_kind_matches_variant() {
        let msg = ServerMessage::ObjectDespawn(ObjectDespawn { entity_id: 5 });
        assert_eq!(msg.kind(), Some(MessageKind::ObjectDespawn));
        for kind in MessageKind::ALL {
            assert_eq!(MessageKind::from_wire(kind.wire_id()), Some(kind));
        }
        assert_eq!(MessageKind::from_wire(0), None);
    }

    #[test]
    fn test_truncated_body_rejected() {
        let good = body(&sample_move()).unwrap();
        let bytes = seal(1, MessageKind::ObjectMove.wire_id(), good[..3].to_vec()).unwrap();
        assert!(matches!(
            decode_server(&bytes),
            Err(MessageError::Postcard(_))
        ));
    }

    #[test]
    fn test_postcard_output_is_compact() {
        let envelope = ClientEnvelope {
            sequence: 12,
            message: ClientMessage::Ping(Ping {
                client_time_ms: 1_700_000_000_000,
            }),
        };
        let bytes = encode_client(&envelope).unwrap();
        assert!(bytes.len() < 20, "Ping should be compact, got {} bytes", bytes.len());
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let envelope = ServerEnvelope {
            sequence: 1,
            message: ServerMessage::Pong(Pong {
                client_time_ms: 0,
                server_time_ms: 0,
            }),
        };
        let mut bytes = encode_server(&envelope).unwrap();
        bytes[0] = 255;
        assert!(matches!(
            decode_server(&bytes),
            Err(MessageError::UnsupportedVersion(255))
        ));
    }

    #[test]
    fn test_empty_payload_rejected() {
        assert!(matches!(decode_server(&[]), Err(MessageError::EmptyPayload)));
    }

    #[test]
    fn test_corrupted_payload_rejected() {
        assert!(decode_server(&[PROTOCOL_VERSION, 0xFF, 0xFF, 0xFF]).is_err());
    }

    #[test]
    fn test_version_byte_is_first_byte() {
        let envelope = ServerEnvelope {
            sequence: 1,
            message: ServerMessage::PlayerLeaveWorld(PlayerLeaveWorld { entity_id: 1 }),
        };
        assert_eq!(encode_server(&envelope).unwrap()[0], PROTOCOL_VERSION);
    }
}
