//! Lumen world client: one connection, one dispatcher, one world.
//!
//! [`WorldClient`] is the composition root. Call [`WorldClient::frame`] once
//! per rendered frame. It drains the connection, routes server messages into
//! the [`WorldState`], and advances entity motion to the current render time.
//! Losing the connection clears all world state.

mod error;

use std::collections::HashMap;

use lumen_config::{Config, MovementConfig};
use lumen_net::{
    ConnectionConfig, ConnectionEvent, ConnectionState, EntityId, GameConnection,
    MessageDispatcher, NetError,
};
use lumen_world::{RenderPosition, WorldState, register_world_handlers};
use tokio::io::{AsyncRead, AsyncWrite};

pub use error::ClientError;

/// Owns the connection, the dispatcher and the world state.
pub struct WorldClient {
    connection: GameConnection,
    dispatcher: MessageDispatcher<WorldState>,
    world: WorldState,
}

impl WorldClient {
    /// Build a client from the loaded configuration.
    pub fn new(config: &Config) -> Self {
        Self::with_parts(
            ConnectionConfig::from(&config.network),
            config.movement.clone(),
            config.debug.dispatch_history,
        )
    }

    /// Build a client from explicit parts.
    pub fn with_parts(
        connection: ConnectionConfig,
        movement: MovementConfig,
        dispatch_history: usize,
    ) -> Self {
        let mut dispatcher = MessageDispatcher::with_history(dispatch_history);
        register_world_handlers(&mut dispatcher);
        tracing::debug!(
            handlers = dispatcher.registered_kinds().count(),
            "world handlers registered"
        );
        Self {
            connection: GameConnection::new(connection),
            dispatcher,
            world: WorldState::new(movement),
        }
    }

    /// Dial the server and send `Auth`.
    pub async fn connect(&mut self, token: impl Into<String>) -> Result<(), NetError> {
        let result = self.connection.connect(token).await;
        self.pump();
        result
    }

    /// Start a session over an already-open stream.
    pub fn connect_stream<S>(&mut self, token: impl Into<String>, stream: S) -> Result<(), NetError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let result = self.connection.connect_stream(token, stream);
        self.pump();
        result
    }

    /// Close the session and clear the world.
    pub fn disconnect(&mut self) {
        self.connection.disconnect();
        self.pump();
    }

    /// Apply everything the connection delivered since the last call.
    ///
    /// Returns the connection states entered, in order.
    pub fn pump(&mut self) -> Vec<ConnectionState> {
        let mut entered = Vec::new();
        for event in self.connection.poll() {
            match event {
                ConnectionEvent::StateChanged { state, fault } => {
                    match state {
                        ConnectionState::Connected => {
                            self.world.bootstrap.begin();
                        }
                        ConnectionState::Disconnected | ConnectionState::Error => {
                            if let Some(fault) = &fault {
                                tracing::warn!(code = fault.code(), %fault, "connection lost");
                            }
                            self.world.clear();
                        }
                        ConnectionState::Connecting | ConnectionState::Authenticating => {}
                    }
                    entered.push(state);
                }
                ConnectionEvent::Message(message) => {
                    self.dispatcher.dispatch(&message, &mut self.world);
                }
                ConnectionEvent::Pong(sample) => {
                    self.world.time_sync.on_pong_sample(&sample);
                }
            }
        }
        entered
    }

    /// Per-frame entry point: pump, then advance motion to render time.
    pub fn frame(&mut self, client_now_ms: i64) -> HashMap<EntityId, RenderPosition> {
        self.pump();
        let render_time = self
            .world
            .movement
            .render_time_ms(&self.world.time_sync, client_now_ms);
        self.world.movement.update(render_time)
    }

    /// Connection lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// The connection.
    pub fn connection(&self) -> &GameConnection {
        &self.connection
    }

    /// The synchronized world.
    pub fn world(&self) -> &WorldState {
        &self.world
    }

    /// The dispatcher, for inspection.
    pub fn dispatcher(&self) -> &MessageDispatcher<WorldState> {
        &self.dispatcher
    }

    /// The dispatcher, to register handlers for additional message kinds.
    pub fn dispatcher_mut(&mut self) -> &mut MessageDispatcher<WorldState> {
        &mut self.dispatcher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_net::messages::{AuthResult, PlayerEnterWorld};
    use lumen_net::{FrameConfig, ServerEnvelope, ServerMessage, encode_server, write_frame};
    use lumen_world::BootstrapState;
    use std::time::Duration;
    use tokio::io::duplex;

    async fn settle(client: &mut WorldClient, until: impl Fn(&WorldClient) -> bool) {
        for _ in 0..500 {
            client.pump();
            if until(client) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("client never settled");
    }

    async fn push(peer: &mut tokio::io::DuplexStream, sequence: u64, message: ServerMessage) {
        let bytes = encode_server(&ServerEnvelope { sequence, message }).unwrap();
        write_frame(peer, &bytes, &FrameConfig::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_connected_begins_bootstrap_and_disconnect_clears() {
        let mut client = WorldClient::new(&Config::default());
        let (stream, mut peer) = duplex(64 * 1024);
        client.connect_stream("t", stream).unwrap();
        assert_eq!(client.state(), ConnectionState::Authenticating);

        push(
            &mut peer,
            1,
            ServerMessage::AuthResult(AuthResult {
                success: true,
                error_message: String::new(),
            }),
        )
        .await;
        settle(&mut client, |c| c.state() == ConnectionState::Connected).await;
        assert_eq!(
            client.world().bootstrap.state(),
            BootstrapState::WaitingEnterWorld
        );

        push(
            &mut peer,
            2,
            ServerMessage::PlayerEnterWorld(PlayerEnterWorld {
                entity_id: 1,
                name: "n".into(),
                coord_per_tile: 32,
                chunk_size: 16,
                stream_epoch: 9,
                tick_rate: 20,
            }),
        )
        .await;
        settle(&mut client, |c| c.world().session.is_some()).await;

        client.disconnect();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.world().session.is_none());
        assert_eq!(client.world().bootstrap.state(), BootstrapState::Idle);
        assert_eq!(client.world().movement.stream_epoch(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_history_follows_config() {
        let mut config = Config::default();
        config.debug.dispatch_history = 4;
        let mut client = WorldClient::new(&config);
        let (stream, mut peer) = duplex(64 * 1024);
        client.connect_stream("t", stream).unwrap();
        push(&mut peer, 1, ServerMessage::Unknown { kind: 77 }).await;
        settle(&mut client, |c| c.dispatcher().unknown_message_count() == 1).await;
        assert_eq!(client.dispatcher().history().count(), 1);
    }
}
