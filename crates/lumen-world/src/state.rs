//! Client-side world state and the handlers that keep it current.

use lumen_config::MovementConfig;
use lumen_net::messages::{ObjectSpawn, PlayerEnterWorld};
use lumen_net::{EntityId, HandlerError, MessageDispatcher, MessageKind, ServerMessage};

use crate::bootstrap::WorldBootstrap;
use crate::movement::{MoveOutcome, MovementSynchronizer};
use crate::time_sync::TimeSync;

/// Facts about the current world session from `PlayerEnterWorld`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// The player's own entity.
    pub player_entity_id: EntityId,
    /// Character name.
    pub name: String,
    /// World units per tile.
    pub coord_per_tile: u32,
    /// Tiles per chunk edge.
    pub chunk_size: u32,
    /// Movement stream epoch.
    pub stream_epoch: u32,
    /// Server ticks per second.
    pub tick_rate: u32,
}

impl From<&PlayerEnterWorld> for Session {
    fn from(msg: &PlayerEnterWorld) -> Self {
        Self {
            player_entity_id: msg.entity_id,
            name: msg.name.clone(),
            coord_per_tile: msg.coord_per_tile,
            chunk_size: msg.chunk_size,
            stream_epoch: msg.stream_epoch,
            tick_rate: msg.tick_rate,
        }
    }
}

/// Everything the message handlers mutate.
#[derive(Debug, Clone, Default)]
pub struct WorldState {
    /// Entity motion.
    pub movement: MovementSynchronizer,
    /// Render gating.
    pub bootstrap: WorldBootstrap,
    /// Server clock estimate.
    pub time_sync: TimeSync,
    /// Current world session, if entered.
    pub session: Option<Session>,
    /// Chunks currently loaded.
    pub loaded_chunks: usize,
}

impl WorldState {
    /// Empty state using the given movement tuning.
    pub fn new(movement: MovementConfig) -> Self {
        Self {
            movement: MovementSynchronizer::new(movement),
            ..Self::default()
        }
    }

    /// Forget the world session: entities, bootstrap and session.
    pub fn leave_world(&mut self) {
        self.movement.clear();
        self.bootstrap.reset();
        self.session = None;
        self.loaded_chunks = 0;
    }

    /// Forget everything tied to the connection, clock estimate included.
    pub fn clear(&mut self) {
        self.leave_world();
        self.movement.reset();
        self.time_sync.reset();
    }

    fn enter_world(&mut self, msg: &PlayerEnterWorld) {
        tracing::info!(
            entity = msg.entity_id,
            name = %msg.name,
            epoch = msg.stream_epoch,
            tick_rate = msg.tick_rate,
            "entered world"
        );
        self.movement.clear();
        self.movement
            .set_stream_epoch(msg.stream_epoch, msg.tick_rate);
        self.session = Some(Session::from(msg));
        self.loaded_chunks = 0;
        self.bootstrap.on_enter_world();
    }

    fn spawn(&mut self, msg: &ObjectSpawn) {
        let pos = msg.position.position;
        self.movement
            .init_entity(msg.entity_id, pos.x, pos.y, pos.heading);
        if self
            .session
            .as_ref()
            .is_some_and(|s| s.player_entity_id == msg.entity_id)
        {
            self.bootstrap.on_player_spawned();
        }
    }
}

fn mismatched(msg: &ServerMessage) -> HandlerError {
    HandlerError::new(format!("handler received {:?}", msg.kind()))
}

/// Register the handlers that drive [`WorldState`] from server messages.
pub fn register_world_handlers(dispatcher: &mut MessageDispatcher<WorldState>) {
    dispatcher.register(
        MessageKind::PlayerEnterWorld,
        |msg: &ServerMessage, world: &mut WorldState| {
            let ServerMessage::PlayerEnterWorld(enter) = msg else {
                return Err(mismatched(msg));
            };
            world.enter_world(enter);
            Ok(())
        },
    );

    dispatcher.register(
        MessageKind::PlayerLeaveWorld,
        |msg: &ServerMessage, world: &mut WorldState| {
            let ServerMessage::PlayerLeaveWorld(leave) = msg else {
                return Err(mismatched(msg));
            };
            tracing::info!(entity = leave.entity_id, "left world");
            world.leave_world();
            Ok(())
        },
    );

    dispatcher.register(
        MessageKind::ChunkLoad,
        |msg: &ServerMessage, world: &mut WorldState| {
            let ServerMessage::ChunkLoad(load) = msg else {
                return Err(mismatched(msg));
            };
            tracing::debug!(x = load.chunk.coord.x, y = load.chunk.coord.y, "chunk loaded");
            world.loaded_chunks += 1;
            world.bootstrap.on_chunk_loaded();
            Ok(())
        },
    );

    dispatcher.register(
        MessageKind::ChunkUnload,
        |msg: &ServerMessage, world: &mut WorldState| {
            let ServerMessage::ChunkUnload(unload) = msg else {
                return Err(mismatched(msg));
            };
            tracing::debug!(x = unload.coord.x, y = unload.coord.y, "chunk unloaded");
            world.loaded_chunks = world.loaded_chunks.saturating_sub(1);
            Ok(())
        },
    );

    dispatcher.register(
        MessageKind::ObjectSpawn,
        |msg: &ServerMessage, world: &mut WorldState| {
            let ServerMessage::ObjectSpawn(spawn) = msg else {
                return Err(mismatched(msg));
            };
            world.spawn(spawn);
            Ok(())
        },
    );

    dispatcher.register(
        MessageKind::ObjectDespawn,
        |msg: &ServerMessage, world: &mut WorldState| {
            let ServerMessage::ObjectDespawn(despawn) = msg else {
                return Err(mismatched(msg));
            };
            world.movement.remove_entity(despawn.entity_id);
            Ok(())
        },
    );

    dispatcher.register(
        MessageKind::ObjectMove,
        |msg: &ServerMessage, world: &mut WorldState| {
            let ServerMessage::ObjectMove(mv) = msg else {
                return Err(mismatched(msg));
            };
            if world.movement.on_move_message(mv) == MoveOutcome::EpochReset {
                tracing::debug!(entity = mv.entity_id, "motion record reset for new epoch");
            }
            Ok(())
        },
    );

    dispatcher.register(MessageKind::Error, |msg: &ServerMessage, _: &mut WorldState| {
        let ServerMessage::Error(err) = msg else {
            return Err(mismatched(msg));
        };
        tracing::error!(code = err.code, message = %err.message, "server error");
        Ok(())
    });

    dispatcher.register(MessageKind::Warning, |msg: &ServerMessage, _: &mut WorldState| {
        let ServerMessage::Warning(warning) = msg else {
            return Err(mismatched(msg));
        };
        tracing::warn!(code = warning.code, message = %warning.message, "server warning");
        Ok(())
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::BootstrapState;
    use lumen_net::messages::{
        ChunkCoord, ChunkData, ChunkLoad, ChunkUnload, EntityMovement, EntityPosition, ObjectDespawn,
        ObjectMove, PlayerLeaveWorld, Position, ServerError, ServerWarning,
    };

    fn setup() -> (MessageDispatcher<WorldState>, WorldState) {
        let mut dispatcher = MessageDispatcher::new();
        register_world_handlers(&mut dispatcher);
        let mut world = WorldState::default();
        world.bootstrap.begin();
        (dispatcher, world)
    }

    fn enter(entity_id: EntityId, epoch: u32) -> ServerMessage {
        ServerMessage::PlayerEnterWorld(PlayerEnterWorld {
            entity_id,
            name: "ayla".into(),
            coord_per_tile: 32,
            chunk_size: 16,
            stream_epoch: epoch,
            tick_rate: 10,
        })
    }

    fn spawn(entity_id: EntityId, x: f64, y: f64) -> ServerMessage {
        ServerMessage::ObjectSpawn(ObjectSpawn {
            entity_id,
            object_type: 1,
            resource_path: "actors/human".into(),
            position: EntityPosition {
                position: Position { x, y, heading: 0.0 },
                ..EntityPosition::default()
            },
        })
    }

    fn chunk() -> ServerMessage {
        ServerMessage::ChunkLoad(ChunkLoad {
            chunk: ChunkData {
                coord: ChunkCoord { x: 0, y: 0 },
                tiles: vec![0; 4],
                version: 1,
            },
        })
    }

    fn mv(entity_id: EntityId, seq: u32, epoch: u32, x: f64) -> ServerMessage {
        ServerMessage::ObjectMove(ObjectMove {
            entity_id,
            server_time_ms: i64::from(seq) * 100,
            move_seq: seq,
            stream_epoch: epoch,
            is_teleport: false,
            movement: EntityMovement {
                position: Position { x, y: 0.0, heading: 0.0 },
                ..EntityMovement::default()
            },
        })
    }

    #[test]
    fn test_bootstrap_through_handlers() {
        let (mut dispatcher, mut world) = setup();

        dispatcher.dispatch(&enter(7, 3), &mut world);
        assert_eq!(world.bootstrap.state(), BootstrapState::WaitingFirstChunk);
        assert_eq!(world.movement.stream_epoch(), 3);
        assert_eq!(world.movement.tick_rate(), 10);

        dispatcher.dispatch(&chunk(), &mut world);
        assert_eq!(world.bootstrap.state(), BootstrapState::WaitingPlayerSpawn);

        // Another entity spawning does not complete the bootstrap.
        dispatcher.dispatch(&spawn(8, 0.0, 0.0), &mut world);
        assert_eq!(world.bootstrap.state(), BootstrapState::WaitingPlayerSpawn);

        dispatcher.dispatch(&spawn(7, 64.0, 32.0), &mut world);
        assert_eq!(world.bootstrap.state(), BootstrapState::Ready);
        assert_eq!(
            world.session.as_ref().map(|s| s.player_entity_id),
            Some(7)
        );
        assert!(world.movement.has_entity(7));
    }

    #[test]
    fn test_moves_reach_synchronizer() {
        let (mut dispatcher, mut world) = setup();
        dispatcher.dispatch(&enter(7, 3), &mut world);
        dispatcher.dispatch(&spawn(9, 0.0, 0.0), &mut world);

        dispatcher.dispatch(&mv(9, 1, 3, 40.0), &mut world);
        assert_eq!(world.movement.authoritative(9).map(|s| s.x), Some(40.0));

        // Stale epoch and unknown entity are silently dropped.
        dispatcher.dispatch(&mv(9, 2, 2, 99.0), &mut world);
        dispatcher.dispatch(&mv(10, 1, 3, 99.0), &mut world);
        assert_eq!(world.movement.authoritative(9).map(|s| s.x), Some(40.0));
        assert!(!world.movement.has_entity(10));
        assert_eq!(dispatcher.stats().handler_failures, 0);
    }

    #[test]
    fn test_despawn_and_leave_clear_entities() {
        let (mut dispatcher, mut world) = setup();
        dispatcher.dispatch(&enter(7, 3), &mut world);
        dispatcher.dispatch(&spawn(7, 0.0, 0.0), &mut world);
        dispatcher.dispatch(&spawn(9, 0.0, 0.0), &mut world);

        dispatcher.dispatch(
            &ServerMessage::ObjectDespawn(ObjectDespawn { entity_id: 9 }),
            &mut world,
        );
        assert!(!world.movement.has_entity(9));

        dispatcher.dispatch(
            &ServerMessage::PlayerLeaveWorld(PlayerLeaveWorld { entity_id: 7 }),
            &mut world,
        );
        assert!(world.movement.is_empty());
        assert_eq!(world.bootstrap.state(), BootstrapState::Idle);
        assert!(world.session.is_none());
    }

    #[test]
    fn test_reentering_world_drops_old_entities() {
        let (mut dispatcher, mut world) = setup();
        dispatcher.dispatch(&enter(7, 3), &mut world);
        dispatcher.dispatch(&spawn(9, 0.0, 0.0), &mut world);

        dispatcher.dispatch(&enter(7, 4), &mut world);
        assert!(!world.movement.has_entity(9));
        assert_eq!(world.movement.stream_epoch(), 4);
        assert_eq!(world.bootstrap.state(), BootstrapState::WaitingFirstChunk);
    }

    #[test]
    fn test_chunk_unload_tracks_count() {
        let (mut dispatcher, mut world) = setup();
        dispatcher.dispatch(&enter(7, 3), &mut world);
        dispatcher.dispatch(&chunk(), &mut world);
        dispatcher.dispatch(&chunk(), &mut world);
        dispatcher.dispatch(
            &ServerMessage::ChunkUnload(ChunkUnload {
                coord: ChunkCoord { x: 0, y: 0 },
            }),
            &mut world,
        );
        assert_eq!(world.loaded_chunks, 1);
    }

    #[test]
    fn test_server_notices_are_handled() {
        let (mut dispatcher, mut world) = setup();
        let err = ServerMessage::Error(ServerError {
            code: 4,
            message: "inventory full".into(),
        });
        let warn = ServerMessage::Warning(ServerWarning {
            code: 1,
            message: "maintenance soon".into(),
        });
        assert_eq!(
            dispatcher.dispatch(&err, &mut world),
            lumen_net::DispatchOutcome::Handled
        );
        assert_eq!(
            dispatcher.dispatch(&warn, &mut world),
            lumen_net::DispatchOutcome::Handled
        );
    }

    #[test]
    fn test_clear_resets_everything() {
        let (mut dispatcher, mut world) = setup();
        dispatcher.dispatch(&enter(7, 3), &mut world);
        dispatcher.dispatch(&spawn(7, 0.0, 0.0), &mut world);
        world.time_sync.on_pong(0, 100, 20);

        world.clear();
        assert!(world.movement.is_empty());
        assert_eq!(world.movement.stream_epoch(), 0);
        assert!(!world.time_sync.is_initialized());
        assert_eq!(world.bootstrap.state(), BootstrapState::Idle);
    }
}
