//! Client-side world synchronization: entity movement reconciliation, server
//! clock estimation, bootstrap gating, and the message handlers that feed them.

pub mod bootstrap;
pub mod movement;
pub mod state;
pub mod time_sync;

pub use bootstrap::{BootstrapState, WorldBootstrap};
pub use movement::{
    AuthoritativeState, EntityMotionMetrics, MoveOutcome, MoveSample, MovementMetrics,
    MovementSynchronizer, RenderPosition,
};
pub use state::{Session, WorldState, register_world_handlers};
pub use time_sync::{ClockSample, TimeSync, TimeSyncConfig, TimeSyncMetrics};
