//! World bootstrap gating.
//!
//! The world is safe to render only once the server has confirmed world
//! entry, at least one terrain chunk has arrived, and the player's own entity
//! has spawned. Chunk and spawn may arrive in either order.

/// Bootstrap progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BootstrapState {
    /// Not connected to a world session.
    #[default]
    Idle,
    /// Authenticated, waiting for `PlayerEnterWorld`.
    WaitingEnterWorld,
    /// In the world, no terrain yet.
    WaitingFirstChunk,
    /// Terrain present, player entity not yet spawned.
    WaitingPlayerSpawn,
    /// Terrain and player present.
    Ready,
}

/// Tracks the bootstrap sequence of one world session.
#[derive(Debug, Clone, Default)]
pub struct WorldBootstrap {
    state: BootstrapState,
    first_chunk: bool,
    player_spawned: bool,
}

impl WorldBootstrap {
    /// Start in [`BootstrapState::Idle`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> BootstrapState {
        self.state
    }

    /// Whether the world can be drawn.
    pub fn is_ready(&self) -> bool {
        self.state == BootstrapState::Ready
    }

    /// Whether a chunk has been seen since the last world entry.
    pub fn has_first_chunk(&self) -> bool {
        self.first_chunk
    }

    /// Whether the player entity has spawned since the last world entry.
    pub fn has_player_spawned(&self) -> bool {
        self.player_spawned
    }

    /// Authentication succeeded; expect world entry next.
    pub fn begin(&mut self) -> BootstrapState {
        if self.state == BootstrapState::Idle {
            self.transition(BootstrapState::WaitingEnterWorld);
        }
        self.state
    }

    /// The server confirmed world entry. Clears both flags.
    pub fn on_enter_world(&mut self) -> BootstrapState {
        self.first_chunk = false;
        self.player_spawned = false;
        self.recompute()
    }

    /// A terrain chunk arrived.
    pub fn on_chunk_loaded(&mut self) -> BootstrapState {
        if self.in_world() {
            self.first_chunk = true;
            self.recompute();
        }
        self.state
    }

    /// Alias for [`on_chunk_loaded`](Self::on_chunk_loaded).
    pub fn on_first_chunk(&mut self) -> BootstrapState {
        self.on_chunk_loaded()
    }

    /// The player's own entity spawned.
    pub fn on_player_spawned(&mut self) -> BootstrapState {
        if self.in_world() {
            self.player_spawned = true;
            self.recompute();
        }
        self.state
    }

    /// World left or connection lost.
    pub fn reset(&mut self) {
        self.first_chunk = false;
        self.player_spawned = false;
        self.transition(BootstrapState::Idle);
    }

    fn in_world(&self) -> bool {
        matches!(
            self.state,
            BootstrapState::WaitingFirstChunk
                | BootstrapState::WaitingPlayerSpawn
                | BootstrapState::Ready
        )
    }

    fn recompute(&mut self) -> BootstrapState {
        let next = match (self.first_chunk, self.player_spawned) {
            (true, true) => BootstrapState::Ready,
            (true, false) => BootstrapState::WaitingPlayerSpawn,
            _ => BootstrapState::WaitingFirstChunk,
        };
        self.transition(next);
        self.state
    }

    fn transition(&mut self, next: BootstrapState) {
        if next != self.state {
            tracing::info!(from = ?self.state, to = ?next, "world bootstrap");
            self.state = next;
        }
    }
}
