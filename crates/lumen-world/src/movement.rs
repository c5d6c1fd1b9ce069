//! Movement synchronization: turns authoritative, sequence-numbered movement
//! snapshots into smooth per-frame render positions.
//!
//! Each live entity has a motion record holding its last accepted snapshot,
//! a short buffer of keyframes ordered by server time, and the position the
//! renderer currently shows. Every frame the render position is steered
//! toward a target computed at *render time* (estimated server time minus an
//! interpolation delay):
//!
//! - between two keyframes: linear interpolation
//! - before the first keyframe: the first keyframe
//! - past the last keyframe: dead reckoning with the last velocity, bounded
//!   by `max_extrapolation_ms`, then decaying
//!
//! Small errors are blended out over several frames; large ones snap.
//!
//! Snapshots are filtered before they reach the buffer. Updates for unknown
//! entities or from another session epoch are dropped. Continuous updates
//! must carry a strictly increasing move sequence. Teleports always win and
//! snap immediately.

use std::collections::{HashMap, VecDeque};

use lumen_config::MovementConfig;
use lumen_net::EntityId;
use lumen_net::messages::{MoveMode, ObjectMove};

use crate::time_sync::TimeSync;

// ---------------------------------------------------------------------------
// Inputs and outputs
// ---------------------------------------------------------------------------

/// One authoritative movement snapshot, flattened from [`ObjectMove`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveSample {
    /// Moving entity.
    pub entity_id: EntityId,
    /// Server time the snapshot was taken.
    pub server_time_ms: i64,
    /// Per-entity movement sequence.
    pub move_seq: u32,
    /// Session epoch the snapshot belongs to.
    pub stream_epoch: u32,
    /// Deliberate discontinuity.
    pub is_teleport: bool,
    /// Authoritative X.
    pub x: f64,
    /// Authoritative Y.
    pub y: f64,
    /// Authoritative facing.
    pub heading: f64,
    /// Velocity X, units per second.
    pub vx: f64,
    /// Velocity Y, units per second.
    pub vy: f64,
    /// Whether the entity is moving.
    pub is_moving: bool,
    /// Movement style.
    pub move_mode: MoveMode,
}

impl From<&ObjectMove> for MoveSample {
    fn from(msg: &ObjectMove) -> Self {
        let movement = &msg.movement;
        Self {
            entity_id: msg.entity_id,
            server_time_ms: msg.server_time_ms,
            move_seq: msg.move_seq,
            stream_epoch: msg.stream_epoch,
            is_teleport: msg.is_teleport,
            x: movement.position.x,
            y: movement.position.y,
            heading: movement.position.heading,
            vx: movement.velocity.x,
            vy: movement.velocity.y,
            is_moving: movement.is_moving,
            move_mode: movement.move_mode,
        }
    }
}

/// What [`MovementSynchronizer::on_object_move`] did with a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Buffered for interpolation.
    Accepted,
    /// Accepted and snapped.
    Teleported,
    /// The record predated the current epoch; it was reset and snapped.
    EpochReset,
    /// No record for the entity; nothing created.
    UnknownEntity,
    /// Tagged with an epoch other than the current one.
    StaleEpoch,
    /// Sequence not newer than the last accepted one.
    OutOfOrder,
}

impl MoveOutcome {
    /// Whether the sample changed the record.
    pub fn is_accepted(self) -> bool {
        matches!(
            self,
            MoveOutcome::Accepted | MoveOutcome::Teleported | MoveOutcome::EpochReset
        )
    }
}

/// Where the renderer should draw an entity this frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RenderPosition {
    /// Smoothed X.
    pub x: f64,
    /// Smoothed Y.
    pub y: f64,
    /// Facing.
    pub heading: f64,
    /// Whether to play the moving animation.
    pub is_moving: bool,
    /// Movement style for animation selection.
    pub move_mode: MoveMode,
}

/// Last accepted authoritative state of an entity.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AuthoritativeState {
    /// X.
    pub x: f64,
    /// Y.
    pub y: f64,
    /// Facing.
    pub heading: f64,
    /// Velocity X.
    pub vx: f64,
    /// Velocity Y.
    pub vy: f64,
    /// Moving flag.
    pub is_moving: bool,
    /// Movement style.
    pub move_mode: MoveMode,
    /// Server time of the snapshot; `None` until the first accepted move.
    pub server_time_ms: Option<i64>,
}

/// Per-entity debug counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntityMotionMetrics {
    /// Entity.
    pub entity_id: EntityId,
    /// Keyframes buffered.
    pub buffer_size: usize,
    /// Last accepted move sequence.
    pub last_move_seq: Option<u32>,
    /// Whether the render position is being dead-reckoned.
    pub is_extrapolating: bool,
    /// Samples dropped for ordering.
    pub ignored_out_of_order: u64,
    /// Hard corrections (teleports plus large errors).
    pub snap_count: u64,
    /// Times render time ran past the newest keyframe.
    pub buffer_underruns: u64,
    /// Current render X.
    pub render_x: f64,
    /// Current render Y.
    pub render_y: f64,
}

/// Synchronizer-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MovementMetrics {
    /// Live records.
    pub entity_count: usize,
    /// Sum of per-entity snaps.
    pub total_snaps: u64,
    /// Sum of per-entity ordering drops.
    pub total_ignored_out_of_order: u64,
    /// Sum of per-entity underruns.
    pub total_buffer_underruns: u64,
    /// Samples for entities with no record.
    pub dropped_unknown_entity: u64,
    /// Samples from another epoch.
    pub dropped_stale_epoch: u64,
}

// ---------------------------------------------------------------------------
// Per-entity record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Keyframe {
    server_time_ms: f64,
    x: f64,
    y: f64,
    vx: f64,
    vy: f64,
    heading: f64,
    is_moving: bool,
    move_mode: MoveMode,
}

impl From<&MoveSample> for Keyframe {
    fn from(s: &MoveSample) -> Self {
        Self {
            server_time_ms: s.server_time_ms as f64,
            x: s.x,
            y: s.y,
            vx: s.vx,
            vy: s.vy,
            heading: s.heading,
            is_moving: s.is_moving,
            move_mode: s.move_mode,
        }
    }
}

#[derive(Debug, Clone)]
struct MotionRecord {
    epoch: u32,
    last_seq: Option<u32>,
    authoritative: AuthoritativeState,
    keyframes: VecDeque<Keyframe>,
    render: RenderPosition,
    extrapolating: bool,
    ignored_out_of_order: u64,
    snaps: u64,
    buffer_underruns: u64,
}

impl MotionRecord {
    fn new(epoch: u32, x: f64, y: f64, heading: f64) -> Self {
        Self {
            epoch,
            last_seq: None,
            authoritative: AuthoritativeState {
                x,
                y,
                heading,
                ..AuthoritativeState::default()
            },
            keyframes: VecDeque::new(),
            render: RenderPosition {
                x,
                y,
                heading,
                ..RenderPosition::default()
            },
            extrapolating: false,
            ignored_out_of_order: 0,
            snaps: 0,
            buffer_underruns: 0,
        }
    }

    fn store(&mut self, sample: &MoveSample) {
        self.last_seq = Some(sample.move_seq);
        self.authoritative = AuthoritativeState {
            x: sample.x,
            y: sample.y,
            heading: sample.heading,
            vx: sample.vx,
            vy: sample.vy,
            is_moving: sample.is_moving,
            move_mode: sample.move_mode,
            server_time_ms: Some(sample.server_time_ms),
        };
        self.extrapolating = false;
    }

    fn snap_to(&mut self, sample: &MoveSample) {
        self.keyframes.clear();
        self.keyframes.push_back(Keyframe::from(sample));
        self.render = RenderPosition {
            x: sample.x,
            y: sample.y,
            heading: sample.heading,
            is_moving: sample.is_moving,
            move_mode: sample.move_mode,
        };
    }

    fn buffer(&mut self, sample: &MoveSample, max_keyframes: usize) {
        let keyframe = Keyframe::from(sample);
        let at = self
            .keyframes
            .partition_point(|k| k.server_time_ms <= keyframe.server_time_ms);
        self.keyframes.insert(at, keyframe);
        while self.keyframes.len() > max_keyframes.max(1) {
            self.keyframes.pop_front();
        }
    }

    /// Where the entity should be at `render_time_ms`, before error correction.
    fn target(&mut self, render_time_ms: f64, config: &MovementConfig) -> Option<RenderPosition> {
        let first = *self.keyframes.front()?;
        let last = *self.keyframes.back()?;

        let bracket = self
            .keyframes
            .iter()
            .zip(self.keyframes.iter().skip(1))
            .find(|(a, b)| a.server_time_ms <= render_time_ms && b.server_time_ms >= render_time_ms);

        if let Some((a, b)) = bracket {
            let span = b.server_time_ms - a.server_time_ms;
            let alpha = if span > 0.0 {
                ((render_time_ms - a.server_time_ms) / span).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let target = RenderPosition {
                x: a.x + (b.x - a.x) * alpha,
                y: a.y + (b.y - a.y) * alpha,
                heading: b.heading,
                is_moving: b.is_moving,
                move_mode: b.move_mode,
            };
            self.extrapolating = false;
            return Some(target);
        }

        if render_time_ms < first.server_time_ms {
            self.extrapolating = false;
            return Some(RenderPosition {
                x: first.x,
                y: first.y,
                heading: first.heading,
                is_moving: first.is_moving,
                move_mode: first.move_mode,
            });
        }

        // Past the newest keyframe.
        if !self.extrapolating {
            self.extrapolating = true;
            self.buffer_underruns += 1;
        }
        let past = render_time_ms - last.server_time_ms;
        let max = config.max_extrapolation_ms;
        let scale = if past <= max && last.is_moving {
            past / 1000.0
        } else if last.is_moving {
            let decay = config.velocity_decay.powf((past - max) / 100.0);
            past.min(max) / 1000.0 * decay
        } else {
            0.0
        };
        Some(RenderPosition {
            x: last.x + last.vx * scale,
            y: last.y + last.vy * scale,
            heading: last.heading,
            is_moving: last.is_moving && past <= max,
            move_mode: last.move_mode,
        })
    }

    fn advance(&mut self, render_time_ms: f64, config: &MovementConfig) -> RenderPosition {
        let Some(target) = self.target(render_time_ms, config) else {
            self.render.is_moving = false;
            return self.render;
        };

        let ex = target.x - self.render.x;
        let ey = target.y - self.render.y;
        if ex * ex + ey * ey > config.snap_distance * config.snap_distance {
            self.render.x = target.x;
            self.render.y = target.y;
            self.snaps += 1;
        } else {
            self.render.x += ex * config.correction_factor;
            self.render.y += ey * config.correction_factor;
        }
        self.render.heading = target.heading;
        self.render.is_moving = target.is_moving;
        self.render.move_mode = target.move_mode;

        let horizon = render_time_ms - config.history_ms;
        while self.keyframes.len() > 2
            && self
                .keyframes
                .front()
                .is_some_and(|k| k.server_time_ms < horizon)
        {
            self.keyframes.pop_front();
        }

        self.render
    }
}

// ---------------------------------------------------------------------------
// Synchronizer
// ---------------------------------------------------------------------------

/// Reconciles authoritative movement for every live entity.
#[derive(Debug, Clone)]
pub struct MovementSynchronizer {
    config: MovementConfig,
    epoch: u32,
    tick_rate: u32,
    entities: HashMap<EntityId, MotionRecord>,
    dropped_unknown_entity: u64,
    dropped_stale_epoch: u64,
}

impl Default for MovementSynchronizer {
    fn default() -> Self {
        Self::new(MovementConfig::default())
    }
}

impl MovementSynchronizer {
    /// Create an empty synchronizer at epoch 0.
    pub fn new(config: MovementConfig) -> Self {
        Self {
            config,
            epoch: 0,
            tick_rate: 0,
            entities: HashMap::new(),
            dropped_unknown_entity: 0,
            dropped_stale_epoch: 0,
        }
    }

    /// Start a new session epoch. Existing records stay but are reset by
    /// their first accepted update under the new epoch.
    pub fn set_stream_epoch(&mut self, epoch: u32, tick_rate: u32) {
        tracing::debug!(epoch, tick_rate, previous = self.epoch, "stream epoch set");
        self.epoch = epoch;
        self.tick_rate = tick_rate;
    }

    /// Current session epoch.
    pub fn stream_epoch(&self) -> u32 {
        self.epoch
    }

    /// Server ticks per second for the current epoch.
    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    /// Create or reset the record for `id` at the given position.
    pub fn init_entity(&mut self, id: EntityId, x: f64, y: f64, heading: f64) {
        self.entities
            .insert(id, MotionRecord::new(self.epoch, x, y, heading));
    }

    /// Drop the record for `id`. Later updates are ignored until it respawns.
    pub fn remove_entity(&mut self, id: EntityId) -> bool {
        self.entities.remove(&id).is_some()
    }

    /// Apply one authoritative snapshot.
    pub fn on_object_move(&mut self, sample: &MoveSample) -> MoveOutcome {
        let epoch = self.epoch;
        let Some(record) = self.entities.get_mut(&sample.entity_id) else {
            self.dropped_unknown_entity += 1;
            tracing::trace!(entity = sample.entity_id, "move for unknown entity dropped");
            return MoveOutcome::UnknownEntity;
        };

        if sample.stream_epoch != epoch {
            self.dropped_stale_epoch += 1;
            tracing::trace!(
                entity = sample.entity_id,
                sample_epoch = sample.stream_epoch,
                epoch,
                "move from other epoch dropped"
            );
            return MoveOutcome::StaleEpoch;
        }

        let epoch_reset = record.epoch != epoch;
        if epoch_reset {
            record.epoch = epoch;
            record.last_seq = None;
        }

        if !sample.is_teleport && record.last_seq.is_some_and(|last| sample.move_seq <= last) {
            record.ignored_out_of_order += 1;
            tracing::trace!(
                entity = sample.entity_id,
                seq = sample.move_seq,
                last = ?record.last_seq,
                "out-of-order move dropped"
            );
            return MoveOutcome::OutOfOrder;
        }

        record.store(sample);

        if epoch_reset {
            record.snap_to(sample);
            if sample.is_teleport {
                record.snaps += 1;
            }
            return MoveOutcome::EpochReset;
        }
        if sample.is_teleport {
            record.snap_to(sample);
            record.snaps += 1;
            return MoveOutcome::Teleported;
        }

        record.buffer(sample, self.config.max_keyframes);
        MoveOutcome::Accepted
    }

    /// Convenience wrapper for a decoded [`ObjectMove`].
    pub fn on_move_message(&mut self, msg: &ObjectMove) -> MoveOutcome {
        self.on_object_move(&MoveSample::from(msg))
    }

    /// The server instant to render this frame.
    ///
    /// Never less than one tick behind the estimated server time, so there is
    /// normally a keyframe on either side.
    pub fn render_time_ms(&self, time_sync: &TimeSync, client_now_ms: i64) -> f64 {
        let tick_ms = if self.tick_rate > 0 {
            1000.0 / f64::from(self.tick_rate)
        } else {
            0.0
        };
        let delay = time_sync.interpolation_delay_ms().max(tick_ms);
        time_sync.estimate_server_now_ms(client_now_ms) - delay
    }

    /// Advance every entity to `render_time_ms` and return where to draw them.
    pub fn update(&mut self, render_time_ms: f64) -> HashMap<EntityId, RenderPosition> {
        let config = &self.config;
        self.entities
            .iter_mut()
            .map(|(&id, record)| (id, record.advance(render_time_ms, config)))
            .collect()
    }

    /// Current render position without advancing.
    pub fn render_position(&self, id: EntityId) -> Option<RenderPosition> {
        self.entities.get(&id).map(|r| r.render)
    }

    /// Last accepted authoritative state.
    pub fn authoritative(&self, id: EntityId) -> Option<&AuthoritativeState> {
        self.entities.get(&id).map(|r| &r.authoritative)
    }

    /// Whether `id` has a record.
    pub fn has_entity(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// All tracked ids, in no particular order.
    pub fn tracked_ids(&self) -> Vec<EntityId> {
        self.entities.keys().copied().collect()
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether no entities are tracked.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Debug counters for one entity.
    pub fn entity_metrics(&self, id: EntityId) -> Option<EntityMotionMetrics> {
        self.entities.get(&id).map(|r| EntityMotionMetrics {
            entity_id: id,
            buffer_size: r.keyframes.len(),
            last_move_seq: r.last_seq,
            is_extrapolating: r.extrapolating,
            ignored_out_of_order: r.ignored_out_of_order,
            snap_count: r.snaps,
            buffer_underruns: r.buffer_underruns,
            render_x: r.render.x,
            render_y: r.render.y,
        })
    }

    /// Aggregated counters.
    pub fn metrics(&self) -> MovementMetrics {
        let mut metrics = MovementMetrics {
            entity_count: self.entities.len(),
            dropped_unknown_entity: self.dropped_unknown_entity,
            dropped_stale_epoch: self.dropped_stale_epoch,
            ..MovementMetrics::default()
        };
        for record in self.entities.values() {
            metrics.total_snaps += record.snaps;
            metrics.total_ignored_out_of_order += record.ignored_out_of_order;
            metrics.total_buffer_underruns += record.buffer_underruns;
        }
        metrics
    }

    /// Drop every record (world leave, disconnect).
    pub fn clear(&mut self) {
        self.entities.clear();
    }

    /// Drop every record and return to epoch 0.
    pub fn reset(&mut self) {
        self.clear();
        self.epoch = 0;
        self.tick_rate = 0;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
