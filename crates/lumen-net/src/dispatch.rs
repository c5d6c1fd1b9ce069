//! Message dispatch: route decoded server messages to per-kind handlers.
//!
//! The [`MessageDispatcher`] maps each [`MessageKind`] to at most one
//! [`MessageHandler`]. Handlers receive the message plus a caller-owned
//! context (`C`), so the state they mutate is passed in explicitly rather
//! than reached through globals.
//!
//! A failing handler never stops dispatch: errors and panics are caught,
//! logged and counted, and the next message is delivered normally.

use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::messages::{MessageKind, ServerMessage};

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Error returned by a handler that could not process its message.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    /// Build an error from anything displayable.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Trait for message handlers.
pub trait MessageHandler<C>: Send {
    /// Process a single message.
    fn handle(&mut self, msg: &ServerMessage, ctx: &mut C) -> Result<(), HandlerError>;
}

/// Blanket implementation for closures.
impl<C, F> MessageHandler<C> for F
where
    F: FnMut(&ServerMessage, &mut C) -> Result<(), HandlerError> + Send,
{
    fn handle(&mut self, msg: &ServerMessage, ctx: &mut C) -> Result<(), HandlerError> {
        self(msg, ctx)
    }
}

// ---------------------------------------------------------------------------
// Outcome and stats
// ---------------------------------------------------------------------------

/// What happened to one dispatched message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The registered handler ran and returned `Ok`.
    Handled,
    /// Known kind, but nothing registered for it.
    NoHandler,
    /// Kind not understood by this client.
    Unknown,
    /// The handler returned an error or panicked.
    HandlerFailed,
}

/// Lifetime dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Messages handed to a handler (successfully or not).
    pub dispatched: u64,
    /// Messages of an unknown kind.
    pub unknown: u64,
    /// Known messages without a handler.
    pub unhandled: u64,
    /// Handler errors plus panics.
    pub handler_failures: u64,
}

/// One entry of the recent-message ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugEntry {
    /// Wall-clock time of dispatch, ms since the Unix epoch.
    pub timestamp_ms: u128,
    /// Kind of the message, `None` when unknown.
    pub kind: Option<MessageKind>,
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Routes server messages to registered handlers by [`MessageKind`].
pub struct MessageDispatcher<C> {
    handlers: HashMap<MessageKind, Box<dyn MessageHandler<C>>>,
    stats: DispatchStats,
    history: VecDeque<DebugEntry>,
    history_capacity: usize,
}

impl<C> MessageDispatcher<C> {
    /// Create an empty dispatcher with the recent-message ring disabled.
    pub fn new() -> Self {
        Self::with_history(0)
    }

    /// Create an empty dispatcher remembering the last `capacity` messages.
    pub fn with_history(capacity: usize) -> Self {
        Self {
            handlers: HashMap::new(),
            stats: DispatchStats::default(),
            history: VecDeque::with_capacity(capacity),
            history_capacity: capacity,
        }
    }

    /// Register the handler for `kind`, replacing any previous one.
    pub fn register<H: MessageHandler<C> + 'static>(&mut self, kind: MessageKind, handler: H) {
        if self.handlers.insert(kind, Box::new(handler)).is_some() {
            tracing::debug!(?kind, "replaced message handler");
        }
    }

    /// Remove the handler for `kind`. Returns whether one was registered.
    pub fn unregister(&mut self, kind: MessageKind) -> bool {
        self.handlers.remove(&kind).is_some()
    }

    /// Whether a handler is registered for `kind`.
    pub fn has_handler(&self, kind: MessageKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Return an iterator over registered kinds (useful for startup logging).
    pub fn registered_kinds(&self) -> impl Iterator<Item = &MessageKind> {
        self.handlers.keys()
    }

    /// Deliver one message to its handler.
    pub fn dispatch(&mut self, msg: &ServerMessage, ctx: &mut C) -> DispatchOutcome {
        let kind = msg.kind();
        self.remember(kind);

        let Some(kind) = kind else {
            self.stats.unknown += 1;
            tracing::warn!(
                message = ?msg,
                unknown_total = self.stats.unknown,
                "unknown server message kind"
            );
            return DispatchOutcome::Unknown;
        };

        let Some(handler) = self.handlers.get_mut(&kind) else {
            self.stats.unhandled += 1;
            tracing::debug!(?kind, "no handler registered, dropping message");
            return DispatchOutcome::NoHandler;
        };

        self.stats.dispatched += 1;
        match catch_unwind(AssertUnwindSafe(|| handler.handle(msg, ctx))) {
            Ok(Ok(())) => DispatchOutcome::Handled,
            Ok(Err(err)) => {
                self.stats.handler_failures += 1;
                tracing::error!(?kind, error = %err, "message handler failed");
                DispatchOutcome::HandlerFailed
            }
            Err(panic) => {
                self.stats.handler_failures += 1;
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                tracing::error!(?kind, %reason, "message handler panicked");
                DispatchOutcome::HandlerFailed
            }
        }
    }

    /// Dispatch a batch in order. One failing message does not affect the rest.
    pub fn dispatch_all<'a, I>(&mut self, messages: I, ctx: &mut C)
    where
        I: IntoIterator<Item = &'a ServerMessage>,
    {
        for msg in messages {
            self.dispatch(msg, ctx);
        }
    }

    /// Lifetime counters.
    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Number of unknown-kind messages seen.
    pub fn unknown_message_count(&self) -> u64 {
        self.stats.unknown
    }

    /// The most recent messages, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &DebugEntry> {
        self.history.iter()
    }

    /// Forget the recent-message ring.
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    fn remember(&mut self, kind: Option<MessageKind>) {
        if self.history_capacity == 0 {
            return;
        }
        if self.history.len() == self.history_capacity {
            self.history.pop_front();
        }
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        self.history.push_back(DebugEntry { timestamp_ms, kind });
    }
}

impl<C> Default for MessageDispatcher<C> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::*;

    #[derive(Default)]
    struct Calls {
        log: Vec<&'static str>,
    }

    fn despawn(id: u64) -> ServerMessage {
        ServerMessage::ObjectDespawn(ObjectDespawn { entity_id: id })
    }

    fn leave() -> ServerMessage {
        ServerMessage::PlayerLeaveWorld(PlayerLeaveWorld { entity_id: 1 })
    }

    #[test]
    fn test_message_routed_to_correct_handler() {
        let mut dispatcher = MessageDispatcher::<Calls>::new();
        dispatcher.register(MessageKind::ObjectDespawn, |msg: &ServerMessage, ctx: &mut Calls| {
            assert!(matches!(msg, ServerMessage::ObjectDespawn(d) if d.entity_id == 7));
            ctx.log.push("despawn");
            Ok(())
        });

        let mut calls = Calls::default();
        let outcome = dispatcher.dispatch(&despawn(7), &mut calls);
        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(calls.log, vec!["despawn"]);

        // A different kind does not reach the despawn handler.
        assert_eq!(dispatcher.dispatch(&leave(), &mut calls), DispatchOutcome::NoHandler);
        assert_eq!(calls.log.len(), 1);
    }

    #[test]
    fn test_second_registration_replaces_first() {
        let mut dispatcher = MessageDispatcher::<Calls>::new();
        dispatcher.register(MessageKind::ObjectDespawn, |_: &ServerMessage, ctx: &mut Calls| {
            ctx.log.push("first");
            Ok(())
        });
        dispatcher.register(MessageKind::ObjectDespawn, |_: &ServerMessage, ctx: &mut Calls| {
            ctx.log.push("second");
            Ok(())
        });

        let mut calls = Calls::default();
        dispatcher.dispatch(&despawn(1), &mut calls);
        assert_eq!(calls.log, vec!["second"]);
    }

    #[test]
    fn test_failing_handler_does_not_block_others() {
        let mut dispatcher = MessageDispatcher::<Calls>::new();
        dispatcher.register(MessageKind::ObjectDespawn, |_: &ServerMessage, _: &mut Calls| {
            Err(HandlerError::new("inventory view missing"))
        });
        dispatcher.register(MessageKind::PlayerLeaveWorld, |_: &ServerMessage, ctx: &mut Calls| {
            ctx.log.push("leave");
            Ok(())
        });

        let mut calls = Calls::default();
        let batch = [despawn(1), leave()];
        dispatcher.dispatch_all(&batch, &mut calls);

        assert_eq!(calls.log, vec!["leave"]);
        assert_eq!(dispatcher.stats().handler_failures, 1);
        assert_eq!(dispatcher.stats().dispatched, 2);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let mut dispatcher = MessageDispatcher::<Calls>::new();
        dispatcher.register(MessageKind::ObjectDespawn, |_: &ServerMessage, _: &mut Calls| {
            panic!("handler bug");
        });
        dispatcher.register(MessageKind::PlayerLeaveWorld, |_: &ServerMessage, ctx: &mut Calls| {
            ctx.log.push("leave");
            Ok(())
        });

        let mut calls = Calls::default();
        assert_eq!(
            dispatcher.dispatch(&despawn(1), &mut calls),
            DispatchOutcome::HandlerFailed
        );
        assert_eq!(dispatcher.dispatch(&leave(), &mut calls), DispatchOutcome::Handled);
        assert_eq!(calls.log, vec!["leave"]);
    }

    #[test]
    fn test_unknown_kind_counted_not_fatal() {
        let mut dispatcher = MessageDispatcher::<Calls>::new();
        let mut calls = Calls::default();

        let outcome = dispatcher.dispatch(&ServerMessage::Unknown { kind: 4242 }, &mut calls);
        assert_eq!(outcome, DispatchOutcome::Unknown);
        assert_eq!(dispatcher.unknown_message_count(), 1);
        assert_eq!(dispatcher.stats().dispatched, 0);
    }

    #[test]
    fn test_unregister_drops_messages() {
        let mut dispatcher = MessageDispatcher::<Calls>::new();
        dispatcher.register(MessageKind::ObjectDespawn, |_: &ServerMessage, ctx: &mut Calls| {
            ctx.log.push("despawn");
            Ok(())
        });
        assert!(dispatcher.unregister(MessageKind::ObjectDespawn));
        assert!(!dispatcher.has_handler(MessageKind::ObjectDespawn));

        let mut calls = Calls::default();
        assert_eq!(
            dispatcher.dispatch(&despawn(1), &mut calls),
            DispatchOutcome::NoHandler
        );
        assert_eq!(dispatcher.stats().unhandled, 1);
        assert!(calls.log.is_empty());
    }

    #[test]
    fn test_history_ring_is_bounded() {
        let mut dispatcher = MessageDispatcher::<Calls>::with_history(2);
        let mut calls = Calls::default();
        dispatcher.dispatch(&despawn(1), &mut calls);
        dispatcher.dispatch(&leave(), &mut calls);
        dispatcher.dispatch(&ServerMessage::Unknown { kind: 99 }, &mut calls);

        let kinds: Vec<_> = dispatcher.history().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![Some(MessageKind::PlayerLeaveWorld), None]);

        dispatcher.clear_history();
        assert_eq!(dispatcher.history().count(), 0);
    }

    #[test]
    fn test_history_disabled_by_default() {
        let mut dispatcher = MessageDispatcher::<Calls>::new();
        dispatcher.dispatch(&despawn(1), &mut Calls::default());
        assert_eq!(dispatcher.history().count(), 0);
    }
}
