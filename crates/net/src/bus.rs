//! Typed publish/subscribe for inbound session events.
//!
//! Each subscription owns its own queue, so several subscribers to the same
//! kind see every event independently and removing one leaves the rest alone.

use crate::protocol::ServerMessage;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::trace;

/// Event delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A message pushed by the server.
    Server(ServerMessage),
    /// Synthetic event raised when the transport is lost.
    Disconnected {
        /// Transport-level reason.
        reason: String,
    },
}

impl SessionEvent {
    /// Routing key of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::Disconnected { .. } => EventKind::Disconnected,
            SessionEvent::Server(msg) => match msg {
                ServerMessage::HandshakeResponse { .. } => EventKind::HandshakeAck,
                ServerMessage::EntitySpawned(_) => EventKind::EntitySpawned,
                ServerMessage::EntityMoved(_) | ServerMessage::EntitiesMoved(_) => {
                    EventKind::EntityMoved
                }
                ServerMessage::EntityStateChanged { .. } => EventKind::EntityStateChanged,
                ServerMessage::EntityDespawned { .. } => EventKind::EntityDespawned,
                ServerMessage::PlayerRespawned { .. } => EventKind::PlayerRespawned,
                ServerMessage::PetEquipped { .. } => EventKind::PetEquipped,
                ServerMessage::PetUnequipped { .. } => EventKind::PetUnequipped,
                ServerMessage::PetUpdated { .. } => EventKind::PetUpdated,
                ServerMessage::Kicked { .. } => EventKind::Kicked,
                ServerMessage::ServerShutdown { .. } => EventKind::ServerShutdown,
                ServerMessage::Disconnect { .. } => EventKind::ServerDisconnect,
            },
        }
    }
}

/// Names of the inbound events a caller can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Handshake confirmation or rejection.
    HandshakeAck,
    /// Entity join/spawn.
    EntitySpawned,
    /// Single or batched entity movement.
    EntityMoved,
    /// Discrete state change.
    EntityStateChanged,
    /// Entity leave/despawn/death.
    EntityDespawned,
    /// Player respawn.
    PlayerRespawned,
    /// Companion equipped.
    PetEquipped,
    /// Companion unequipped.
    PetUnequipped,
    /// Companion sync.
    PetUpdated,
    /// Kick notice.
    Kicked,
    /// Shutdown notice.
    ServerShutdown,
    /// Server-initiated disconnect notice.
    ServerDisconnect,
    /// Transport lost (synthetic).
    Disconnected,
}

/// Handle identifying one subscription, used for targeted removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Receiving end of one subscription.
#[derive(Debug)]
pub struct Subscription {
    id: HandlerId,
    kind: EventKind,
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Subscription {
    /// Handle to pass to [`EventBus::unsubscribe`].
    pub fn id(&self) -> HandlerId {
        self.id
    }

    /// Event kind this subscription listens to.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Wait for the next event; `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    /// Take the next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.rx.try_recv().ok()
    }
}

/// Registry of subscribers keyed by event kind.
#[derive(Debug, Default)]
pub struct EventBus {
    next_id: u64,
    handlers: HashMap<EventKind, Vec<(HandlerId, mpsc::UnboundedSender<SessionEvent>)>>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new, independent subscriber for `kind`.
    pub fn subscribe(&mut self, kind: EventKind) -> Subscription {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.handlers.entry(kind).or_default().push((id, tx));
        Subscription { id, kind, rx }
    }

    /// Remove exactly one subscriber. Returns false if it was not registered.
    pub fn unsubscribe(&mut self, id: HandlerId) -> bool {
        for handlers in self.handlers.values_mut() {
            if let Some(index) = handlers.iter().position(|(handler, _)| *handler == id) {
                handlers.remove(index);
                return true;
            }
        }
        false
    }

    /// Deliver `event` to every subscriber of its kind.
    ///
    /// Subscribers whose receiver was dropped are pruned. Returns how many
    /// subscribers received the event.
    pub fn dispatch(&mut self, event: &SessionEvent) -> usize {
        let kind = event.kind();
        let Some(handlers) = self.handlers.get_mut(&kind) else {
            return 0;
        };
        handlers.retain(|(_, tx)| tx.send(event.clone()).is_ok());
        trace!("Dispatched {:?} to {} subscribers", kind, handlers.len());
        handlers.len()
    }

    /// Number of live subscribers for `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Drop every subscriber.
    pub fn clear(&mut self) {
        self.handlers.clear();
    }
}
