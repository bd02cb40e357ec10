//! Outbound intent batching with delta-compressed movement.
//!
//! Gameplay code queues intents at any rate; a fixed-cadence flush hands the
//! whole queue to the channel as one [`BatchEnvelope`]. Movement is sent as an
//! absolute position once, then as displacements from the last sent position.

use crate::protocol::{
    BatchEntry, BatchEnvelope, ClientMessage, IntentKind, IntentPayload, Movement,
};
use crate::session::Publish;
use klyra_core::{Timestamp, Vec2};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Batcher tuning, read from the `[batcher]` config section.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BatcherConfig {
    /// Flush cadence in milliseconds.
    pub flush_interval_ms: u64,
    /// Per-axis displacement below which a move is suppressed.
    pub movement_threshold: f32,
    /// Queue bound while the channel is down. Values below 2 act as 2, so a
    /// movement and one other intent always fit.
    pub max_queued_intents: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 50,
            movement_threshold: 1.0,
            max_queued_intents: 256,
        }
    }
}

/// Smallest queue that can always make room by folding two moves or dropping
/// a non-move.
const MIN_QUEUE_BOUND: usize = 2;

/// Reference position for delta compression of one local actor.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeltaMovementState {
    last_sent: Option<Vec2>,
}

impl DeltaMovementState {
    /// Last position the server can reconstruct, if any was sent.
    pub fn last_sent(&self) -> Option<Vec2> {
        self.last_sent
    }

    /// Forget the reference; the next movement is sent absolute.
    pub fn reset(&mut self) {
        self.last_sent = None;
    }

    /// Movement to send for `position`, or `None` when suppressed.
    ///
    /// Suppressed moves leave the reference untouched so sub-threshold jitter
    /// accumulates until it crosses the threshold. The new reference is
    /// `last + delta`, the exact value a receiver gets by replaying the delta.
    pub fn next(&mut self, position: Vec2, threshold: f32) -> Option<Movement> {
        let Some(last) = self.last_sent else {
            self.last_sent = Some(position);
            return Some(Movement::Absolute { position });
        };

        let delta = position - last;
        if delta.x.abs() < threshold && delta.y.abs() < threshold {
            return None;
        }

        self.last_sent = Some(last + delta);
        Some(Movement::Delta { delta })
    }
}

/// Result of one flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was queued; nothing was sent.
    Empty,
    /// This many entries went out in one envelope.
    Sent(usize),
    /// Channel down; this many entries stay queued.
    Deferred(usize),
}

/// Owns the outbound queue and the local actor's delta state.
#[derive(Debug, Default)]
pub struct OutboundBatcher {
    config: BatcherConfig,
    queue: VecDeque<BatchEntry>,
    movement: DeltaMovementState,
    stalled: bool,
}

impl OutboundBatcher {
    /// Create an empty batcher.
    pub fn new(config: BatcherConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Flush cadence.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.config.flush_interval_ms.max(1))
    }

    /// Queue an intent for the next flush.
    pub fn queue_update(&mut self, kind: IntentKind, data: IntentPayload) {
        self.push(BatchEntry {
            kind,
            data,
            timestamp: Timestamp::now(),
        });
    }

    /// Queue the local actor's movement, delta-compressed.
    ///
    /// Returns the movement that was queued, or `None` if it was suppressed.
    pub fn send_movement(&mut self, position: Vec2) -> Option<Movement> {
        let movement = self
            .movement
            .next(position, self.config.movement_threshold);
        match movement {
            Some(movement) => {
                trace!("Queued movement {:?}", movement);
                self.queue_update(IntentKind::Move, IntentPayload::Move(movement));
            }
            None => trace!("Suppressed sub-threshold movement to {}", position),
        }
        movement
    }

    /// Forget the delta reference after an authoritative position reset.
    pub fn reset_movement(&mut self) {
        debug!("Movement reference reset");
        self.movement.reset();
    }

    /// Delta compression state.
    pub fn movement(&self) -> &DeltaMovementState {
        &self.movement
    }

    /// Send every queued entry as one envelope if the channel is up.
    pub fn flush(&mut self, channel: &impl Publish) -> FlushOutcome {
        if self.queue.is_empty() {
            return FlushOutcome::Empty;
        }

        if !channel.is_connected() {
            if !self.stalled {
                debug!("Channel down; holding {} queued intents", self.queue.len());
            }
            self.stalled = true;
            return FlushOutcome::Deferred(self.queue.len());
        }

        let entries: Vec<BatchEntry> = self.queue.drain(..).collect();
        let count = entries.len();
        channel.publish(ClientMessage::Batch(BatchEnvelope { entries }));
        self.stalled = false;
        trace!("Flushed {} intents", count);
        FlushOutcome::Sent(count)
    }

    /// Entries waiting for the next flush, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = &BatchEntry> {
        self.queue.iter()
    }

    /// Number of queued entries.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drop everything queued and the delta reference.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.movement.reset();
        self.stalled = false;
    }

    fn push(&mut self, entry: BatchEntry) {
        if self.stalled && self.coalesce_move(&entry) {
            return;
        }

        if self.queue.len() >= self.config.max_queued_intents.max(MIN_QUEUE_BOUND) {
            self.make_room();
        }
        self.queue.push_back(entry);
    }

    /// Fold a movement into a trailing queued movement. The reconstructed
    /// position is the same as sending both.
    fn coalesce_move(&mut self, entry: &BatchEntry) -> bool {
        let IntentPayload::Move(next) = entry.data else {
            return false;
        };
        let Some(last) = self.queue.back_mut() else {
            return false;
        };
        let IntentPayload::Move(prev) = &mut last.data else {
            return false;
        };

        *prev = merge_moves(*prev, next);
        last.timestamp = entry.timestamp;
        true
    }

    fn make_room(&mut self) {
        if let Some(index) = self
            .queue
            .iter()
            .position(|entry| entry.kind != IntentKind::Move)
        {
            if let Some(dropped) = self.queue.remove(index) {
                warn!(
                    "Outbound queue full ({}); dropped oldest {:?} intent",
                    self.config.max_queued_intents, dropped.kind
                );
            }
            return;
        }

        // Only movement queued: fold the two oldest together.
        if self.queue.len() >= 2 {
            if let (Some(first), Some(second)) = (self.queue.pop_front(), self.queue.pop_front()) {
                let merged = match (&first.data, &second.data) {
                    (IntentPayload::Move(a), IntentPayload::Move(b)) => Some(merge_moves(*a, *b)),
                    _ => None,
                };
                match merged {
                    Some(movement) => self.queue.push_front(BatchEntry {
                        kind: IntentKind::Move,
                        data: IntentPayload::Move(movement),
                        timestamp: second.timestamp,
                    }),
                    None => {
                        warn!("Outbound queue full; dropped oldest movement intent");
                        self.queue.push_front(second);
                    }
                }
            }
        }
    }
}

fn merge_moves(first: Movement, second: Movement) -> Movement {
    match (first, second) {
        (_, Movement::Absolute { position }) => Movement::Absolute { position },
        (Movement::Absolute { position }, Movement::Delta { delta }) => Movement::Absolute {
            position: position + delta,
        },
        (Movement::Delta { delta: a }, Movement::Delta { delta: b }) => {
            Movement::Delta { delta: a + b }
        }
    }
}
