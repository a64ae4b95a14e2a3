//! # Swarm Events
//!
//! Lifecycle events published by the orchestrator and consumed by live
//! clients. Every event carries an ever-increasing sequence id so a
//! disconnected client can resume from the last one it saw.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Kind of swarm event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SwarmEventKind {
    /// A swarm run began seeding
    SwarmStarted,
    /// A dynamic specialist agent was created
    AgentSpawned,
    /// An agent was admitted and is generating
    AgentActivated,
    /// An agent's generation failed (still charged against the cap)
    AgentFailed,
    /// The queue drained and gap analysis is running
    GapCheck,
    /// The run reached its terminal state
    SwarmCompleted,
    /// Debate phase started
    DebateStarted,
    /// One debate turn produced output
    DebateTurn,
    /// The synthesis artifact was produced
    SynthesisCompleted,
    /// A post was denied by the rate limiter
    RateLimitHit,
    /// A builder was dispatched
    BuilderQueued,
    /// Builder stage transition with percent
    BuilderProgress,
    /// Builder finished and persisted its artifact
    BuilderCompleted,
    /// Builder hit an unrecoverable error
    BuilderFailed,
}

/// An event in the swarm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmEvent {
    /// Monotonic sequence id, assigned at publish time
    #[serde(default)]
    pub seq: u64,
    /// Unique event ID
    pub id: String,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
    /// Kind of event
    pub kind: SwarmEventKind,
    /// Agent that produced this event
    pub agent: String,
    /// Conversation post this event belongs to, if any
    #[serde(default)]
    pub post_id: Option<String>,
    /// Associated data (JSON)
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl SwarmEvent {
    /// Create a new event (seq is assigned by the bus)
    pub fn new(kind: SwarmEventKind, agent: &str) -> Self {
        Self {
            seq: 0,
            id: event_id(),
            timestamp: Utc::now(),
            kind,
            agent: agent.to_string(),
            post_id: None,
            data: None,
        }
    }

    /// Add data to the event
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Tag the event with its conversation post
    pub fn with_post(mut self, post_id: &str) -> Self {
        self.post_id = Some(post_id.to_string());
        self
    }
}

/// Generate a simple unique event id
fn event_id() -> String {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos();
    format!("{:x}-{:x}", nanos, rand_u32())
}

/// Simple random number (not cryptographic)
fn rand_u32() -> u32 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    RandomState::new().build_hasher().finish() as u32
}

struct ReplayRing {
    next_seq: u64,
    buffer: VecDeque<SwarmEvent>,
    capacity: usize,
}

/// Publish/subscribe broadcast with replay
///
/// Publishing assigns the sequence id, appends the event to a bounded
/// replay ring, then broadcasts. A publish never fails: lagging or
/// absent subscribers are ignored.
pub struct EventBus {
    tx: broadcast::Sender<SwarmEvent>,
    ring: Mutex<ReplayRing>,
}

impl EventBus {
    /// Create a bus retaining up to `replay_capacity` events for resume
    pub fn new(replay_capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            tx,
            ring: Mutex::new(ReplayRing {
                next_seq: 1,
                buffer: VecDeque::with_capacity(replay_capacity),
                capacity: replay_capacity,
            }),
        }
    }

    /// Publish an event, returning its assigned sequence id
    ///
    /// The broadcast happens under the ring lock so concurrent publishers
    /// cannot deliver live events out of `seq` order; `send` never blocks.
    pub fn publish(&self, mut event: SwarmEvent) -> u64 {
        let mut ring = self.ring.lock().unwrap();
        event.seq = ring.next_seq;
        ring.next_seq += 1;
        if ring.buffer.len() == ring.capacity {
            ring.buffer.pop_front();
        }
        ring.buffer.push_back(event.clone());
        let seq = event.seq;
        // No subscribers is fine
        let _ = self.tx.send(event);
        seq
    }

    /// Subscribe to live events from this point on
    pub fn subscribe(&self) -> broadcast::Receiver<SwarmEvent> {
        self.tx.subscribe()
    }

    /// Events with seq greater than `since`, oldest first
    ///
    /// A client resuming after disconnect calls this with its last-seen
    /// sequence id, then switches to a live subscription.
    pub fn replay_since(&self, since: u64) -> Vec<SwarmEvent> {
        self.ring
            .lock()
            .unwrap()
            .buffer
            .iter()
            .filter(|e| e.seq > since)
            .cloned()
            .collect()
    }

    /// Sequence id of the most recently published event (0 if none)
    pub fn last_seq(&self) -> u64 {
        self.ring.lock().unwrap().next_seq - 1
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = SwarmEvent::new(SwarmEventKind::AgentActivated, "TechAnalyst")
            .with_post("post-1");
        assert_eq!(event.agent, "TechAnalyst");
        assert_eq!(event.post_id, Some("post-1".to_string()));
        assert_eq!(event.seq, 0);
    }

    #[test]
    fn test_publish_assigns_monotonic_seq() {
        let bus = EventBus::default();
        let a = bus.publish(SwarmEvent::new(SwarmEventKind::SwarmStarted, "controller"));
        let b = bus.publish(SwarmEvent::new(SwarmEventKind::AgentActivated, "a1"));
        let c = bus.publish(SwarmEvent::new(SwarmEventKind::SwarmCompleted, "controller"));
        assert!(a < b && b < c);
        assert_eq!(bus.last_seq(), c);
    }

    #[test]
    fn test_replay_since() {
        let bus = EventBus::default();
        for i in 0..5 {
            bus.publish(
                SwarmEvent::new(SwarmEventKind::BuilderProgress, "builder")
                    .with_data(serde_json::json!({ "step": i })),
            );
        }
        let replayed = bus.replay_since(3);
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0].seq, 4);
        assert_eq!(replayed[1].seq, 5);
    }

    #[test]
    fn test_replay_ring_is_bounded() {
        let bus = EventBus::new(3);
        for _ in 0..10 {
            bus.publish(SwarmEvent::new(SwarmEventKind::DebateTurn, "a"));
        }
        let replayed = bus.replay_since(0);
        assert_eq!(replayed.len(), 3);
        assert_eq!(replayed[0].seq, 8);
    }

    #[tokio::test]
    async fn test_live_subscription_receives_publishes() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(SwarmEvent::new(SwarmEventKind::SwarmStarted, "controller"));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, SwarmEventKind::SwarmStarted);
        assert_eq!(received.seq, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_publishers_deliver_in_seq_order() {
        let bus = std::sync::Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let mut tasks = Vec::new();
        for _ in 0..4 {
            let bus = std::sync::Arc::clone(&bus);
            tasks.push(tokio::spawn(async move {
                for _ in 0..25 {
                    bus.publish(SwarmEvent::new(SwarmEventKind::DebateTurn, "a"));
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        let mut last = 0;
        for _ in 0..100 {
            let event = rx.recv().await.unwrap();
            assert!(event.seq > last, "seq {} arrived after {}", event.seq, last);
            last = event.seq;
        }
        assert_eq!(last, 100);
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let bus = EventBus::default();
        let seq = bus.publish(SwarmEvent::new(SwarmEventKind::RateLimitHit, "agent"));
        assert_eq!(seq, 1);
    }
}
