//! # Swarm Orchestration
//!
//! One swarm run: seed agents for a topic, activate them in waves under
//! an activation cap and rate limits, recruit for coverage gaps, then
//! debate and synthesize. Lifecycle events stream out over the
//! [`events::EventBus`].

pub mod controller;
pub mod debate;
pub mod events;
pub mod gap;
pub mod state;

pub use controller::{SwarmConfig, SwarmController, SwarmOutcome};
pub use debate::{Stance, SYNTHESIS_AGENT};
pub use events::{EventBus, SwarmEvent, SwarmEventKind};
pub use state::{Admission, AgentRequest, RunPhase, SwarmState, TranscriptEntry, Urgency};
