//! # Swarm Run State
//!
//! Per-conversation aggregate for one orchestration run. Lives only for
//! the run's duration; a process restart abandons it (downstream
//! artifacts are idempotently derivable from what was persisted).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Mutex;

/// How urgently a queued agent request should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    High,
}

/// A queued request for one agent activation
///
/// Ephemeral: queued once, consumed once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    /// Agent identity to activate
    pub agent: String,
    /// What the agent is being asked to do
    pub task: String,
    #[serde(default)]
    pub urgency: Urgency,
    /// Agent that asked for this activation, if not the seeder
    #[serde(default)]
    pub requested_by: Option<String>,
    /// Wave this request belongs to (1 = seed wave)
    pub wave: u32,
}

impl AgentRequest {
    pub fn seed(agent: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            task: task.into(),
            urgency: Urgency::Normal,
            requested_by: None,
            wave: 1,
        }
    }

    pub fn follow_up(
        agent: impl Into<String>,
        task: impl Into<String>,
        requested_by: impl Into<String>,
        wave: u32,
    ) -> Self {
        Self {
            agent: agent.into(),
            task: task.into(),
            urgency: Urgency::Normal,
            requested_by: Some(requested_by.into()),
            wave,
        }
    }
}

/// One agent contribution in the running transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub agent: String,
    pub text: String,
}

impl TranscriptEntry {
    pub fn new(agent: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            text: text.into(),
        }
    }
}

/// Render transcript entries for use as prompt context
pub fn render_transcript(entries: &[TranscriptEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("[{}] {}", e.agent, e.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Phase of one orchestration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Choosing and enqueueing the initial agent set
    Seeding,
    /// Dequeueing requests and invoking generation
    Activating,
    /// Queue drained, deciding whether to recruit more agents
    GapCheck,
    /// Terminal: cap reached or nothing left to do
    Drained,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Drained)
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunPhase::Seeding => "seeding",
            RunPhase::Activating => "activating",
            RunPhase::GapCheck => "gap_check",
            RunPhase::Drained => "drained",
        }
    }
}

/// Outcome of asking to admit one agent activation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Slot charged; caller should activate the agent
    Admitted,
    /// Agent already responded; drop without charging the cap
    Duplicate,
    /// Activation cap reached; the run is over
    CapReached,
}

struct ActivationLedger {
    count: usize,
    responded: HashSet<String>,
}

/// Per-conversation aggregate for one run
///
/// The activation counter and responded-set are mutated under a single
/// mutex; every other field is read-only after construction.
pub struct SwarmState {
    /// Post that triggered the run
    pub post_id: String,
    /// Parent post, when the trigger was itself a reply
    pub parent_id: Option<String>,
    /// Originating content / topic
    pub content: String,
    /// Hard ceiling on activations for this run
    pub max_activations: usize,
    ledger: Mutex<ActivationLedger>,
}

impl SwarmState {
    pub fn new(
        post_id: impl Into<String>,
        parent_id: Option<String>,
        content: impl Into<String>,
        max_activations: usize,
    ) -> Self {
        Self {
            post_id: post_id.into(),
            parent_id,
            content: content.into(),
            max_activations,
            ledger: Mutex::new(ActivationLedger {
                count: 0,
                responded: HashSet::new(),
            }),
        }
    }

    /// Atomically check-and-admit one activation
    ///
    /// Dedup and increment-and-check happen in one step under the mutex,
    /// so `activation_count <= max_activations` holds at every observed
    /// point. Duplicates never charge the cap.
    pub fn try_admit(&self, agent: &str) -> Admission {
        let mut ledger = self.ledger.lock().unwrap();
        if ledger.responded.contains(agent) {
            return Admission::Duplicate;
        }
        if ledger.count >= self.max_activations {
            return Admission::CapReached;
        }
        ledger.count += 1;
        ledger.responded.insert(agent.to_string());
        Admission::Admitted
    }

    pub fn activation_count(&self) -> usize {
        self.ledger.lock().unwrap().count
    }

    pub fn has_responded(&self, agent: &str) -> bool {
        self.ledger.lock().unwrap().responded.contains(agent)
    }

    /// Agents that have responded so far, sorted for stable output
    pub fn responded(&self) -> Vec<String> {
        let mut agents: Vec<String> = self
            .ledger
            .lock()
            .unwrap()
            .responded
            .iter()
            .cloned()
            .collect();
        agents.sort();
        agents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_charges_cap_once_per_agent() {
        let state = SwarmState::new("post-1", None, "topic", 3);
        assert_eq!(state.try_admit("a"), Admission::Admitted);
        assert_eq!(state.try_admit("a"), Admission::Duplicate);
        assert_eq!(state.activation_count(), 1);
    }

    #[test]
    fn test_cap_reached_is_terminal() {
        let state = SwarmState::new("post-1", None, "topic", 2);
        assert_eq!(state.try_admit("a"), Admission::Admitted);
        assert_eq!(state.try_admit("b"), Admission::Admitted);
        assert_eq!(state.try_admit("c"), Admission::CapReached);
        assert_eq!(state.activation_count(), 2);
    }

    #[test]
    fn test_cap_invariant_under_random_bursts() {
        use rand::Rng;
        let mut rng = rand::thread_rng();

        for _ in 0..50 {
            let cap = rng.gen_range(1..10);
            let state = SwarmState::new("post-1", None, "topic", cap);
            let burst: usize = rng.gen_range(1..40);
            for _ in 0..burst {
                let agent = format!("agent-{}", rng.gen_range(0..15));
                state.try_admit(&agent);
                assert!(state.activation_count() <= cap);
            }
            // Responded set tracks admitted agents exactly
            assert_eq!(state.responded().len(), state.activation_count());
        }
    }

    #[test]
    fn test_concurrent_admission_holds_invariant() {
        use std::sync::Arc;
        let state = Arc::new(SwarmState::new("post-1", None, "topic", 5));
        let mut handles = Vec::new();
        for i in 0..20 {
            let state = Arc::clone(&state);
            handles.push(std::thread::spawn(move || {
                state.try_admit(&format!("agent-{}", i % 8));
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(state.activation_count() <= 5);
        assert_eq!(state.responded().len(), state.activation_count());
    }

    #[test]
    fn test_run_phase_terminal() {
        assert!(!RunPhase::Activating.is_terminal());
        assert!(RunPhase::Drained.is_terminal());
        assert_eq!(RunPhase::GapCheck.label(), "gap_check");
    }
}
