//! # Debate & Synthesis
//!
//! Second phase of a run: a bounded random subset of the agents that
//! already produced findings cross-examines them, then one synthesis
//! call folds everything into a single consensus artifact. The whole
//! phase is best-effort - a run that produces no debate output still
//! proceeds to the builder with whatever transcript exists.

use rand::seq::SliceRandom;
use rand::Rng;
use std::time::Duration;

use crate::generation::{GenerationRequest, GenerationService};
use crate::limits::RateLimiter;
use crate::store::{NewPost, Store};
use crate::swarm::events::{EventBus, SwarmEvent, SwarmEventKind};
use crate::swarm::state::{render_transcript, TranscriptEntry};

/// Fixed identity the synthesis artifact is always attributed to
pub const SYNTHESIS_AGENT: &str = "synthesis";

/// Position a debating agent is asked to take
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stance {
    /// Attack the weakest claim made so far
    Challenge,
    /// Add evidence to the strongest claim
    Reinforce,
    /// Connect two findings others treated as unrelated
    Bridge,
    /// Disagree with the emerging consensus
    Dissent,
}

impl Stance {
    pub fn all() -> &'static [Stance] {
        &[
            Stance::Challenge,
            Stance::Reinforce,
            Stance::Bridge,
            Stance::Dissent,
        ]
    }

    pub fn label(&self) -> &'static str {
        match self {
            Stance::Challenge => "challenge",
            Stance::Reinforce => "reinforce",
            Stance::Bridge => "bridge",
            Stance::Dissent => "dissent",
        }
    }

    fn instruction(&self) -> &'static str {
        match self {
            Stance::Challenge => {
                "Challenge the weakest or least supported claim in the discussion."
            }
            Stance::Reinforce => {
                "Reinforce the strongest claim with additional evidence or reasoning."
            }
            Stance::Bridge => {
                "Bridge two findings the other agents treated as unrelated."
            }
            Stance::Dissent => {
                "Dissent from the emerging consensus and explain what it misses."
            }
        }
    }
}

const SYNTHESIS_PROMPT: &str = "\
You write the consensus synthesis of a multi-agent discussion. Rules: \
weight evidence by source quality; attribute every claim to the agent \
that produced it; rate confidence (high/medium/low) for each claim; end \
with an explicit list of unresolved disagreements and blind spots. Be \
concise and concrete.";

/// Run the debate phase, appending turns to the transcript
///
/// A random subset of up to `debate_cap` responded agents takes one
/// stance each, in sequence with small randomized delays. A failed or
/// rate-limited turn is skipped. Returns the number of turns appended.
pub async fn run_debate(
    generation: &dyn GenerationService,
    events: &EventBus,
    limiter: &RateLimiter,
    post_id: &str,
    topic: &str,
    responded: &[String],
    transcript: &mut Vec<TranscriptEntry>,
    debate_cap: usize,
    jitter_ms: u64,
) -> usize {
    if responded.is_empty() || transcript.is_empty() || debate_cap == 0 {
        return 0;
    }

    let debaters: Vec<String> = {
        let mut rng = rand::thread_rng();
        responded
            .choose_multiple(&mut rng, debate_cap.min(responded.len()))
            .cloned()
            .collect()
    };

    events.publish(
        SwarmEvent::new(SwarmEventKind::DebateStarted, "controller")
            .with_post(post_id)
            .with_data(serde_json::json!({ "participants": debaters })),
    );

    let mut turns = 0;
    for (i, agent) in debaters.iter().enumerate() {
        // Staged turns are exempt from the thread cooldown (the agent
        // just posted its findings) but still spend daily budget.
        if !limiter.can_post(agent, Some(post_id), true) {
            continue;
        }

        if jitter_ms > 0 {
            let delay = rand::thread_rng().gen_range(0..=jitter_ms);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let stance = Stance::all()[i % Stance::all().len()];
        let others: Vec<&String> = debaters.iter().filter(|d| *d != agent).collect();
        let system = format!(
            "You are {} in a panel debate on \"{}\". {} Reference the \
             accumulated discussion and name at least one other agent \
             (for example {}) when you agree or disagree with them.",
            agent,
            topic,
            stance.instruction(),
            others
                .first()
                .map(|s| s.as_str())
                .unwrap_or("a fellow panelist"),
        );

        let reply = match generation
            .generate(GenerationRequest::new(system, render_transcript(transcript)))
            .await
        {
            Ok(reply) if !reply.text.is_empty() => reply,
            Ok(_) => {
                tracing::debug!(agent = %agent, "Debate turn produced no text, skipping");
                continue;
            }
            Err(e) => {
                tracing::warn!(agent = %agent, "Debate turn failed: {}", e);
                continue;
            }
        };

        limiter.record_post(agent, Some(post_id));
        transcript.push(TranscriptEntry::new(agent.clone(), reply.text));
        turns += 1;

        events.publish(
            SwarmEvent::new(SwarmEventKind::DebateTurn, agent)
                .with_post(post_id)
                .with_data(serde_json::json!({ "stance": stance.label() })),
        );
    }

    turns
}

/// Produce the single consensus artifact
///
/// One generation call; the result is persisted as a post authored by
/// the fixed [`SYNTHESIS_AGENT`] identity and appended to the transcript.
/// Returns the synthesis text, or `None` when generation failed or was
/// rate-limited.
pub async fn synthesize(
    generation: &dyn GenerationService,
    events: &EventBus,
    store: &dyn Store,
    limiter: &RateLimiter,
    post_id: &str,
    topic: &str,
    transcript: &mut Vec<TranscriptEntry>,
) -> Option<String> {
    if transcript.is_empty() {
        return None;
    }
    if !limiter.can_post(SYNTHESIS_AGENT, Some(post_id), true) {
        return None;
    }

    let input = format!(
        "Topic: {}\n\nDiscussion:\n{}",
        topic,
        render_transcript(transcript)
    );
    let reply = match generation
        .generate(GenerationRequest::new(SYNTHESIS_PROMPT, input))
        .await
    {
        Ok(reply) if !reply.text.is_empty() => reply,
        Ok(_) => return None,
        Err(e) => {
            tracing::warn!("Synthesis failed: {}", e);
            return None;
        }
    };

    if let Err(e) = store
        .create_post(NewPost {
            parent_id: Some(post_id.to_string()),
            author: SYNTHESIS_AGENT.to_string(),
            content: reply.text.clone(),
        })
        .await
    {
        tracing::warn!("Failed to persist synthesis post: {}", e);
    }
    limiter.record_post(SYNTHESIS_AGENT, Some(post_id));

    transcript.push(TranscriptEntry::new(SYNTHESIS_AGENT, reply.text.clone()));
    events.publish(
        SwarmEvent::new(SwarmEventKind::SynthesisCompleted, SYNTHESIS_AGENT).with_post(post_id),
    );

    Some(reply.text)
}
