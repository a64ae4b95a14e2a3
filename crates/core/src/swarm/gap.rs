//! # Gap Analyzer
//!
//! Meta-reasoning step invoked when the activation queue drains: one
//! structured generation call deciding whether unmet angles justify
//! recruiting more agents. Fail-safe by construction - any generation or
//! parse failure degrades to "no gaps", never into uncontrolled spawning.

use serde::Deserialize;

use crate::generation::{GenerationRequest, GenerationService};
use crate::swarm::state::AgentRequest;

/// Hard cap on recommendations per gap check
pub const MAX_GAP_RESULTS: usize = 2;

const SYSTEM_PROMPT: &str = "\
You review a multi-agent discussion and decide if a genuine coverage gap \
remains. Respond with a JSON array of at most 2 objects, each \
{\"agent\": \"<name from the available list>\", \"task\": \"<one sentence>\"}. \
Return [] unless there is a genuine, on-topic, non-duplicative gap that one \
of the available agents would meaningfully fill. Do not invent agent names. \
No prose outside the JSON.";

#[derive(Debug, Deserialize)]
struct GapRecommendation {
    agent: String,
    #[serde(default)]
    task: String,
}

/// Pull the first JSON array out of a reply that may wrap it in fences
/// or prose
fn parse_recommendations(text: &str) -> Option<Vec<GapRecommendation>> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end_matches("```"))
        .unwrap_or(trimmed);

    let start = body.find('[')?;
    let end = body.rfind(']')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&body[start..=end]).ok()
}

/// Decide whether unmet angles justify recruiting more agents
///
/// Returns 0 to [`MAX_GAP_RESULTS`] requests, filtered to agents that are
/// in `known` and not in `responded`. Never errors.
pub async fn find_gaps(
    generation: &dyn GenerationService,
    topic: &str,
    transcript: &str,
    responded: &[String],
    known: &[String],
    wave: u32,
) -> Vec<AgentRequest> {
    let available: Vec<&String> = known.iter().filter(|a| !responded.contains(a)).collect();
    if available.is_empty() {
        return Vec::new();
    }

    let input = format!(
        "Topic: {}\n\nAgents that already responded: {}\n\nAvailable agents: {}\n\nDiscussion so far:\n{}",
        topic,
        responded.join(", "),
        available
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        transcript
    );

    let reply = match generation
        .generate(GenerationRequest::new(SYSTEM_PROMPT, input))
        .await
    {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!("Gap analysis generation failed: {}", e);
            return Vec::new();
        }
    };

    let recommendations = match parse_recommendations(&reply.text) {
        Some(recs) => recs,
        None => {
            tracing::warn!("Gap analysis returned unparseable output, treating as no gaps");
            return Vec::new();
        }
    };

    recommendations
        .into_iter()
        .filter(|r| {
            let known_agent = known.iter().any(|k| k.eq_ignore_ascii_case(&r.agent));
            let already = responded.iter().any(|a| a.eq_ignore_ascii_case(&r.agent));
            if !known_agent {
                tracing::debug!(agent = %r.agent, "Gap analysis recommended unknown agent, dropping");
            }
            known_agent && !already
        })
        .take(MAX_GAP_RESULTS)
        .map(|r| AgentRequest {
            agent: r.agent,
            task: if r.task.is_empty() {
                format!("Cover a remaining angle on: {}", topic)
            } else {
                r.task
            },
            urgency: Default::default(),
            requested_by: None,
            wave,
        })
        .collect()
}
