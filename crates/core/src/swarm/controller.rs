//! # Swarm Controller
//!
//! Drives one orchestration run end to end: seed the queue for a topic,
//! dequeue agent requests with a bounded wait, activate them under the
//! activation cap and rate limits, feed tool-driven follow-up spawns back
//! into the queue, run bounded gap checks when the queue drains, then
//! debate, synthesize, and dispatch the background builder.

use rand::Rng;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::agents::{roster_agent, select_initial_agents, AgentFactory, DynamicAgentRegistry};
use crate::builder::{BuilderPipeline, BuilderRequest};
use crate::generation::{GenerationRequest, GenerationService, ToolSpec};
use crate::limits::RateLimiter;
use crate::store::{NewPost, Store};
use crate::swarm::debate::{run_debate, synthesize};
use crate::swarm::events::{EventBus, SwarmEvent, SwarmEventKind};
use crate::swarm::gap::find_gaps;
use crate::swarm::state::{
    render_transcript, Admission, AgentRequest, RunPhase, SwarmState, TranscriptEntry,
};

/// Tool the generation service may call to recruit a specialist
const SPAWN_TOOL: &str = "spawn_agent";

/// Most specialists one reply may recruit, tool calls and mentions combined
const MAX_RECRUITS_PER_REPLY: usize = 2;

/// Tuning for one swarm run
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Hard ceiling on activations per run
    pub max_activations: usize,
    /// Bounded wait on an empty queue before a gap check fires
    pub dequeue_wait: Duration,
    /// How many times a drained queue may trigger gap analysis
    pub max_gap_checks: u32,
    /// How many responded agents join the debate phase
    pub debate_cap: usize,
    /// Upper bound on the randomized delay between turns, in ms
    pub jitter_ms: u64,
    /// Skip the debate and synthesis phase entirely
    pub skip_debate: bool,
    /// Suppress the builder's "artifact ready" notice post
    pub silent: bool,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            max_activations: 8,
            dequeue_wait: Duration::from_secs(5),
            max_gap_checks: 2,
            debate_cap: 3,
            jitter_ms: 0,
            skip_debate: false,
            silent: false,
        }
    }
}

impl SwarmConfig {
    pub fn with_max_activations(mut self, max: usize) -> Self {
        self.max_activations = max;
        self
    }

    pub fn with_dequeue_wait(mut self, wait: Duration) -> Self {
        self.dequeue_wait = wait;
        self
    }

    pub fn with_max_gap_checks(mut self, checks: u32) -> Self {
        self.max_gap_checks = checks;
        self
    }

    pub fn with_debate_cap(mut self, cap: usize) -> Self {
        self.debate_cap = cap;
        self
    }

    pub fn with_jitter_ms(mut self, jitter_ms: u64) -> Self {
        self.jitter_ms = jitter_ms;
        self
    }

    pub fn without_debate(mut self) -> Self {
        self.skip_debate = true;
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }
}

/// What one run produced
#[derive(Debug)]
pub struct SwarmOutcome {
    pub post_id: String,
    /// Activations charged against the cap (failures included)
    pub activations: usize,
    /// Agents that were activated, sorted
    pub responded: Vec<String>,
    /// Dynamic specialists spawned during the run
    pub spawned: Vec<String>,
    pub debate_turns: usize,
    pub synthesis: Option<String>,
    /// Id of the detached builder run, when one was dispatched
    pub builder_id: Option<String>,
    /// Full transcript, debate and synthesis included
    pub transcript: Vec<TranscriptEntry>,
}

/// Orchestrates swarm runs over shared services
pub struct SwarmController {
    generation: Arc<dyn GenerationService>,
    store: Arc<dyn Store>,
    events: Arc<EventBus>,
    limiter: Arc<RateLimiter>,
    registry: Arc<DynamicAgentRegistry>,
    factory: AgentFactory,
    builder: Option<Arc<BuilderPipeline>>,
    config: SwarmConfig,
}

impl SwarmController {
    pub fn new(
        generation: Arc<dyn GenerationService>,
        store: Arc<dyn Store>,
        events: Arc<EventBus>,
        limiter: Arc<RateLimiter>,
        registry: Arc<DynamicAgentRegistry>,
        config: SwarmConfig,
    ) -> Self {
        let factory = AgentFactory::new(Arc::clone(&registry));
        Self {
            generation,
            store,
            events,
            limiter,
            registry,
            factory,
            builder: None,
            config,
        }
    }

    /// Dispatch a background document build once the run drains
    pub fn with_builder(mut self, builder: Arc<BuilderPipeline>) -> Self {
        self.builder = Some(builder);
        self
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    /// Run one swarm over the given post, seeding from the roster
    pub async fn run(&self, post_id: &str, topic: &str) -> SwarmOutcome {
        self.run_seeded(post_id, topic, None).await
    }

    /// Run one swarm, optionally with an explicit seed agent list
    ///
    /// Never fails as a whole: individual agent failures are charged and
    /// skipped, persistence failures are logged, and the run always
    /// reaches [`RunPhase::Drained`].
    #[tracing::instrument(skip(self, seed))]
    pub async fn run_seeded(
        &self,
        post_id: &str,
        topic: &str,
        seed: Option<Vec<String>>,
    ) -> SwarmOutcome {
        let state = SwarmState::new(post_id, None, topic, self.config.max_activations);
        let mut transcript: Vec<TranscriptEntry> = Vec::new();
        let mut spawned: Vec<String> = Vec::new();
        let mut gap_checks = 0u32;
        let mut wave = 1u32;

        let (tx, mut rx) = mpsc::unbounded_channel::<AgentRequest>();
        let seeds: Vec<String> = match seed {
            Some(names) if !names.is_empty() => names,
            _ => select_initial_agents(topic, self.config.max_activations)
                .iter()
                .map(|s| s.name.to_string())
                .collect(),
        };
        for name in &seeds {
            let _ = tx.send(AgentRequest::seed(
                name.clone(),
                format!("Give your initial take on: {}", topic),
            ));
        }
        self.events.publish(
            SwarmEvent::new(SwarmEventKind::SwarmStarted, "controller")
                .with_post(post_id)
                .with_data(serde_json::json!({ "topic": topic, "seeds": seeds })),
        );
        tracing::info!(post = post_id, seeds = seeds.len(), "Swarm started");
        tracing::debug!(post = post_id, phase = RunPhase::Activating.label(), "Phase change");

        loop {
            // Bounded wait, never an unbounded block: gap checks must be
            // able to fire when nobody produces follow-up requests.
            let request = match tokio::time::timeout(self.config.dequeue_wait, rx.recv()).await {
                Ok(Some(request)) => request,
                Ok(None) => break,
                Err(_) => {
                    if state.activation_count() >= self.config.max_activations
                        || gap_checks >= self.config.max_gap_checks
                    {
                        break;
                    }
                    // Gap analysis spends the same daily budget as a
                    // post; an exhausted cap ends the run instead.
                    if !self.limiter.can_post("controller", Some(post_id), true) {
                        break;
                    }
                    gap_checks += 1;
                    tracing::debug!(
                        post = post_id,
                        phase = RunPhase::GapCheck.label(),
                        "Phase change"
                    );
                    self.events.publish(
                        SwarmEvent::new(SwarmEventKind::GapCheck, "controller")
                            .with_post(post_id)
                            .with_data(serde_json::json!({ "round": gap_checks })),
                    );
                    let gaps = find_gaps(
                        self.generation.as_ref(),
                        topic,
                        &render_transcript(&transcript),
                        &state.responded(),
                        &self.known_agents(post_id),
                        wave + 1,
                    )
                    .await;
                    if gaps.is_empty() {
                        break;
                    }
                    tracing::info!(post = post_id, recruits = gaps.len(), "Gap check recruited agents");
                    for gap in gaps {
                        let _ = tx.send(gap);
                    }
                    continue;
                }
            };

            wave = wave.max(request.wave);
            if roster_agent(&request.agent).is_none()
                && self.registry.get(post_id, &request.agent).is_none()
            {
                tracing::warn!(agent = %request.agent, "Dropping request for unknown agent");
                continue;
            }

            // Denied posts are dropped before admission so they never
            // charge the activation cap.
            if !self.limiter.can_post(&request.agent, Some(post_id), false) {
                continue;
            }

            match state.try_admit(&request.agent) {
                Admission::Admitted => {}
                Admission::Duplicate => continue,
                Admission::CapReached => {
                    tracing::info!(post = post_id, "Activation cap reached");
                    break;
                }
            }

            self.jitter().await;
            self.activate(&state, &request, &mut transcript, &tx, &mut spawned)
                .await;
        }
        drop(tx);
        tracing::debug!(post = post_id, phase = RunPhase::Drained.label(), "Phase change");

        let responded = state.responded();
        let mut debate_turns = 0;
        let mut synthesis = None;
        if !self.config.skip_debate && !transcript.is_empty() {
            debate_turns = run_debate(
                self.generation.as_ref(),
                &self.events,
                &self.limiter,
                post_id,
                topic,
                &responded,
                &mut transcript,
                self.config.debate_cap,
                self.config.jitter_ms,
            )
            .await;
            synthesis = synthesize(
                self.generation.as_ref(),
                &self.events,
                self.store.as_ref(),
                &self.limiter,
                post_id,
                topic,
                &mut transcript,
            )
            .await;
        }

        let builder_id = match &self.builder {
            Some(pipeline) if !transcript.is_empty() => {
                Some(pipeline.dispatch(BuilderRequest {
                    post_id: post_id.to_string(),
                    title: format!("Findings: {}", topic),
                    agent_id: "controller".to_string(),
                    transcript: render_transcript(&transcript),
                    sections: None,
                    silent: self.config.silent,
                }))
            }
            _ => None,
        };

        self.events.publish(
            SwarmEvent::new(SwarmEventKind::SwarmCompleted, "controller")
                .with_post(post_id)
                .with_data(serde_json::json!({
                    "phase": RunPhase::Drained.label(),
                    "activations": state.activation_count(),
                    "debate_turns": debate_turns,
                    "synthesized": synthesis.is_some(),
                    "builder_id": builder_id,
                })),
        );
        tracing::info!(
            post = post_id,
            activations = state.activation_count(),
            debate_turns,
            "Swarm completed"
        );

        SwarmOutcome {
            post_id: post_id.to_string(),
            activations: state.activation_count(),
            responded,
            spawned,
            debate_turns,
            synthesis,
            builder_id,
            transcript,
        }
    }

    /// One admitted activation: generate, persist, harvest follow-ups
    async fn activate(
        &self,
        state: &SwarmState,
        request: &AgentRequest,
        transcript: &mut Vec<TranscriptEntry>,
        tx: &mpsc::UnboundedSender<AgentRequest>,
        spawned: &mut Vec<String>,
    ) {
        let agent = &request.agent;
        self.events.publish(
            SwarmEvent::new(SwarmEventKind::AgentActivated, agent)
                .with_post(&state.post_id)
                .with_data(serde_json::json!({ "wave": request.wave, "task": request.task })),
        );

        let (system, temperature) = self.prompt_for(agent, &state.post_id);
        let input = format!(
            "Topic: {}\n\nYour task: {}\n\nDiscussion so far:\n{}",
            state.content,
            request.task,
            render_transcript(transcript)
        );
        let tools = self.tools_for(agent, &state.post_id);

        let mut gen_request = GenerationRequest::new(system, input).with_tools(tools);
        if let Some(temperature) = temperature {
            gen_request = gen_request.with_temperature(temperature);
        }
        let reply = match self.generation.generate(gen_request).await {
            Ok(reply) if !reply.text.is_empty() => reply,
            Ok(_) => {
                // A degenerate reply still consumed the slot
                self.events.publish(
                    SwarmEvent::new(SwarmEventKind::AgentFailed, agent)
                        .with_post(&state.post_id)
                        .with_data(serde_json::json!({ "error": "empty reply" })),
                );
                return;
            }
            Err(e) => {
                tracing::warn!(agent = %agent, "Agent activation failed: {:#}", e);
                self.events.publish(
                    SwarmEvent::new(SwarmEventKind::AgentFailed, agent)
                        .with_post(&state.post_id)
                        .with_data(serde_json::json!({ "error": e.to_string() })),
                );
                return;
            }
        };

        self.limiter.record_post(agent, Some(&state.post_id));
        if let Err(e) = self
            .store
            .create_post(NewPost {
                parent_id: Some(state.post_id.clone()),
                author: agent.clone(),
                content: reply.text.clone(),
            })
            .await
        {
            tracing::warn!(agent = %agent, "Failed to persist agent post: {}", e);
        }
        transcript.push(TranscriptEntry::new(agent.clone(), reply.text.clone()));

        // Tool-driven spawns first, then plain-text mentions.
        let mut recruits: Vec<(String, String)> = Vec::new();
        for invocation in &reply.tool_invocations {
            if invocation.name != SPAWN_TOOL {
                tracing::debug!(tool = %invocation.name, "Ignoring unknown tool invocation");
                continue;
            }
            if let Some(name) = invocation.arguments.get("name").and_then(|v| v.as_str()) {
                let reason = invocation
                    .arguments
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                recruits.push((name.to_string(), reason));
            }
        }
        for name in extract_mentions(&reply.text, agent) {
            recruits.push((name, String::new()));
        }
        let mut seen: Vec<String> = Vec::new();
        recruits.retain(|(name, _)| {
            let duplicate = seen.iter().any(|s| s.eq_ignore_ascii_case(name));
            if !duplicate {
                seen.push(name.clone());
            }
            !duplicate
        });

        for (name, reason) in recruits.into_iter().take(MAX_RECRUITS_PER_REPLY) {
            self.recruit(state, agent, request.wave, &name, &reason, tx, spawned);
        }
    }

    /// Turn one follow-up into a queued request, spawning a specialist
    /// when the name is not on the roster
    fn recruit(
        &self,
        state: &SwarmState,
        requested_by: &str,
        wave: u32,
        name: &str,
        reason: &str,
        tx: &mpsc::UnboundedSender<AgentRequest>,
        spawned: &mut Vec<String>,
    ) {
        let task = if reason.is_empty() {
            format!(
                "You were called in by {}. Address their point on: {}",
                requested_by, state.content
            )
        } else {
            reason.to_string()
        };

        if roster_agent(name).is_some() {
            let _ = tx.send(AgentRequest::follow_up(name, task, requested_by, wave + 1));
            return;
        }

        match self.factory.create_from_mention(
            name,
            &state.content,
            Some(requested_by),
            reason,
            &state.post_id,
        ) {
            Ok(agent) => {
                self.events.publish(
                    SwarmEvent::new(SwarmEventKind::AgentSpawned, &agent.name)
                        .with_post(&state.post_id)
                        .with_data(serde_json::json!({
                            "id": agent.id,
                            "display_name": agent.display_name,
                            "role": agent.role.name(),
                            "spawned_by": requested_by,
                        })),
                );
                if !spawned.contains(&agent.name) {
                    spawned.push(agent.name.clone());
                }
                let _ = tx.send(AgentRequest::follow_up(agent.name, task, requested_by, wave + 1));
            }
            Err(e) => {
                tracing::debug!(name, "Spawn rejected: {}", e);
            }
        }
    }

    /// System prompt and role-template temperature for an agent identity
    fn prompt_for(&self, agent: &str, session_id: &str) -> (String, Option<f32>) {
        if let Some(member) = roster_agent(agent) {
            let system = format!(
                "You are {} {}. {} Expertise: {}. Reply with concise, concrete \
                 findings. Recruit another agent only when their angle is \
                 genuinely missing.",
                member.glyph,
                member.name,
                member.persona,
                member.expertise.join(", ")
            );
            return (system, Some(crate::agents::template_for(member.role).default_temperature));
        }
        if let Some(dynamic) = self.registry.get(session_id, agent) {
            let system = format!(
                "You are {} {}, a {}. {} Reply with concise, concrete findings.",
                dynamic.glyph,
                dynamic.display_name,
                dynamic.title(),
                dynamic.persona
            );
            return (system, Some(dynamic.template().default_temperature));
        }
        (
            format!(
                "You are {}, a subject-matter specialist. Reply with concise, concrete findings.",
                agent
            ),
            None,
        )
    }

    /// Tool specs offered on activation, from the agent's role template
    /// (or the spec override carried on a dynamic agent)
    fn tools_for(&self, agent: &str, session_id: &str) -> Vec<ToolSpec> {
        let names: Vec<String> = if let Some(member) = roster_agent(agent) {
            crate::agents::template_for(member.role)
                .default_tools
                .iter()
                .map(|t| t.to_string())
                .collect()
        } else if let Some(dynamic) = self.registry.get(session_id, agent) {
            dynamic.tools
        } else {
            vec![SPAWN_TOOL.to_string()]
        };
        names
            .into_iter()
            .map(|name| {
                let description = tool_description(&name).to_string();
                ToolSpec { name, description }
            })
            .collect()
    }

    fn known_agents(&self, session_id: &str) -> Vec<String> {
        let mut known: Vec<String> = crate::agents::roster()
            .iter()
            .map(|a| a.name.to_string())
            .collect();
        known.extend(
            self.registry
                .list_for_session(session_id)
                .into_iter()
                .map(|a| a.name),
        );
        known
    }

    async fn jitter(&self) {
        if self.config.jitter_ms == 0 {
            return;
        }
        let delay = {
            let mut rng = rand::thread_rng();
            rng.gen_range(0..=self.config.jitter_ms)
        };
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
}

fn tool_description(name: &str) -> &'static str {
    match name {
        "spawn_agent" => {
            "Recruit a missing specialist by name. Arguments: \
             {\"name\": \"CamelCaseName\", \"reason\": \"what they should cover\"}"
        }
        "web_search" => "Search the web for current sources. Arguments: {\"query\": \"search terms\"}",
        _ => "Available to this agent role.",
    }
}

/// Pull @Name mentions out of a reply, excluding self-mentions
fn extract_mentions(text: &str, author: &str) -> Vec<String> {
    let pattern = Regex::new(r"@([A-Za-z][A-Za-z0-9]{2,})").expect("static regex");
    let mut mentions = Vec::new();
    for capture in pattern.captures_iter(text) {
        let name = capture[1].to_string();
        if name.eq_ignore_ascii_case(author) {
            continue;
        }
        if !mentions.iter().any(|m: &String| m.eq_ignore_ascii_case(&name)) {
            mentions.push(name);
        }
    }
    mentions
}
