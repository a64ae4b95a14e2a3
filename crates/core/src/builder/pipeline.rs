//! # Builder Pipeline
//!
//! Turns an accumulated discussion into a structured document through a
//! fixed sequence of phases: section planning, outline, TL;DR, per-section
//! drafting, assembly with a deduplicated sources block, persistence.
//! Runs detached from the swarm run that dispatched it; the only shared
//! input is a transcript snapshot copied at dispatch time. Every
//! generation call spends the same daily budget as posting, so an
//! exhausted cap stops builder traffic too.

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;

use super::{BuilderRegistry, BuilderStage, BuilderState};
use crate::generation::{GenerationReply, GenerationRequest, GenerationService};
use crate::limits::RateLimiter;
use crate::store::{NewArtifact, NewPost, Store};
use crate::supervisor::TaskSupervisor;
use crate::swarm::events::{EventBus, SwarmEvent, SwarmEventKind};

/// Fallback headings when section planning fails
const DEFAULT_SECTIONS: &[&str] = &[
    "Background",
    "Key Findings",
    "Evidence and Data",
    "Risks and Open Questions",
    "Outlook",
];

const SECTIONS_PROMPT: &str = "\
Propose section headings for a document synthesizing the discussion below. \
Reply with a JSON array of 5 to 7 strings. Headings must be specific to \
this topic - never generic filler like \"Introduction\" or \"Conclusion\". \
No prose outside the JSON.";

/// What a swarm run hands the builder at dispatch time
#[derive(Debug, Clone)]
pub struct BuilderRequest {
    pub post_id: String,
    pub title: String,
    /// Agent identity that owns the build
    pub agent_id: String,
    /// Transcript snapshot (copied, not shared)
    pub transcript: String,
    /// Explicit section structure; `None` asks the generation service
    pub sections: Option<Vec<String>>,
    /// Suppress the "artifact ready" notice post
    pub silent: bool,
}

fn builder_id() -> String {
    format!(
        "builder-{:x}",
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    )
}

/// Extract and deduplicate citation URLs across the given texts
///
/// Picks up both markdown-link and bare-URL forms, normalizes (trailing
/// punctuation and slash stripped), and preserves first-seen order.
pub fn extract_sources(texts: &[&str]) -> Vec<String> {
    let markdown = Regex::new(r"\[[^\]]*\]\((https?://[^)\s]+)\)").expect("static regex");
    let bare = Regex::new(r#"https?://[^\s<>()\[\]"']+"#).expect("static regex");

    let mut seen = HashSet::new();
    let mut sources = Vec::new();
    for text in texts {
        let captured = markdown
            .captures_iter(text)
            .map(|c| c[1].to_string())
            .chain(bare.find_iter(text).map(|m| m.as_str().to_string()));
        for raw in captured {
            let url = raw
                .trim_end_matches(['.', ',', ';', ':', '!', '?'])
                .trim_end_matches('/')
                .to_string();
            if seen.insert(url.to_lowercase()) {
                sources.push(url);
            }
        }
    }
    sources
}

fn parse_headings(text: &str) -> Option<Vec<String>> {
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
    let headings: Vec<String> = serde_json::from_str(&body[start..=end]).ok()?;
    if (3..=8).contains(&headings.len()) {
        Some(headings)
    } else {
        None
    }
}

/// The background document builder
#[derive(Clone)]
pub struct BuilderPipeline {
    generation: Arc<dyn GenerationService>,
    store: Arc<dyn Store>,
    events: Arc<EventBus>,
    registry: Arc<BuilderRegistry>,
    limiter: Arc<RateLimiter>,
    supervisor: Arc<TaskSupervisor>,
}

impl BuilderPipeline {
    pub fn new(
        generation: Arc<dyn GenerationService>,
        store: Arc<dyn Store>,
        events: Arc<EventBus>,
        registry: Arc<BuilderRegistry>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            generation,
            store,
            events,
            registry,
            limiter,
            supervisor: Arc::new(TaskSupervisor::new()),
        }
    }

    /// Track builder tasks on a shared supervisor instead of a private one
    pub fn with_supervisor(mut self, supervisor: Arc<TaskSupervisor>) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn registry(&self) -> Arc<BuilderRegistry> {
        Arc::clone(&self.registry)
    }

    /// Dispatch a builder run, returning its id immediately
    ///
    /// The run is spawned on the supervisor: completing or dropping the
    /// caller does not cancel it, but shutdown can drain it.
    pub fn dispatch(&self, request: BuilderRequest) -> String {
        let id = builder_id();
        self.registry.insert(BuilderState {
            id: id.clone(),
            post_id: request.post_id.clone(),
            title: request.title.clone(),
            agent_id: request.agent_id.clone(),
            percent: 0,
            stage: BuilderStage::Queued,
            stage_label: BuilderStage::Queued.label().to_string(),
            artifact_id: None,
        });
        self.events.publish(
            SwarmEvent::new(SwarmEventKind::BuilderQueued, &request.agent_id)
                .with_post(&request.post_id)
                .with_data(serde_json::json!({ "builder_id": id, "title": request.title })),
        );

        let this = self.clone();
        let run_id = id.clone();
        self.supervisor.spawn(async move {
            this.run(run_id, request).await;
        });

        id
    }

    async fn run(&self, id: String, request: BuilderRequest) {
        let result = self.execute(&id, &request).await;

        match result {
            Ok(artifact_id) => {
                self.registry.set_artifact(&id, &artifact_id);
                let percent =
                    self.registry.set_progress(&id, BuilderStage::Complete, 100, "complete");
                self.events.publish(
                    SwarmEvent::new(SwarmEventKind::BuilderCompleted, &request.agent_id)
                        .with_post(&request.post_id)
                        .with_data(serde_json::json!({
                            "builder_id": id,
                            "artifact_id": artifact_id,
                            "percent": percent,
                        })),
                );
            }
            Err(e) => {
                tracing::warn!(builder = %id, "Builder failed: {:#}", e);
                self.registry.set_progress(&id, BuilderStage::Error, 0, "error");
                self.events.publish(
                    SwarmEvent::new(SwarmEventKind::BuilderFailed, &request.agent_id)
                        .with_post(&request.post_id)
                        .with_data(serde_json::json!({
                            "builder_id": id,
                            "error": e.to_string(),
                        })),
                );
            }
        }

        // Terminal either way: keep the record readable for the grace
        // window, then reclaim it.
        self.supervisor
            .spawn(Arc::clone(&self.registry).evict_after(id));
    }

    /// Single choke point for generation: denied once the daily caps are
    /// spent, so a cap reached mid-run stops the remaining phases too.
    async fn generate(&self, agent_id: &str, request: GenerationRequest) -> Result<GenerationReply> {
        if !self.limiter.can_post(agent_id, None, true) {
            anyhow::bail!("Daily generation budget exhausted");
        }
        self.generation.generate(request).await
    }

    fn progress(
        &self,
        id: &str,
        agent_id: &str,
        post_id: &str,
        stage: BuilderStage,
        percent: u8,
        label: &str,
    ) {
        let effective = self.registry.set_progress(id, stage, percent, label);
        self.events.publish(
            SwarmEvent::new(SwarmEventKind::BuilderProgress, agent_id)
                .with_post(post_id)
                .with_data(serde_json::json!({
                    "builder_id": id,
                    "stage": stage.label(),
                    "label": label,
                    "percent": effective,
                })),
        );
    }

    async fn execute(&self, id: &str, request: &BuilderRequest) -> Result<String> {
        let agent = &request.agent_id;
        let post = &request.post_id;

        if !self.limiter.can_post(agent, None, true) {
            anyhow::bail!("Daily generation budget exhausted");
        }

        self.progress(id, agent, post, BuilderStage::PlanningSections, 5, "planning sections");
        let sections = match &request.sections {
            Some(sections) if !sections.is_empty() => sections.clone(),
            _ => self.plan_sections(agent, &request.title, &request.transcript).await,
        };

        self.progress(id, agent, post, BuilderStage::Outline, 10, "outline");
        let outline = self
            .outline(agent, &request.title, &sections, &request.transcript)
            .await;
        self.progress(id, agent, post, BuilderStage::Outline, 15, "outline ready");

        self.progress(id, agent, post, BuilderStage::Tldr, 18, "tl;dr");
        let tldr = self.tldr(agent, &request.title, &request.transcript).await;

        let mut drafted: Vec<(String, String)> = Vec::new();
        let total = sections.len().max(1);
        for (i, heading) in sections.iter().enumerate() {
            let percent = 20 + ((70 * (i + 1)) / total) as u8;
            self.progress(
                id, agent, post,
                BuilderStage::Writing, percent, &format!("writing: {}", heading),
            );

            match self
                .draft_section(
                    agent,
                    &request.title,
                    heading,
                    &outline,
                    &request.transcript,
                    &drafted,
                )
                .await
            {
                Some(text) => drafted.push((heading.clone(), text)),
                // Zero output for this section; the document ships without it
                None => tracing::warn!(builder = %id, section = %heading, "Section draft produced no output"),
            }
        }

        self.progress(id, agent, post, BuilderStage::Assembling, 90, "assembling");

        let mut source_texts: Vec<&str> = vec![request.transcript.as_str()];
        source_texts.extend(drafted.iter().map(|(_, text)| text.as_str()));
        let sources = extract_sources(&source_texts);

        let mut document = format!("# {}\n", request.title);
        if let Some(tldr) = &tldr {
            document.push_str(&format!("\n**TL;DR:** {}\n", tldr));
        }
        for (heading, text) in &drafted {
            document.push_str(&format!("\n## {}\n\n{}\n", heading, text));
        }
        if !sources.is_empty() {
            document.push_str("\n## Sources\n\n");
            for url in &sources {
                document.push_str(&format!("- {}\n", url));
            }
        }

        let artifact_id = self
            .store
            .create_artifact(NewArtifact {
                kind: "document".to_string(),
                title: request.title.clone(),
                content: document,
                post_id: Some(request.post_id.clone()),
            })
            .await
            .context("Failed to persist builder artifact")?;

        if !request.silent {
            let notice = self
                .store
                .create_post(NewPost {
                    parent_id: Some(request.post_id.clone()),
                    author: request.agent_id.clone(),
                    content: format!("📄 Document ready: {} (artifact {})", request.title, artifact_id),
                })
                .await;
            if let Err(e) = notice {
                tracing::warn!(builder = %id, "Failed to post artifact notice: {}", e);
            }
        }

        Ok(artifact_id)
    }

    /// Ask for 5-7 specific headings; fall back to the default set
    async fn plan_sections(&self, agent: &str, title: &str, transcript: &str) -> Vec<String> {
        let input = format!("Title: {}\n\nDiscussion:\n{}", title, transcript);
        let reply = self
            .generate(agent, GenerationRequest::new(SECTIONS_PROMPT, input))
            .await;

        match reply.ok().and_then(|r| parse_headings(&r.text)) {
            Some(headings) => headings,
            None => {
                tracing::debug!("Section planning failed, using default headings");
                DEFAULT_SECTIONS.iter().map(|s| s.to_string()).collect()
            }
        }
    }

    async fn outline(
        &self,
        agent: &str,
        title: &str,
        sections: &[String],
        transcript: &str,
    ) -> String {
        let system = "Write a terse bullet outline for the document described. \
                      One line per planned section, stating what that section will argue.";
        let input = format!(
            "Title: {}\nSections: {}\n\nDiscussion:\n{}",
            title,
            sections.join(", "),
            transcript
        );
        match self.generate(agent, GenerationRequest::new(system, input)).await {
            Ok(reply) if !reply.text.is_empty() => reply.text,
            _ => sections.join("\n"),
        }
    }

    async fn tldr(&self, agent: &str, title: &str, transcript: &str) -> Option<String> {
        let system = "Summarize the discussion in at most three sentences. Plain text.";
        let input = format!("Title: {}\n\nDiscussion:\n{}", title, transcript);
        match self.generate(agent, GenerationRequest::new(system, input)).await {
            Ok(reply) if !reply.text.is_empty() => Some(reply.text),
            _ => None,
        }
    }

    /// Draft one section, with prior sections passed as negative context
    ///
    /// The no-repetition instruction is part of the prompt contract:
    /// drafted sections must not repeat facts, statistics, or examples
    /// already used earlier in this run.
    async fn draft_section(
        &self,
        agent: &str,
        title: &str,
        heading: &str,
        outline: &str,
        transcript: &str,
        drafted: &[(String, String)],
    ) -> Option<String> {
        let mut system = format!(
            "Draft the section \"{}\" of the document \"{}\". Ground every \
             claim in the discussion transcript. Keep inline citation URLs \
             from the transcript where relevant.",
            heading, title
        );
        if !drafted.is_empty() {
            system.push_str(
                "\n\nDo NOT repeat any fact, statistic, or example that already \
                 appears in the previously drafted sections below.",
            );
        }

        let mut input = format!("Outline:\n{}\n\nDiscussion:\n{}", outline, transcript);
        if !drafted.is_empty() {
            input.push_str("\n\nPreviously drafted sections (negative context - do not repeat):\n");
            for (prior_heading, text) in drafted {
                input.push_str(&format!("### {}\n{}\n", prior_heading, text));
            }
        }

        match self.generate(agent, GenerationRequest::new(system, input)).await {
            Ok(reply) if !reply.text.is_empty() => Some(reply.text),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(section = heading, "Section generation failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::ScriptedGeneration;
    use crate::limits::RateLimitConfig;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn pipeline(
        service: Arc<ScriptedGeneration>,
        store: Arc<MemoryStore>,
    ) -> (BuilderPipeline, Arc<EventBus>, Arc<BuilderRegistry>) {
        pipeline_with_limits(service, store, RateLimitConfig::default())
    }

    fn pipeline_with_limits(
        service: Arc<ScriptedGeneration>,
        store: Arc<MemoryStore>,
        limits: RateLimitConfig,
    ) -> (BuilderPipeline, Arc<EventBus>, Arc<BuilderRegistry>) {
        let events = Arc::new(EventBus::default());
        let registry = Arc::new(BuilderRegistry::new(Duration::from_secs(60)));
        let pipeline = BuilderPipeline::new(
            service,
            store,
            Arc::clone(&events),
            Arc::clone(&registry),
            Arc::new(RateLimiter::new(limits)),
        );
        (pipeline, events, registry)
    }

    fn request(silent: bool) -> BuilderRequest {
        BuilderRequest {
            post_id: "post-1".to_string(),
            title: "Battery Findings".to_string(),
            agent_id: "TechAnalyst".to_string(),
            transcript: "[TechAnalyst] Cells improved 8%/yr, see \
                         https://example.com/report and [study](https://papers.example.org/123)."
                .to_string(),
            sections: Some(vec!["Cost Trends".to_string(), "Chemistry".to_string()]),
            silent,
        }
    }

    async fn wait_for_terminal(registry: &BuilderRegistry, id: &str) -> BuilderState {
        for _ in 0..200 {
            if let Some(state) = registry.get(id) {
                if state.stage.is_terminal() {
                    return state;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("builder never reached a terminal state");
    }

    #[test]
    fn test_extract_sources_dedup_and_normalize() {
        let sources = extract_sources(&[
            "see [report](https://example.com/a/) and https://example.com/a.",
            "also https://other.org/x, plus HTTPS://EXAMPLE.COM/a",
        ]);
        assert_eq!(sources, vec!["https://example.com/a", "https://other.org/x"]);
    }

    #[test]
    fn test_parse_headings_bounds() {
        assert!(parse_headings(r#"["a", "b"]"#).is_none());
        let ok = parse_headings(r#"["a", "b", "c", "d", "e"]"#).unwrap();
        assert_eq!(ok.len(), 5);
        assert!(parse_headings("nonsense").is_none());
    }

    #[tokio::test]
    async fn test_builder_reaches_100_with_artifact() {
        let service = Arc::new(ScriptedGeneration::new("generated text"));
        let store = Arc::new(MemoryStore::new());
        let (pipeline, events, registry) = pipeline(Arc::clone(&service), Arc::clone(&store));

        let id = pipeline.dispatch(request(false));
        let state = wait_for_terminal(&registry, &id).await;

        assert_eq!(state.stage, BuilderStage::Complete);
        assert_eq!(state.percent, 100);
        let artifact_id = state.artifact_id.expect("artifact id set");
        let artifact = store.artifact(&artifact_id).expect("artifact persisted");
        assert!(artifact.content.contains("## Cost Trends"));
        assert!(artifact.content.contains("## Sources"));
        assert!(artifact.content.contains("https://example.com/report"));

        // Notice post was made
        let posts = store.posts();
        assert!(posts.iter().any(|p| p.content.contains(&artifact_id)));

        // Percent values over the published events never decrease
        let percents: Vec<u64> = events
            .replay_since(0)
            .iter()
            .filter(|e| {
                matches!(
                    e.kind,
                    SwarmEventKind::BuilderProgress | SwarmEventKind::BuilderCompleted
                )
            })
            .filter_map(|e| e.data.as_ref()?.get("percent")?.as_u64())
            .collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*percents.last().unwrap(), 100);
    }

    #[tokio::test]
    async fn test_exhausted_budget_fails_without_generation() {
        let service = Arc::new(ScriptedGeneration::new("text"));
        let store = Arc::new(MemoryStore::new());
        let (pipeline, _events, registry) = pipeline_with_limits(
            Arc::clone(&service),
            Arc::clone(&store),
            RateLimitConfig {
                global_daily: 0,
                ..RateLimitConfig::default()
            },
        );

        let id = pipeline.dispatch(request(true));
        let state = wait_for_terminal(&registry, &id).await;

        assert_eq!(state.stage, BuilderStage::Error);
        assert_eq!(service.call_count(), 0);
        assert!(store.artifact_ids().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_runs_under_supervisor() {
        let service = Arc::new(ScriptedGeneration::new("text"));
        let store = Arc::new(MemoryStore::new());
        let events = Arc::new(EventBus::default());
        let registry = Arc::new(BuilderRegistry::new(Duration::from_secs(60)));
        let supervisor = Arc::new(TaskSupervisor::new());
        let pipeline = BuilderPipeline::new(
            Arc::clone(&service) as Arc<dyn GenerationService>,
            Arc::clone(&store) as Arc<dyn Store>,
            events,
            Arc::clone(&registry),
            Arc::new(RateLimiter::new(RateLimitConfig::default())),
        )
        .with_supervisor(Arc::clone(&supervisor));

        let id = pipeline.dispatch(request(true));
        // Draining the supervisor is enough to observe the finished run
        supervisor.shutdown_drain(Duration::from_secs(5)).await;
        let state = registry.get(&id).expect("record within grace window");
        assert_eq!(state.stage, BuilderStage::Complete);
    }

    #[tokio::test]
    async fn test_silent_run_posts_no_notice() {
        let service = Arc::new(ScriptedGeneration::new("text"));
        let store = Arc::new(MemoryStore::new());
        let (pipeline, _events, registry) = pipeline(Arc::clone(&service), Arc::clone(&store));

        let id = pipeline.dispatch(request(true));
        let state = wait_for_terminal(&registry, &id).await;
        assert_eq!(state.stage, BuilderStage::Complete);
        assert!(store.posts().is_empty());
    }

    #[tokio::test]
    async fn test_section_planning_falls_back_on_garbage() {
        let service = Arc::new(ScriptedGeneration::new("prose, not json"));
        let store = Arc::new(MemoryStore::new());
        let (pipeline, _events, registry) = pipeline(Arc::clone(&service), Arc::clone(&store));

        let mut req = request(true);
        req.sections = None;
        let id = pipeline.dispatch(req);
        let state = wait_for_terminal(&registry, &id).await;

        assert_eq!(state.stage, BuilderStage::Complete);
        let artifact = store.artifact(&state.artifact_id.unwrap()).unwrap();
        // Default headings were used
        assert!(artifact.content.contains("## Key Findings"));
    }

    #[tokio::test]
    async fn test_drafting_passes_negative_context() {
        let service = Arc::new(ScriptedGeneration::new("section text"));
        let store = Arc::new(MemoryStore::new());
        let (pipeline, _events, registry) = pipeline(Arc::clone(&service), Arc::clone(&store));

        let id = pipeline.dispatch(request(true));
        wait_for_terminal(&registry, &id).await;

        let requests = service.requests();
        // Second section draft must carry the first as negative context
        let second_draft = requests
            .iter()
            .find(|r| r.system_prompt.contains("\"Chemistry\""))
            .expect("second section drafted");
        assert!(second_draft.system_prompt.contains("Do NOT repeat"));
        assert!(second_draft
            .messages
            .iter()
            .any(|m| m.content.contains("negative context")));
    }
}
