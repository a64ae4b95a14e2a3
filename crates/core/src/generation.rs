//! # Generation Service
//!
//! The seam to the external text-generation capability. The orchestrator
//! treats generation as an opaque, possibly slow, possibly failing remote
//! call: no retry logic lives here (transient-error backoff is the remote
//! service's responsibility).
//!
//! Two clients ship with the crate:
//!
//! - [`HttpGeneration`] - talks to a generation endpoint over HTTP
//! - [`ScriptedGeneration`] - deterministic canned replies for offline
//!   runs and tests

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::models::ModelConfig;

/// One message in a generation conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// "user" or "assistant"
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// A tool offered to the model for this call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
}

/// A tool call the model decided to make
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Request for one generation call
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Upper bound on internal tool-use rounds the service may run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_rounds: Option<u32>,
}

impl GenerationRequest {
    /// Simple prompt-only request
    pub fn new(system_prompt: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages: vec![ChatMessage::user(input)],
            tools: Vec::new(),
            temperature: None,
            max_rounds: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Reply from one generation call
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerationReply {
    /// Generated text (may be empty on a degenerate reply)
    #[serde(default)]
    pub text: String,
    /// Tool calls the model made during the call
    #[serde(default)]
    pub tool_invocations: Vec<ToolInvocation>,
}

impl GenerationReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_invocations: Vec::new(),
        }
    }
}

/// External text-generation capability
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationReply>;
}

/// HTTP client for a generation endpoint
///
/// Posts the request as JSON to `{base_url}/v1/generate` and expects a
/// [`GenerationReply`]-shaped body back.
pub struct HttpGeneration {
    client: reqwest::Client,
    config: ModelConfig,
}

impl HttpGeneration {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl GenerationService for HttpGeneration {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationReply> {
        let url = format!("{}/v1/generate", self.config.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.config.model,
            "system_prompt": request.system_prompt,
            "messages": request.messages,
            "tools": request.tools,
            "temperature": request.temperature.or(self.config.temperature),
            "max_rounds": request.max_rounds,
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("Generation endpoint unreachable")?
            .error_for_status()
            .context("Generation endpoint returned an error status")?;

        response
            .json::<GenerationReply>()
            .await
            .context("Generation endpoint returned a malformed reply")
    }
}

/// Deterministic generation client for offline runs and tests
///
/// Replies are popped from a script in order; once the script is
/// exhausted, every call returns the fallback text. All requests are
/// recorded so callers can assert how many calls were made.
#[derive(Default)]
pub struct ScriptedGeneration {
    script: Mutex<VecDeque<GenerationReply>>,
    fallback: String,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGeneration {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: fallback.into(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue the next scripted reply
    pub fn push(&self, reply: GenerationReply) {
        self.script.lock().unwrap().push_back(reply);
    }

    /// Number of generation calls made so far
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Snapshot of recorded requests
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationService for ScriptedGeneration {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationReply> {
        self.requests.lock().unwrap().push(request);
        let scripted = self.script.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_else(|| GenerationReply::text(self.fallback.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_replies_in_order() {
        let service = ScriptedGeneration::new("fallback");
        service.push(GenerationReply::text("first"));
        service.push(GenerationReply::text("second"));

        let a = service
            .generate(GenerationRequest::new("sys", "hi"))
            .await
            .unwrap();
        let b = service
            .generate(GenerationRequest::new("sys", "hi"))
            .await
            .unwrap();
        let c = service
            .generate(GenerationRequest::new("sys", "hi"))
            .await
            .unwrap();

        assert_eq!(a.text, "first");
        assert_eq!(b.text, "second");
        assert_eq!(c.text, "fallback");
        assert_eq!(service.call_count(), 3);
    }

    #[test]
    fn test_request_serialization_skips_empty_tools() {
        let request = GenerationRequest::new("sys", "input");
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("tools"));
        assert!(!json.contains("temperature"));
    }

    #[test]
    fn test_tool_invocation_default_arguments() {
        let invocation: ToolInvocation =
            serde_json::from_str(r#"{"name": "spawn_agent"}"#).unwrap();
        assert_eq!(invocation.name, "spawn_agent");
        assert!(invocation.arguments.is_null());
    }
}
