//! # Symposium Models
//!
//! Centralized configuration types for the generation endpoint.
//! Extracted so both the swarm controller and the builder pipeline
//! share one notion of "which model, at which endpoint, how creative".

use serde::{Deserialize, Serialize};

/// Configuration for the generation endpoint
///
/// Used wherever the orchestrator needs to describe a model call.
/// Per-role temperature overrides come from the agent templates; this
/// carries the endpoint-level defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model name (e.g. "claude-sonnet-4-20250514")
    pub model: String,
    /// Base URL of the generation endpoint
    pub base_url: String,
    /// Default sampling temperature when a template does not override it
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            base_url: "http://127.0.0.1:8787".to_string(),
            temperature: None,
        }
    }
}

impl ModelConfig {
    /// Create a new config with the default endpoint
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    /// Set the endpoint base URL
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the default temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}
