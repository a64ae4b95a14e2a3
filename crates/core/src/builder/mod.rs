//! # Builder
//!
//! The long-running background pipeline that turns a conversation's
//! findings into a phased, persisted document. Builder state lives in a
//! process-wide registry so clients can poll a progress bar; records
//! self-evict a grace period after reaching a terminal state.

pub mod pipeline;

pub use pipeline::{BuilderPipeline, BuilderRequest};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Stage of the builder pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuilderStage {
    Queued,
    PlanningSections,
    Outline,
    Tldr,
    Writing,
    Assembling,
    Complete,
    Error,
}

impl BuilderStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BuilderStage::Complete | BuilderStage::Error)
    }

    pub fn label(&self) -> &'static str {
        match self {
            BuilderStage::Queued => "queued",
            BuilderStage::PlanningSections => "planning_sections",
            BuilderStage::Outline => "outline",
            BuilderStage::Tldr => "tldr",
            BuilderStage::Writing => "writing",
            BuilderStage::Assembling => "assembling",
            BuilderStage::Complete => "complete",
            BuilderStage::Error => "error",
        }
    }
}

/// Progress record for one builder run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderState {
    pub id: String,
    /// Post the document is being built for
    pub post_id: String,
    pub title: String,
    /// Agent identity that owns the build
    pub agent_id: String,
    /// 0-100, monotonically non-decreasing within a run
    pub percent: u8,
    pub stage: BuilderStage,
    /// Human-readable stage detail (e.g. which section is being written)
    pub stage_label: String,
    /// Persisted artifact id, once known
    pub artifact_id: Option<String>,
}

/// Process-wide directory of builder runs, keyed by builder id
pub struct BuilderRegistry {
    inner: Mutex<HashMap<String, BuilderState>>,
    /// How long terminal records stay readable before eviction
    grace: Duration,
}

impl BuilderRegistry {
    pub fn new(grace: Duration) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            grace,
        }
    }

    pub fn insert(&self, state: BuilderState) {
        self.inner.lock().unwrap().insert(state.id.clone(), state);
    }

    pub fn get(&self, id: &str) -> Option<BuilderState> {
        self.inner.lock().unwrap().get(id).cloned()
    }

    pub fn list(&self) -> Vec<BuilderState> {
        self.inner.lock().unwrap().values().cloned().collect()
    }

    /// Advance a builder's stage and percent
    ///
    /// Percent is clamped so it never decreases within a run. Returns the
    /// effective percent recorded.
    pub fn set_progress(&self, id: &str, stage: BuilderStage, percent: u8, label: &str) -> u8 {
        let mut inner = self.inner.lock().unwrap();
        if let Some(state) = inner.get_mut(id) {
            state.stage = stage;
            state.stage_label = label.to_string();
            state.percent = state.percent.max(percent.min(100));
            state.percent
        } else {
            percent
        }
    }

    pub fn set_artifact(&self, id: &str, artifact_id: &str) {
        if let Some(state) = self.inner.lock().unwrap().get_mut(id) {
            state.artifact_id = Some(artifact_id.to_string());
        }
    }

    /// Remove the record after the grace period
    ///
    /// Run on both success and failure so memory stays bounded without an
    /// external sweeper; clients keep a grace window to read final state.
    /// The caller owns the task this future runs on, so eviction drains
    /// with the rest of the builder's work on shutdown.
    pub async fn evict_after(self: Arc<Self>, id: String) {
        tokio::time::sleep(self.grace).await;
        self.inner.lock().unwrap().remove(&id);
        tracing::debug!(builder = %id, "Evicted builder record");
    }
}

impl Default for BuilderRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}
