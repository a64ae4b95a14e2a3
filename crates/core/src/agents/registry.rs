//! # Dynamic Agent Registry
//!
//! In-memory directory of ephemeral specialist identities, scoped by
//! session (conversation) id. Entries are keyed by lower-cased name;
//! `clear_session` garbage-collects a conversation's agents when it
//! concludes.

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::sync::Mutex;

use super::factory::DynamicAgent;

/// Session-scoped directory of dynamic agents
pub struct DynamicAgentRegistry {
    /// session id -> (lower-cased name -> agent)
    sessions: Mutex<HashMap<String, HashMap<String, DynamicAgent>>>,
    /// Hard cap on dynamic agents per session, independent of any
    /// template's spawnable_roles
    max_per_session: usize,
}

impl DynamicAgentRegistry {
    pub fn new(max_per_session: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_per_session,
        }
    }

    /// Register a dynamic agent under its session
    ///
    /// Callers must check [`get`](Self::get) first; registering a name
    /// that already exists in the session is an error, as is exceeding
    /// the per-session cap.
    pub fn register(&self, agent: DynamicAgent) -> Result<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.entry(agent.session_id.clone()).or_default();

        let key = agent.name.to_lowercase();
        if session.contains_key(&key) {
            bail!("Agent '{}' already registered in session", agent.name);
        }
        if session.len() >= self.max_per_session {
            bail!(
                "Session '{}' reached its dynamic agent cap ({})",
                agent.session_id,
                self.max_per_session
            );
        }

        tracing::debug!(
            agent = %agent.name,
            session = %agent.session_id,
            "Registered dynamic agent"
        );
        session.insert(key, agent);
        Ok(())
    }

    /// Look up an agent by name within a session (case-insensitive)
    pub fn get(&self, session_id: &str, name: &str) -> Option<DynamicAgent> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .and_then(|s| s.get(&name.to_lowercase()))
            .cloned()
    }

    /// All agents spawned in a session
    pub fn list_for_session(&self, session_id: &str) -> Vec<DynamicAgent> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of agents spawned in a session
    pub fn count(&self, session_id: &str) -> usize {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    /// Whether the session has room for another dynamic agent
    pub fn has_capacity(&self, session_id: &str) -> bool {
        self.count(session_id) < self.max_per_session
    }

    /// Remove all agents for a session (conversation concluded)
    pub fn clear_session(&self, session_id: &str) {
        let removed = self.sessions.lock().unwrap().remove(session_id);
        if let Some(agents) = removed {
            tracing::debug!(
                session = session_id,
                count = agents.len(),
                "Cleared session agents"
            );
        }
    }
}

impl Default for DynamicAgentRegistry {
    fn default() -> Self {
        Self::new(6)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::factory::AgentFactory;

    fn registry_with_agent(session: &str, name: &str) -> (DynamicAgentRegistry, DynamicAgent) {
        let registry = DynamicAgentRegistry::default();
        let agent = AgentFactory::build_agent(name, "some topic", None, session);
        registry.register(agent.clone()).unwrap();
        (registry, agent)
    }

    #[test]
    fn test_register_and_get() {
        let (registry, agent) = registry_with_agent("s1", "NASAEngineer");
        let found = registry.get("s1", "nasaengineer").unwrap();
        assert_eq!(found.id, agent.id);
        assert!(registry.get("s2", "NASAEngineer").is_none());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let (registry, agent) = registry_with_agent("s1", "GridAdvisor");
        assert!(registry.register(agent).is_err());
    }

    #[test]
    fn test_per_session_cap() {
        let registry = DynamicAgentRegistry::new(2);
        for name in ["AAnalyst", "BAnalyst"] {
            let agent = AgentFactory::build_agent(name, "topic", None, "s1");
            registry.register(agent).unwrap();
        }
        assert!(!registry.has_capacity("s1"));
        let overflow = AgentFactory::build_agent("CAnalyst", "topic", None, "s1");
        assert!(registry.register(overflow).is_err());
        // Other sessions are unaffected
        assert!(registry.has_capacity("s2"));
    }

    #[test]
    fn test_clear_session() {
        let (registry, _) = registry_with_agent("s1", "NASAEngineer");
        assert_eq!(registry.count("s1"), 1);
        registry.clear_session("s1");
        assert_eq!(registry.count("s1"), 0);
        assert!(registry.list_for_session("s1").is_empty());
    }
}
