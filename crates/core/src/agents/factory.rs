//! # Dynamic Agent Factory
//!
//! Derives a specialist identity from a free-form mention ("@NASAEngineer")
//! or an explicit spec. Role comes from a known name-suffix table, domain
//! from an organization-prefix table or topic keywords; everything else is
//! filled in from the role template.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::registry::DynamicAgentRegistry;
use super::templates::{
    domain_for_topic, template_for, AgentRole, AgentTemplate, ORG_PREFIXES, ROLE_SUFFIXES,
};

/// An ephemeral specialist identity created at run time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicAgent {
    /// Unique id: cleaned name + creation millis, so concurrent swarms
    /// spawning the same name never collide
    pub id: String,
    /// Cleaned name, e.g. "NASAEngineer"
    pub name: String,
    /// Human-readable name, e.g. "NASA Engineer"
    pub display_name: String,
    /// Avatar glyph
    pub glyph: String,
    pub role: AgentRole,
    pub domain: String,
    pub expertise: Vec<String>,
    /// Identity/opinion seed for the system prompt
    pub persona: String,
    pub tone: String,
    /// Suggested research queries, set for research-leaning roles
    pub research_queries: Option<Vec<String>>,
    /// Tool names offered when this agent is activated; seeded from the
    /// role template unless the spec overrides them
    #[serde(default)]
    pub tools: Vec<String>,
    /// Agent that requested this spawn, if any
    pub spawned_by: Option<String>,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}

impl DynamicAgent {
    /// Role title with the domain substituted, e.g. "aerospace Engineer"
    pub fn title(&self) -> String {
        self.template().title_format.replace("{domain}", &self.domain)
    }

    pub fn template(&self) -> &'static AgentTemplate {
        template_for(self.role)
    }
}

/// Explicit specification for a dynamic agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    pub role: AgentRole,
    pub expertise: Vec<String>,
    pub responsibilities: String,
    pub expectations: String,
    #[serde(default)]
    pub tools: Vec<String>,
}

/// Strip everything but ASCII alphanumerics
fn clean_name(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// Detect a role from the cleaned name's suffix; "specialist" by default
fn detect_role(name: &str) -> AgentRole {
    let lower = name.to_lowercase();
    ROLE_SUFFIXES
        .iter()
        .find(|(suffix, _)| lower.ends_with(suffix))
        .map(|(_, role)| *role)
        .unwrap_or_default()
}

/// Detect a domain: org prefix first, topic keywords second, "general" last
fn detect_domain(name: &str, topic: &str) -> String {
    let lower = name.to_lowercase();
    if let Some((_, domain)) = ORG_PREFIXES.iter().find(|(prefix, _)| lower.starts_with(prefix)) {
        return domain.to_string();
    }
    domain_for_topic(topic)
        .unwrap_or("general")
        .to_string()
}

/// Insert spaces at camel-case boundaries and after acronym runs
///
/// "NASAEngineer" -> "NASA Engineer", "SystemsAdvisor" -> "Systems Advisor".
pub fn format_display_name(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if i > 0 && c.is_ascii_uppercase() {
            let prev = chars[i - 1];
            let next_lower = chars.get(i + 1).map(|n| n.is_ascii_lowercase()).unwrap_or(false);
            // lower->Upper boundary, or the last capital of an acronym run
            if prev.is_ascii_lowercase() || prev.is_ascii_digit() || (prev.is_ascii_uppercase() && next_lower)
            {
                out.push(' ');
            }
        }
        out.push(c);
    }
    out
}

fn glyph_for(role: AgentRole) -> &'static str {
    match role {
        AgentRole::Engineer => "🔧",
        AgentRole::Advisor => "🧭",
        AgentRole::Analyst => "🔎",
        AgentRole::Researcher => "📚",
        AgentRole::Strategist => "♟",
        AgentRole::Specialist => "🎯",
    }
}

fn tone_for(role: AgentRole) -> &'static str {
    match role {
        AgentRole::Engineer => "precise",
        AgentRole::Advisor => "measured",
        AgentRole::Analyst => "data-driven",
        AgentRole::Researcher => "thorough",
        AgentRole::Strategist => "expansive",
        AgentRole::Specialist => "focused",
    }
}

/// Creates and scopes ephemeral specialist identities
pub struct AgentFactory {
    registry: Arc<DynamicAgentRegistry>,
}

impl AgentFactory {
    pub fn new(registry: Arc<DynamicAgentRegistry>) -> Self {
        Self { registry }
    }

    /// Derive an agent from a pure name + topic, without registering it
    pub fn build_agent(
        raw_name: &str,
        topic: &str,
        spawned_by: Option<&str>,
        session_id: &str,
    ) -> DynamicAgent {
        let name = clean_name(raw_name);
        let role = detect_role(&name);
        let domain = detect_domain(&name, topic);
        let created_at = Utc::now();
        let template = template_for(role);

        let research_queries = match role {
            AgentRole::Researcher | AgentRole::Analyst => Some(vec![
                format!("{} {} recent developments", domain, topic),
                format!("{} {} criticism limitations", domain, topic),
            ]),
            _ => None,
        };

        DynamicAgent {
            id: format!("{}-{}", name.to_lowercase(), created_at.timestamp_millis()),
            display_name: format_display_name(&name),
            glyph: glyph_for(role).to_string(),
            role,
            expertise: vec![domain.clone()],
            persona: format!(
                "{} focused on {}. {}",
                template.title_format.replace("{domain}", &domain),
                topic,
                template.style
            ),
            tone: tone_for(role).to_string(),
            research_queries,
            tools: template.default_tools.iter().map(|t| t.to_string()).collect(),
            domain,
            spawned_by: spawned_by.map(str::to_string),
            session_id: session_id.to_string(),
            created_at,
            name,
        }
    }

    /// Create (or return) the specialist a mention names
    ///
    /// Idempotent per session: spawning the same cleaned name twice
    /// returns the existing agent, same id.
    pub fn create_from_mention(
        &self,
        raw_name: &str,
        topic: &str,
        spawned_by: Option<&str>,
        reason: &str,
        session_id: &str,
    ) -> Result<DynamicAgent> {
        let name = clean_name(raw_name);
        if let Some(existing) = self.registry.get(session_id, &name) {
            tracing::debug!(agent = %name, session = session_id, "Reusing existing dynamic agent");
            return Ok(existing);
        }

        let mut agent = Self::build_agent(raw_name, topic, spawned_by, session_id);
        if !reason.is_empty() {
            agent.persona = format!("Recruited to cover: {}. {}", reason, agent.persona);
        }
        self.registry.register(agent.clone())?;

        tracing::info!(
            agent = %agent.name,
            role = agent.role.name(),
            domain = %agent.domain,
            session = session_id,
            "Spawned dynamic agent"
        );
        Ok(agent)
    }

    /// Create an agent from an explicit spec
    ///
    /// Same idempotency contract as [`create_from_mention`](Self::create_from_mention).
    pub fn create_from_spec(&self, spec: AgentSpec, session_id: &str) -> Result<DynamicAgent> {
        let name = clean_name(&spec.name);
        if let Some(existing) = self.registry.get(session_id, &name) {
            return Ok(existing);
        }

        let created_at = Utc::now();
        let tools = if spec.tools.is_empty() {
            template_for(spec.role)
                .default_tools
                .iter()
                .map(|t| t.to_string())
                .collect()
        } else {
            spec.tools.clone()
        };
        let agent = DynamicAgent {
            id: format!("{}-{}", name.to_lowercase(), created_at.timestamp_millis()),
            display_name: format_display_name(&name),
            glyph: glyph_for(spec.role).to_string(),
            role: spec.role,
            domain: spec
                .expertise
                .first()
                .cloned()
                .unwrap_or_else(|| "general".to_string()),
            expertise: spec.expertise,
            persona: format!("{} Expected to: {}", spec.responsibilities, spec.expectations),
            tone: tone_for(spec.role).to_string(),
            research_queries: None,
            tools,
            spawned_by: None,
            session_id: session_id.to_string(),
            created_at,
            name,
        };
        self.registry.register(agent.clone())?;
        Ok(agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_acronym_run() {
        assert_eq!(format_display_name("NASAEngineer"), "NASA Engineer");
        assert_eq!(format_display_name("SystemsAdvisor"), "Systems Advisor");
        assert_eq!(format_display_name("radiationSpecialist"), "radiation Specialist");
        assert_eq!(format_display_name("NASA"), "NASA");
    }

    #[test]
    fn test_role_detection_from_suffix() {
        assert_eq!(detect_role("NASAEngineer"), AgentRole::Engineer);
        assert_eq!(detect_role("SystemsAdvisor"), AgentRole::Advisor);
        assert_eq!(detect_role("radiationSpecialist"), AgentRole::Specialist);
        // No suffix match defaults to specialist
        assert_eq!(detect_role("QuantumGuru"), AgentRole::Specialist);
    }

    #[test]
    fn test_domain_detection_prefix_then_topic() {
        assert_eq!(detect_domain("NASAEngineer", "anything"), "aerospace");
        assert_eq!(
            detect_domain("GridAnalyst", "battery storage economics"),
            "energy storage"
        );
        assert_eq!(detect_domain("SomeExpert", "medieval poetry"), "general");
    }

    #[test]
    fn test_name_cleaning() {
        assert_eq!(clean_name("@NASA-Engineer!"), "NASAEngineer");
    }

    #[test]
    fn test_idempotent_spawn_same_id() {
        let registry = Arc::new(DynamicAgentRegistry::default());
        let factory = AgentFactory::new(Arc::clone(&registry));

        let first = factory
            .create_from_mention("NASAAdvisor", "orbital debris", None, "coverage gap", "s1")
            .unwrap();
        let second = factory
            .create_from_mention("NASAAdvisor", "orbital debris", None, "coverage gap", "s1")
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(registry.count("s1"), 1);
    }

    #[test]
    fn test_mention_populates_template_fields() {
        let registry = Arc::new(DynamicAgentRegistry::default());
        let factory = AgentFactory::new(registry);

        let agent = factory
            .create_from_mention("NASAEngineer", "lunar habitats", Some("TechAnalyst"), "", "s1")
            .unwrap();
        assert_eq!(agent.display_name, "NASA Engineer");
        assert_eq!(agent.role, AgentRole::Engineer);
        assert_eq!(agent.domain, "aerospace");
        assert_eq!(agent.title(), "aerospace Engineer");
        assert_eq!(agent.spawned_by.as_deref(), Some("TechAnalyst"));
        assert_eq!(agent.tools, vec!["web_search", "spawn_agent"]);
    }

    #[test]
    fn test_create_from_spec() {
        let registry = Arc::new(DynamicAgentRegistry::default());
        let factory = AgentFactory::new(registry);

        let agent = factory
            .create_from_spec(
                AgentSpec {
                    name: "BatteryChemist".to_string(),
                    role: AgentRole::Researcher,
                    expertise: vec!["solid-state electrolytes".to_string()],
                    responsibilities: "Evaluate electrolyte claims.".to_string(),
                    expectations: "cite primary sources".to_string(),
                    tools: vec![],
                },
                "s1",
            )
            .unwrap();
        assert_eq!(agent.domain, "solid-state electrolytes");
        assert_eq!(agent.role, AgentRole::Researcher);
        // Empty spec tools fall back to the role template's set
        assert_eq!(agent.tools, vec!["web_search"]);
    }

    #[test]
    fn test_spec_tools_override_template() {
        let registry = Arc::new(DynamicAgentRegistry::default());
        let factory = AgentFactory::new(registry);

        let agent = factory
            .create_from_spec(
                AgentSpec {
                    name: "GridModeler".to_string(),
                    role: AgentRole::Engineer,
                    expertise: vec!["grid simulation".to_string()],
                    responsibilities: "Model dispatch curves.".to_string(),
                    expectations: "show assumptions".to_string(),
                    tools: vec!["code_interpreter".to_string()],
                },
                "s1",
            )
            .unwrap();
        assert_eq!(agent.tools, vec!["code_interpreter"]);
    }
}
