//! # Agent Templates & Roster
//!
//! Static, read-only configuration for agent identity: the closed role
//! template table, the organization-prefix and topic-keyword tables used
//! for domain detection, and the fixed roster the seeder matches topics
//! against. Replaces free-form personality dictionaries with a closed
//! tagged-variant table.

/// Role of an agent, detected from its name suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Builds and evaluates technical solutions
    Engineer,
    /// Gives guidance and weighs trade-offs
    Advisor,
    /// Breaks down data and trends
    Analyst,
    /// Digs up sources and prior work
    Researcher,
    /// Frames long-term positioning
    Strategist,
    /// General domain expert
    #[default]
    Specialist,
}

impl AgentRole {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Engineer => "Engineer",
            Self::Advisor => "Advisor",
            Self::Analyst => "Analyst",
            Self::Researcher => "Researcher",
            Self::Strategist => "Strategist",
            Self::Specialist => "Specialist",
        }
    }
}

/// Behavioral template fixed per role
#[derive(Debug, Clone)]
pub struct AgentTemplate {
    pub role: AgentRole,
    /// Format string for the role title; `{domain}` is substituted
    pub title_format: &'static str,
    /// Communication-style description injected into prompts
    pub style: &'static str,
    /// Tools offered to this role by default
    pub default_tools: &'static [&'static str],
    /// Sampling temperature for this role
    pub default_temperature: f32,
    /// Roles this agent may recruit further
    ///
    /// A hard per-session cap bounds recursion independently of this.
    pub spawnable_roles: &'static [AgentRole],
}

static TEMPLATES: &[AgentTemplate] = &[
    AgentTemplate {
        role: AgentRole::Engineer,
        title_format: "{domain} Engineer",
        style: "Precise and implementation-focused. Talks in concrete mechanisms, \
                numbers, and failure modes. Flags hand-waving.",
        default_tools: &["web_search", "spawn_agent"],
        default_temperature: 0.3,
        spawnable_roles: &[AgentRole::Researcher, AgentRole::Specialist],
    },
    AgentTemplate {
        role: AgentRole::Advisor,
        title_format: "{domain} Advisor",
        style: "Measured and pragmatic. Weighs trade-offs explicitly and gives \
                a clear recommendation with caveats.",
        default_tools: &["web_search", "spawn_agent"],
        default_temperature: 0.5,
        spawnable_roles: &[AgentRole::Analyst, AgentRole::Researcher],
    },
    AgentTemplate {
        role: AgentRole::Analyst,
        title_format: "{domain} Analyst",
        style: "Data-first. Quantifies wherever possible, cites sources, and \
                separates observation from interpretation.",
        default_tools: &["web_search"],
        default_temperature: 0.4,
        spawnable_roles: &[AgentRole::Researcher],
    },
    AgentTemplate {
        role: AgentRole::Researcher,
        title_format: "{domain} Researcher",
        style: "Thorough and citation-heavy. Surfaces primary sources and \
                recent work, notes what is still unknown.",
        default_tools: &["web_search"],
        default_temperature: 0.4,
        spawnable_roles: &[],
    },
    AgentTemplate {
        role: AgentRole::Strategist,
        title_format: "{domain} Strategist",
        style: "Big-picture. Frames second-order effects, timing, and \
                competitive positioning.",
        default_tools: &["web_search", "spawn_agent"],
        default_temperature: 0.6,
        spawnable_roles: &[AgentRole::Analyst],
    },
    AgentTemplate {
        role: AgentRole::Specialist,
        title_format: "{domain} Specialist",
        style: "Deep, narrow expertise. Answers inside its lane and says so \
                when a question falls outside it.",
        default_tools: &["web_search"],
        default_temperature: 0.5,
        spawnable_roles: &[],
    },
];

/// Template for a role (total over the closed enum)
pub fn template_for(role: AgentRole) -> &'static AgentTemplate {
    TEMPLATES
        .iter()
        .find(|t| t.role == role)
        .expect("every AgentRole has a template")
}

/// Name-suffix table for role detection, checked longest-match first
pub static ROLE_SUFFIXES: &[(&str, AgentRole)] = &[
    ("engineer", AgentRole::Engineer),
    ("advisor", AgentRole::Advisor),
    ("analyst", AgentRole::Analyst),
    ("researcher", AgentRole::Researcher),
    ("strategist", AgentRole::Strategist),
    ("specialist", AgentRole::Specialist),
];

/// Organization-prefix table for domain detection
pub static ORG_PREFIXES: &[(&str, &str)] = &[
    ("nasa", "aerospace"),
    ("esa", "aerospace"),
    ("who", "public health"),
    ("cdc", "epidemiology"),
    ("fda", "drug and device regulation"),
    ("sec", "financial regulation"),
    ("nist", "standards and measurement"),
    ("epa", "environmental policy"),
    ("mit", "engineering research"),
];

/// Topic-keyword table for domain detection when no prefix matches
pub static DOMAIN_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "energy storage",
        &["battery", "batteries", "energy", "grid", "lithium", "solar", "storage"],
    ),
    (
        "finance",
        &["market", "finance", "investment", "stock", "economics", "cost", "price"],
    ),
    (
        "artificial intelligence",
        &["ai", "ml", "model", "neural", "llm", "machine learning"],
    ),
    (
        "climate",
        &["climate", "carbon", "emission", "warming", "renewable"],
    ),
    (
        "medicine",
        &["health", "medical", "drug", "clinical", "disease", "vaccine"],
    ),
    (
        "space",
        &["space", "orbit", "satellite", "rocket", "mars", "lunar"],
    ),
];

/// Detect a domain from topic keywords, if any table entry matches
pub fn domain_for_topic(topic: &str) -> Option<&'static str> {
    let lower = topic.to_lowercase();
    DOMAIN_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(domain, _)| *domain)
}

/// A fixed roster member available for seeding
#[derive(Debug, Clone)]
pub struct RosterAgent {
    pub name: &'static str,
    pub glyph: &'static str,
    pub role: AgentRole,
    /// Expertise tags shown to clients and fed into prompts
    pub expertise: &'static [&'static str],
    /// Identity/opinion seed for the system prompt
    pub persona: &'static str,
    /// Topic keywords this agent is recruited for
    pub keywords: &'static [&'static str],
}

static ROSTER: &[RosterAgent] = &[
    RosterAgent {
        name: "TechAnalyst",
        glyph: "🔎",
        role: AgentRole::Analyst,
        expertise: &["technology trends", "hardware", "product analysis"],
        persona: "Tracks emerging technology and judges it by shipped results, \
                  not press releases.",
        keywords: &["technology", "tech", "battery", "chip", "hardware", "software", "emerging"],
    },
    RosterAgent {
        name: "ScienceScout",
        glyph: "🔬",
        role: AgentRole::Researcher,
        expertise: &["materials science", "physics", "peer-reviewed research"],
        persona: "Reads the papers behind the headlines and reports what the \
                  data actually supports.",
        keywords: &["science", "research", "battery", "energy", "physics", "chemistry", "materials"],
    },
    RosterAgent {
        name: "MarketStrategist",
        glyph: "📈",
        role: AgentRole::Strategist,
        expertise: &["market sizing", "unit economics", "competitive dynamics"],
        persona: "Cares about who pays, at what margin, and when. Skeptical of \
                  technology without a cost curve.",
        keywords: &["market", "finance", "investment", "economics", "cost", "price", "business"],
    },
    RosterAgent {
        name: "PolicyWonk",
        glyph: "🏛",
        role: AgentRole::Advisor,
        expertise: &["regulation", "standards", "public policy"],
        persona: "Knows which rules bind and which are theater. Thinks in \
                  compliance timelines.",
        keywords: &["policy", "regulation", "law", "government", "standards", "subsidy"],
    },
    RosterAgent {
        name: "SkepticalReviewer",
        glyph: "🤨",
        role: AgentRole::Analyst,
        expertise: &["claim verification", "risk assessment"],
        persona: "Assumes every claim is overstated until sourced. Hunts for \
                  the failure case nobody mentioned.",
        keywords: &["risk", "claim", "evidence", "review", "audit"],
    },
    RosterAgent {
        name: "FieldEngineer",
        glyph: "🔧",
        role: AgentRole::Engineer,
        expertise: &["deployment", "manufacturing", "scaling"],
        persona: "Has seen lab results die in production. Asks how it is built, \
                  shipped, and serviced.",
        keywords: &["manufacturing", "production", "deployment", "scale", "engineering", "build"],
    },
];

/// The static roster
pub fn roster() -> &'static [RosterAgent] {
    ROSTER
}

/// Look up a roster member by name (case-insensitive)
pub fn roster_agent(name: &str) -> Option<&'static RosterAgent> {
    ROSTER.iter().find(|a| a.name.eq_ignore_ascii_case(name))
}

/// Fallback seed when no roster keywords match a topic
static DEFAULT_SEED: &[&str] = &["TechAnalyst", "SkepticalReviewer"];

/// Select the initial agent set for a topic
///
/// Matches topic words against each roster member's keyword list and
/// takes up to `max` hits; falls back to the fixed default pair when
/// nothing matches.
pub fn select_initial_agents(topic: &str, max: usize) -> Vec<&'static RosterAgent> {
    let lower = topic.to_lowercase();
    let matched: Vec<&'static RosterAgent> = ROSTER
        .iter()
        .filter(|a| a.keywords.iter().any(|k| lower.contains(k)))
        .take(max)
        .collect();

    if !matched.is_empty() {
        return matched;
    }
    DEFAULT_SEED
        .iter()
        .filter_map(|name| roster_agent(name))
        .take(max)
        .collect()
}
