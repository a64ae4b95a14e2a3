//! # Agent Identity
//!
//! Static roster and role templates, the dynamic agent factory, and the
//! session-scoped registry of spawned specialists.

pub mod factory;
pub mod registry;
pub mod templates;

pub use factory::{format_display_name, AgentFactory, AgentSpec, DynamicAgent};
pub use registry::DynamicAgentRegistry;
pub use templates::{
    domain_for_topic, roster, roster_agent, select_initial_agents, template_for, AgentRole,
    AgentTemplate, RosterAgent,
};
