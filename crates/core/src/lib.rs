//! # Symposium Core
//!
//! Multi-agent discussion orchestration: seeds a panel of agents for a
//! topic, runs them in capped waves with rate limiting and gap-driven
//! recruiting, debates and synthesizes their findings, and builds long
//! documents in the background.
//!
//! ## Architecture
//!
//! - `agents/` - Static roster, role templates, dynamic specialist factory
//! - `swarm/` - Run controller, activation state, gap analysis, debate, events
//! - `builder/` - Phased background document pipeline with progress registry
//! - `limits` - Daily budgets and per-thread cooldowns
//! - `generation` / `store` - Seams to the text-generation service and persistence
//!
//! ## Usage
//!
//! ```rust,ignore
//! use symposium_core::swarm::{SwarmConfig, SwarmController};
//!
//! let controller = SwarmController::new(
//!     generation, store, events, limiter, registry,
//!     SwarmConfig::default(),
//! );
//! let outcome = controller.run("post-1", "emerging battery technology").await;
//! ```

pub mod agents;
pub mod builder;
pub mod generation;
pub mod limits;
pub mod models;
pub mod store;
pub mod supervisor;
pub mod swarm;
