//! Stock & News Assistant
//!
//! A conversational assistant that:
//! - Routes each question to a price lookup, a headline search, both, or chit-chat
//! - Parses tickers and dates deterministically so price answers stay auditable
//! - Runs the requested specialists concurrently under a deadline
//! - Composes one answer, with explicit notices for any part that failed
//! - Keeps per-session history, append-only
//!
//! TURN LOOP:
//! INPUT → CLASSIFY → DISPATCH → SPECIALISTS | FALLBACK → SYNTHESIZE → APPEND

pub mod agent;
pub mod api;
pub mod audit;
pub mod classifier;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod memory;
pub mod models;
pub mod query;
pub mod specialists;
pub mod state;
pub mod synthesizer;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use agent::{Collaborators, Orchestrator};
pub use classifier::Classifier;
pub use config::AssistantConfig;
