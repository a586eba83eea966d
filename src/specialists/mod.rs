//! Specialist agents
//!
//! Each specialist answers one narrow class of question. They never touch
//! conversation state: the orchestrator hands them the question and attaches
//! what they return.

pub mod fallback;
pub mod search;
pub mod structured;

pub use fallback::{FallbackAgent, DEFAULT_FALLBACK_REPLY};
pub use search::SearchAgent;
pub use structured::StructuredAgent;
