//! Per-turn conversation state
//!
//! `ConversationState` is owned by the orchestrator for the length of one
//! turn. Every field past the question is write-once; a second write, or a
//! write the routing decision does not allow, is a `StateError`.

pub mod session;

pub use session::{InMemorySessionStore, PgSessionStore, SessionStore};

use crate::error::OrchestrationError;
use crate::memory::{ConversationHistory, ConversationMessage};
use crate::models::{
    Classification, Routing, SearchResult, SpecialistOutcome, SpecialistStatus, StructuredResult,
    TurnResult,
};
use crate::synthesizer::TurnOutcomes;
use crate::Result;
use serde::{Deserialize, Serialize};

/// Where a turn is in its control flow
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    Classifying,
    Dispatching,
    AwaitingSpecialists,
    Fallback,
    Synthesizing,
    Done,
}

#[derive(Debug)]
pub struct ConversationState {
    session_id: String,
    history: ConversationHistory,
    raw_question: String,
    phase: TurnPhase,
    classification: Option<Classification>,
    structured: Option<SpecialistOutcome<StructuredResult>>,
    search: Option<SpecialistOutcome<SearchResult>>,
    fallback_text: Option<String>,
    final_answer: Option<String>,
}

impl ConversationState {
    /// Start a turn on top of the session's persisted history
    pub fn new(history: ConversationHistory, raw_question: &str) -> Result<Self> {
        let raw_question = raw_question.trim();
        if raw_question.is_empty() {
            return Err(OrchestrationError::InvalidInput(
                "question must not be empty".to_string(),
            ));
        }

        Ok(Self {
            session_id: history.session_id.clone(),
            history,
            raw_question: raw_question.to_string(),
            phase: TurnPhase::Classifying,
            classification: None,
            structured: None,
            search: None,
            fallback_text: None,
            final_answer: None,
        })
    }

    // =============================
    // Accessors
    // =============================

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn raw_question(&self) -> &str {
        &self.raw_question
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn classification(&self) -> Option<&Classification> {
        self.classification.as_ref()
    }

    pub fn routing(&self) -> Option<Routing> {
        self.classification.as_ref().map(|c| c.routing)
    }

    /// Populated only when requested and successful
    pub fn structured_result(&self) -> Option<&StructuredResult> {
        self.structured.as_ref().and_then(|o| o.as_ref().ok())
    }

    /// Populated only when requested and successful
    pub fn search_result(&self) -> Option<&SearchResult> {
        self.search.as_ref().and_then(|o| o.as_ref().ok())
    }

    pub fn structured_status(&self) -> SpecialistStatus {
        SpecialistStatus::of(self.structured.as_ref())
    }

    pub fn search_status(&self) -> SpecialistStatus {
        SpecialistStatus::of(self.search.as_ref())
    }

    // =============================
    // Write-once setters
    // =============================

    pub fn set_phase(&mut self, phase: TurnPhase) {
        self.phase = phase;
    }

    pub fn set_classification(&mut self, classification: Classification) -> Result<()> {
        if self.classification.is_some() {
            return Err(state_error("routing was already decided for this turn"));
        }
        self.classification = Some(classification);
        Ok(())
    }

    pub fn set_structured(&mut self, outcome: SpecialistOutcome<StructuredResult>) -> Result<()> {
        let routing = self.require_routing()?;
        if !routing.need_structured {
            return Err(state_error("structured result written without being requested"));
        }
        if self.structured.is_some() {
            return Err(state_error("structured result already written"));
        }
        self.structured = Some(outcome);
        Ok(())
    }

    pub fn set_search(&mut self, outcome: SpecialistOutcome<SearchResult>) -> Result<()> {
        let routing = self.require_routing()?;
        if !routing.need_search {
            return Err(state_error("search result written without being requested"));
        }
        if self.search.is_some() {
            return Err(state_error("search result already written"));
        }
        self.search = Some(outcome);
        Ok(())
    }

    pub fn set_fallback_text(&mut self, text: String) -> Result<()> {
        let routing = self.require_routing()?;
        if !routing.is_fallback() {
            return Err(state_error("fallback text written on a specialist route"));
        }
        if self.fallback_text.is_some() {
            return Err(state_error("fallback text already written"));
        }
        self.fallback_text = Some(text);
        Ok(())
    }

    /// Snapshot of what the synthesizer may use.
    ///
    /// Fails until every requested specialist, or the fallback, has terminated.
    pub fn outcomes(&self) -> Result<TurnOutcomes> {
        let routing = self.require_routing()?;

        if routing.is_fallback() {
            let text = self
                .fallback_text
                .clone()
                .ok_or_else(|| state_error("fallback has not produced a reply"))?;
            return Ok(TurnOutcomes::Fallback(text));
        }

        if routing.need_structured && self.structured.is_none() {
            return Err(state_error("structured specialist has not terminated"));
        }
        if routing.need_search && self.search.is_none() {
            return Err(state_error("search specialist has not terminated"));
        }

        Ok(TurnOutcomes::Specialists {
            structured: self.structured.clone(),
            search: self.search.clone(),
        })
    }

    /// Only the synthesizing phase may write the answer
    pub fn set_final_answer(&mut self, answer: String) -> Result<()> {
        if self.phase != TurnPhase::Synthesizing {
            return Err(state_error("final answer written outside synthesis"));
        }
        if self.final_answer.is_some() {
            return Err(state_error("final answer already written"));
        }
        self.final_answer = Some(answer);
        Ok(())
    }

    /// The user and assistant messages this turn adds to history
    pub fn turn_messages(&self) -> Result<(ConversationMessage, ConversationMessage)> {
        let answer = self
            .final_answer
            .as_ref()
            .ok_or_else(|| state_error("turn has no final answer yet"))?;

        Ok((
            ConversationMessage::user(self.raw_question.clone()),
            ConversationMessage::assistant(answer.clone()),
        ))
    }

    /// Close the turn once its messages are persisted
    pub fn complete(
        mut self,
        user: ConversationMessage,
        assistant: ConversationMessage,
    ) -> Result<TurnResult> {
        let routing = self.require_routing()?;
        let final_answer = self
            .final_answer
            .take()
            .ok_or_else(|| state_error("turn has no final answer yet"))?;

        self.history.add_message(user);
        self.history.add_message(assistant);
        self.phase = TurnPhase::Done;

        Ok(TurnResult {
            session_id: self.session_id,
            final_answer,
            history: self.history.as_slice().to_vec(),
            routing,
        })
    }

    fn require_routing(&self) -> Result<Routing> {
        self.routing()
            .ok_or_else(|| state_error("routing has not been decided yet"))
    }
}

fn state_error(message: &str) -> OrchestrationError {
    OrchestrationError::StateError(message.to_string())
}
