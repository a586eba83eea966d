//! Main orchestrator - runs one turn end to end
//!
//! CLASSIFY → DISPATCH → (SPECIALISTS | FALLBACK) → SYNTHESIZE → APPEND
//!
//! Turns of one session are strictly sequential; turns of different
//! sessions share nothing mutable. A session's lock lives in the lock table
//! only while some turn holds or awaits it.

use crate::audit::{compute_history_hash, TurnLog, TurnRecord};
use crate::classifier::Classifier;
use crate::collaborators::{
    GeminiClient, LanguageModel, PgNewsIndex, PgStockStore, SemanticSearch, StructuredQuery,
    UnavailableCollaborator,
};
use crate::config::AssistantConfig;
use crate::error::OrchestrationError;
use crate::memory::{ContextConfig, ContextManager, ConversationMessage};
use crate::models::{SpecialistFailure, SpecialistOutcome, TurnResult};
use crate::query::FollowUp;
use crate::specialists::{FallbackAgent, SearchAgent, StructuredAgent};
use crate::state::{
    ConversationState, InMemorySessionStore, PgSessionStore, SessionStore, TurnPhase,
};
use crate::synthesizer::Synthesizer;
use crate::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// External capabilities the orchestrator is wired to
pub struct Collaborators {
    pub store: Arc<dyn StructuredQuery>,
    pub index: Arc<dyn SemanticSearch>,
    pub llm: Option<Arc<dyn LanguageModel>>,
}

pub struct Orchestrator {
    classifier: Classifier,
    structured: StructuredAgent,
    search: SearchAgent,
    fallback: FallbackAgent,
    synthesizer: Synthesizer,
    sessions: Arc<dyn SessionStore>,
    turn_log: TurnLog,
    session_locks: Arc<StdMutex<LockTable>>,
    specialist_timeout: Duration,
}

type LockTable = HashMap<String, Arc<Mutex<()>>>;

/// A claim on one session's turn lock; dropping the last claim removes the
/// session from the lock table.
struct SessionLease {
    table: Arc<StdMutex<LockTable>>,
    session_id: String,
    lock: Arc<Mutex<()>>,
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // One reference is the table's, one is ours
        if Arc::strong_count(&self.lock) <= 2 {
            table.remove(&self.session_id);
        }
    }
}

impl Orchestrator {
    pub fn new(
        collaborators: Collaborators,
        sessions: Arc<dyn SessionStore>,
        config: &AssistantConfig,
    ) -> Self {
        let context_manager = ContextManager::with_config(ContextConfig {
            preserve_recent_count: config.history_window,
            ..ContextConfig::default()
        });

        Self {
            classifier: Classifier::new(collaborators.llm.clone(), config.specialist_timeout),
            structured: StructuredAgent::new(collaborators.store, config.max_price_rows),
            search: SearchAgent::new(
                collaborators.index,
                config.search_top_k,
                config.search_min_score,
            ),
            fallback: FallbackAgent::new(
                collaborators.llm,
                context_manager,
                config.specialist_timeout,
            ),
            synthesizer: Synthesizer::new(config.max_headlines),
            sessions,
            turn_log: TurnLog::with_capacity(config.turn_log_capacity),
            session_locks: Arc::new(StdMutex::new(HashMap::new())),
            specialist_timeout: config.specialist_timeout,
        }
    }

    /// Wire Postgres and Gemini adapters as far as the configuration allows.
    ///
    /// Without a database the specialists report themselves unavailable and
    /// sessions live in memory; without an API key classification is rule
    /// based only and the fallback uses its default reply.
    pub fn from_config(config: &AssistantConfig) -> Result<Self> {
        let llm: Option<Arc<dyn LanguageModel>> = match &config.gemini_api_key {
            Some(key) => Some(Arc::new(GeminiClient::new(
                key.clone(),
                config.llm_model.clone(),
            )?)),
            None => {
                warn!("GEMINI_API_KEY not set, language model features disabled");
                None
            }
        };

        let (collaborators, sessions): (Collaborators, Arc<dyn SessionStore>) =
            match &config.database_url {
                Some(url) => {
                    let pool = sqlx::postgres::PgPoolOptions::new()
                        .max_connections(5)
                        .acquire_timeout(config.specialist_timeout)
                        .connect_lazy(url)
                        .map_err(|e| {
                            OrchestrationError::DatabaseError(format!(
                                "Failed to configure postgres pool: {}",
                                e
                            ))
                        })?;
                    info!("Storage backend: postgres");

                    (
                        Collaborators {
                            store: Arc::new(PgStockStore::new(pool.clone())),
                            index: Arc::new(PgNewsIndex::new(pool.clone())),
                            llm,
                        },
                        Arc::new(PgSessionStore::new(pool)),
                    )
                }
                None => {
                    warn!("DATABASE_URL not set, price and news lookups are unavailable");
                    let unavailable = Arc::new(UnavailableCollaborator::new(
                        "no database is configured",
                    ));

                    (
                        Collaborators {
                            store: unavailable.clone(),
                            index: unavailable,
                            llm,
                        },
                        Arc::new(InMemorySessionStore::new()),
                    )
                }
            };

        Ok(Self::new(collaborators, sessions, config))
    }

    pub fn turn_log(&self) -> &TurnLog {
        &self.turn_log
    }

    /// Persisted history of a session, oldest first
    pub async fn session_history(&self, session_id: &str) -> Result<Vec<ConversationMessage>> {
        let history = self.sessions.load_history(session_id).await?;
        Ok(history.as_slice().to_vec())
    }

    /// Handle one user message
    pub async fn handle_turn(&self, session_id: &str, user_text: &str) -> Result<TurnResult> {
        self.handle_turn_with_cancel(session_id, user_text, &CancellationToken::new())
            .await
    }

    /// Handle one user message; cancelling `cancel` abandons the turn without
    /// touching history.
    pub async fn handle_turn_with_cancel(
        &self,
        session_id: &str,
        user_text: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnResult> {
        if session_id.trim().is_empty() {
            return Err(OrchestrationError::InvalidInput(
                "session id must not be empty".to_string(),
            ));
        }
        if user_text.trim().is_empty() {
            return Err(OrchestrationError::InvalidInput(
                "question must not be empty".to_string(),
            ));
        }

        let lease = self.lease_session(session_id);
        let _turn_guard = tokio::select! {
            guard = lease.lock.clone().lock_owned() => guard,
            _ = cancel.cancelled() => return Err(OrchestrationError::Cancelled),
        };

        let started = Instant::now();
        let history = self.sessions.load_history(session_id).await?;
        let state = ConversationState::new(history, user_text)?;

        info!(session_id, "Turn started");

        let state = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(session_id, "Turn cancelled, history left unchanged");
                return Err(OrchestrationError::Cancelled);
            }
            state = self.run_turn(state) => state?,
        };

        let (user, assistant) = state.turn_messages()?;
        self.sessions
            .append_turn(session_id, &user, &assistant)
            .await
            .map_err(|e| {
                OrchestrationError::StateError(format!("Failed to persist turn history: {}", e))
            })?;

        let basis = state
            .classification()
            .map(|c| c.basis.clone())
            .ok_or_else(|| OrchestrationError::StateError("turn finished unrouted".to_string()))?;
        let structured_status = state.structured_status();
        let search_status = state.search_status();
        let question = state.raw_question().to_string();

        let result = state.complete(user, assistant)?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        self.turn_log
            .record(TurnRecord {
                turn_id: Uuid::new_v4(),
                session_id: result.session_id.clone(),
                question,
                routing: result.routing,
                basis,
                structured_status,
                search_status,
                final_answer: result.final_answer.clone(),
                history_hash: compute_history_hash(&result.history),
                elapsed_ms,
                created_at: Utc::now(),
            })
            .await?;

        info!(
            session_id,
            elapsed_ms,
            need_structured = result.routing.need_structured,
            need_search = result.routing.need_search,
            "Turn completed"
        );

        Ok(result)
    }

    /// Drive the per-turn state machine up to a final answer
    async fn run_turn(&self, mut state: ConversationState) -> Result<ConversationState> {
        // ===== Classifying =====
        let classification = self
            .classifier
            .classify(state.raw_question(), state.history())
            .await;
        debug!(session_id = state.session_id(), ?classification, "Classified");
        state.set_classification(classification)?;

        // ===== Dispatching =====
        state.set_phase(TurnPhase::Dispatching);
        let routing = state
            .routing()
            .ok_or_else(|| OrchestrationError::StateError("routing missing".to_string()))?;

        if routing.is_fallback() {
            state.set_phase(TurnPhase::Fallback);
            let reply = self
                .fallback
                .run(state.raw_question(), state.history())
                .await;
            state.set_fallback_text(reply)?;
        } else {
            state.set_phase(TurnPhase::AwaitingSpecialists);

            let question = state.raw_question().to_string();
            let follow_up = FollowUp::from_history(state.history());

            let structured = async {
                if routing.need_structured {
                    Some(
                        with_timeout(
                            "structured",
                            self.specialist_timeout,
                            self.structured.run(&question, &follow_up),
                        )
                        .await,
                    )
                } else {
                    None
                }
            };

            let search = async {
                if routing.need_search {
                    Some(
                        with_timeout(
                            "search",
                            self.specialist_timeout,
                            self.search.run(&question, &follow_up),
                        )
                        .await,
                    )
                } else {
                    None
                }
            };

            let (structured, search) = tokio::join!(structured, search);

            if let Some(outcome) = structured {
                state.set_structured(outcome)?;
            }
            if let Some(outcome) = search {
                state.set_search(outcome)?;
            }
        }
        debug!(session_id = state.session_id(), phase = ?state.phase(), "Dispatch finished");

        // ===== Synthesizing =====
        state.set_phase(TurnPhase::Synthesizing);
        let outcomes = state.outcomes()?;
        let answer = self.synthesizer.compose(state.raw_question(), &outcomes);
        state.set_final_answer(answer)?;

        Ok(state)
    }

    fn lease_session(&self, session_id: &str) -> SessionLease {
        let mut table = self
            .session_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let lock = table
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        SessionLease {
            table: self.session_locks.clone(),
            session_id: session_id.to_string(),
            lock,
        }
    }
}

/// Run a specialist under a deadline, capturing any failure as an outcome
async fn with_timeout<T>(
    specialist: &'static str,
    timeout: Duration,
    call: impl Future<Output = Result<T>>,
) -> SpecialistOutcome<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => {
            warn!(specialist, "Specialist failed: {}", error);
            Err(SpecialistFailure::from(error))
        }
        Err(_) => {
            warn!(specialist, timeout_ms = timeout.as_millis() as u64, "Specialist timed out");
            Err(SpecialistFailure::unavailable(format!(
                "{} specialist timed out after {}ms",
                specialist,
                timeout.as_millis()
            )))
        }
    }
}
