//! Session history persistence
//!
//! In-memory for development and tests; Postgres when a database is
//! configured. Both only ever append.

use crate::error::OrchestrationError;
use crate::memory::{ConversationHistory, ConversationMessage, MessageRole};
use crate::Result;
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::debug;

/// Trait for session history persistence
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Full history of a session; unknown sessions are empty.
    async fn load_history(&self, session_id: &str) -> Result<ConversationHistory>;

    /// Append one turn. Both messages are stored or neither is.
    async fn append_turn(
        &self,
        session_id: &str,
        user: &ConversationMessage,
        assistant: &ConversationMessage,
    ) -> Result<()>;
}

/// In-memory session store
pub struct InMemorySessionStore {
    histories: Arc<RwLock<HashMap<String, ConversationHistory>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            histories: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load_history(&self, session_id: &str) -> Result<ConversationHistory> {
        let histories = self.histories.read().await;
        Ok(histories
            .get(session_id)
            .cloned()
            .unwrap_or_else(|| ConversationHistory::new(session_id)))
    }

    async fn append_turn(
        &self,
        session_id: &str,
        user: &ConversationMessage,
        assistant: &ConversationMessage,
    ) -> Result<()> {
        let mut histories = self.histories.write().await;
        let history = histories
            .entry(session_id.to_string())
            .or_insert_with(|| ConversationHistory::new(session_id));
        history.add_message(user.clone());
        history.add_message(assistant.clone());
        Ok(())
    }
}

/// Postgres-backed session store
pub struct PgSessionStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS conversation_messages (
                      seq BIGSERIAL PRIMARY KEY,
                      message_id UUID NOT NULL UNIQUE,
                      session_id TEXT NOT NULL,
                      role TEXT NOT NULL,
                      content TEXT NOT NULL,
                      token_count INTEGER NOT NULL,
                      message_type TEXT,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_conversation_messages_session
                    ON conversation_messages (session_id, seq);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                OrchestrationError::DatabaseError(format!(
                    "Failed to initialize conversation schema: {}",
                    e
                ))
            })?;

        Ok(())
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn load_history(&self, session_id: &str) -> Result<ConversationHistory> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT message_id, role, content, token_count, message_type, created_at
            FROM conversation_messages
            WHERE session_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            OrchestrationError::DatabaseError(format!("Failed to load conversation history: {}", e))
        })?;

        let mut history = ConversationHistory::new(session_id);
        for row in rows {
            let role: String = row.try_get("role")?;
            let token_count: i32 = row.try_get("token_count")?;

            history.add_message(ConversationMessage {
                message_id: row.try_get("message_id")?,
                timestamp: row.try_get("created_at")?,
                role: MessageRole::parse(&role),
                content: row.try_get("content")?,
                token_count: token_count.max(0) as usize,
                message_type: row.try_get("message_type")?,
            });
        }

        debug!(session_id, messages = history.message_count(), "History loaded");
        Ok(history)
    }

    async fn append_turn(
        &self,
        session_id: &str,
        user: &ConversationMessage,
        assistant: &ConversationMessage,
    ) -> Result<()> {
        self.ensure_schema().await?;

        let mut tx = self.pool.begin().await.map_err(|e| {
            OrchestrationError::DatabaseError(format!("Failed to begin history transaction: {}", e))
        })?;

        for msg in [user, assistant] {
            sqlx::query(
                r#"
                INSERT INTO conversation_messages
                  (message_id, session_id, role, content, token_count, message_type, created_at)
                VALUES
                  ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(msg.message_id)
            .bind(session_id)
            .bind(msg.role.as_str())
            .bind(&msg.content)
            .bind(msg.token_count as i32)
            .bind(&msg.message_type)
            .bind(msg.timestamp)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                OrchestrationError::DatabaseError(format!(
                    "Failed to insert conversation message: {}",
                    e
                ))
            })?;
        }

        tx.commit().await.map_err(|e| {
            OrchestrationError::DatabaseError(format!("Failed to commit history transaction: {}", e))
        })?;

        Ok(())
    }
}
