//! PostgreSQL implementation of ConversationRepository.
//!
//! Messages carry a per-conversation sequence number. A batch is appended in
//! one transaction that locks the conversation row, so concurrent appends
//! cannot interleave or reuse a sequence number.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::domain::conversation::{Conversation, ConversationState, Message, MessagePayload, Role};
use crate::domain::foundation::{ConversationId, MessageId, Timestamp, UserId};
use crate::ports::{ConversationRepository, RepositoryError};

/// PostgreSQL implementation of ConversationRepository.
#[derive(Clone)]
pub struct PostgresConversationRepository {
    pool: PgPool,
}

impl PostgresConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationRepository for PostgresConversationRepository {
    async fn ensure_exists(
        &self,
        user: &UserId,
        id: ConversationId,
    ) -> Result<Conversation, RepositoryError> {
        let now = Timestamp::now();
        sqlx::query(
            r#"
            INSERT INTO conversations (id, user_id, state, created_at, updated_at)
            VALUES ($1, $2, 'open', $3, $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id.as_uuid())
        .bind(user.as_str())
        .bind(now.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::storage(format!("Failed to create conversation: {e}")))?;

        let conversation = self
            .find(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("conversation {id}")))?;
        conversation.ensure_owned_by(user)?;
        Ok(conversation)
    }

    async fn find(&self, id: ConversationId) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, state, created_at, updated_at
            FROM conversations
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::storage(format!("Failed to fetch conversation: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let message_rows = sqlx::query(
            r#"
            SELECT id, role, content, payload, created_at
            FROM conversation_messages
            WHERE conversation_id = $1
            ORDER BY seq ASC
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::storage(format!("Failed to fetch messages: {e}")))?;

        let messages = message_rows
            .iter()
            .map(row_to_message)
            .collect::<Result<Vec<_>, _>>()?;

        let user_id: String = row.get("user_id");
        let state: String = row.get("state");
        let created_at: chrono::DateTime<chrono::Utc> = row.get("created_at");
        let updated_at: chrono::DateTime<chrono::Utc> = row.get("updated_at");

        Ok(Some(Conversation::reconstitute(
            ConversationId::from_uuid(row.get("id")),
            UserId::new(user_id)
                .map_err(|e| RepositoryError::storage(format!("Invalid stored user id: {e}")))?,
            ConversationState::parse(&state).ok_or_else(|| {
                RepositoryError::storage(format!("Invalid stored conversation state: {state}"))
            })?,
            messages,
            Timestamp::from_datetime(created_at),
            Timestamp::from_datetime(updated_at),
        )))
    }

    async fn append_messages(
        &self,
        id: ConversationId,
        messages: Vec<Message>,
    ) -> Result<Vec<Message>, RepositoryError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RepositoryError::storage(format!("Failed to start transaction: {e}")))?;

        let state_row = sqlx::query("SELECT state FROM conversations WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| RepositoryError::storage(format!("Failed to lock conversation: {e}")))?
            .ok_or_else(|| RepositoryError::NotFound(format!("conversation {id}")))?;

        let state: String = state_row.get("state");
        if ConversationState::parse(&state) != Some(ConversationState::Open) {
            return Err(RepositoryError::Archived(id));
        }

        let last = sqlx::query(
            r#"
            SELECT seq, created_at FROM conversation_messages
            WHERE conversation_id = $1
            ORDER BY seq DESC
            LIMIT 1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| RepositoryError::storage(format!("Failed to fetch last message: {e}")))?;

        let (mut seq, mut floor) = match last {
            Some(row) => {
                let created_at: chrono::DateTime<chrono::Utc> = row.get("created_at");
                (row.get::<i64, _>("seq"), Some(Timestamp::from_datetime(created_at)))
            }
            None => (0, None),
        };

        let mut stored = Vec::with_capacity(messages.len());
        for message in messages {
            let message = match &floor {
                Some(floor) => message.restamped_after(floor),
                None => message,
            };
            seq += 1;

            let payload = message
                .payload()
                .map(serde_json::to_value)
                .transpose()
                .map_err(|e| RepositoryError::storage(format!("Failed to encode payload: {e}")))?;

            sqlx::query(
                r#"
                INSERT INTO conversation_messages
                    (id, conversation_id, seq, role, content, payload, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(message.id().as_uuid())
            .bind(id.as_uuid())
            .bind(seq)
            .bind(message.role().as_str())
            .bind(message.content())
            .bind(payload)
            .bind(message.created_at().as_datetime())
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::storage(format!("Failed to insert message: {e}")))?;

            floor = Some(*message.created_at());
            stored.push(message);
        }

        if let Some(last) = &floor {
            sqlx::query("UPDATE conversations SET updated_at = $2 WHERE id = $1")
                .bind(id.as_uuid())
                .bind(last.as_datetime())
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    RepositoryError::storage(format!("Failed to update conversation timestamp: {e}"))
                })?;
        }

        tx.commit()
            .await
            .map_err(|e| RepositoryError::storage(format!("Failed to commit transaction: {e}")))?;

        Ok(stored)
    }

    async fn archive(&self, id: ConversationId) -> Result<Conversation, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET state = 'archived',
                updated_at = CASE WHEN state = 'archived' THEN updated_at ELSE $2 END
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(Timestamp::now().as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::storage(format!("Failed to archive conversation: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("conversation {id}")));
        }

        self.find(id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("conversation {id}")))
    }
}

fn row_to_message(row: &PgRow) -> Result<Message, RepositoryError> {
    let role: String = row.get("role");
    let content: String = row.get("content");
    let payload: Option<serde_json::Value> = row.get("payload");
    let created_at: chrono::DateTime<chrono::Utc> = row.get("created_at");

    let role = Role::parse(&role)
        .ok_or_else(|| RepositoryError::storage(format!("Invalid stored role: {role}")))?;
    let payload: Option<MessagePayload> = payload
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| RepositoryError::storage(format!("Invalid stored payload: {e}")))?;

    Ok(Message::reconstitute(
        MessageId::from_uuid(row.get("id")),
        role,
        content,
        Timestamp::from_datetime(created_at),
        payload,
    ))
}
