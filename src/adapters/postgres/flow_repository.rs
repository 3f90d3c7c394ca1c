//! PostgreSQL implementation of FlowRepository.
//!
//! The version compare-and-swap is a single conditional `UPDATE`; the
//! one-active-instance rule is the `flow_instances_one_active` partial
//! unique index.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::domain::flow::{FlowInstance, FlowKind, FlowStatus, PendingSkill, StepData, StepId};
use crate::domain::foundation::{FlowInstanceId, Timestamp, UserId};
use crate::ports::{FlowRepository, RepositoryError};

const ONE_ACTIVE_INDEX: &str = "flow_instances_one_active";

const SELECT_COLUMNS: &str = r#"
    SELECT id, user_id, kind, current_step, data, status, version,
           pending_skill, started_at, updated_at, finished_at
    FROM flow_instances
"#;

/// PostgreSQL implementation of FlowRepository.
#[derive(Clone)]
pub struct PostgresFlowRepository {
    pool: PgPool,
}

impl PostgresFlowRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn active_id(
        &self,
        user: &UserId,
        kind: FlowKind,
    ) -> Result<Option<FlowInstanceId>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id FROM flow_instances
            WHERE user_id = $1 AND kind = $2 AND status = 'in_progress' AND exclusive
            "#,
        )
        .bind(user.as_str())
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::storage(format!("Failed to fetch active flow: {e}")))?;

        Ok(row.map(|r| FlowInstanceId::from_uuid(r.get("id"))))
    }
}

#[async_trait]
impl FlowRepository for PostgresFlowRepository {
    async fn find(&self, id: FlowInstanceId) -> Result<Option<FlowInstance>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::storage(format!("Failed to fetch flow instance: {e}")))?;

        row.as_ref().map(row_to_instance).transpose()
    }

    async fn find_latest(
        &self,
        user: &UserId,
        kind: FlowKind,
    ) -> Result<Option<FlowInstance>, RepositoryError> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE user_id = $1 AND kind = $2 ORDER BY started_at DESC LIMIT 1"
        ))
        .bind(user.as_str())
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::storage(format!("Failed to fetch latest flow: {e}")))?;

        row.as_ref().map(row_to_instance).transpose()
    }

    async fn find_active(
        &self,
        user: &UserId,
        kind: FlowKind,
    ) -> Result<Option<FlowInstance>, RepositoryError> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE user_id = $1 AND kind = $2 AND status = 'in_progress' \
             ORDER BY started_at DESC LIMIT 1"
        ))
        .bind(user.as_str())
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::storage(format!("Failed to fetch active flow: {e}")))?;

        row.as_ref().map(row_to_instance).transpose()
    }

    async fn insert(&self, instance: &FlowInstance, exclusive: bool) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO flow_instances (
                id, user_id, kind, current_step, data, status, version,
                pending_skill, exclusive, started_at, updated_at, finished_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(instance.id().as_uuid())
        .bind(instance.user_id().as_str())
        .bind(instance.kind().as_str())
        .bind(instance.current_step().as_str())
        .bind(to_json(instance.data())?)
        .bind(instance.status().as_str())
        .bind(version_to_db(instance.version())?)
        .bind(pending_to_json(instance.pending_skill())?)
        .bind(exclusive)
        .bind(instance.started_at().as_datetime())
        .bind(instance.updated_at().as_datetime())
        .bind(instance.finished_at().map(|t| *t.as_datetime()))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.constraint() == Some(ONE_ACTIVE_INDEX) => {
                let active = self
                    .active_id(instance.user_id(), instance.kind())
                    .await?
                    .ok_or_else(|| {
                        RepositoryError::storage("active flow vanished after unique violation")
                    })?;
                Err(RepositoryError::AlreadyActive {
                    kind: instance.kind(),
                    instance: active,
                })
            }
            Err(e) => Err(RepositoryError::storage(format!(
                "Failed to insert flow instance: {e}"
            ))),
        }
    }

    async fn update(
        &self,
        instance: &FlowInstance,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE flow_instances SET
                current_step = $4,
                data = $5,
                status = $6,
                version = $7,
                pending_skill = $8,
                updated_at = $9,
                finished_at = $10
            WHERE id = $1 AND version = $2 AND user_id = $3
            "#,
        )
        .bind(instance.id().as_uuid())
        .bind(version_to_db(expected_version)?)
        .bind(instance.user_id().as_str())
        .bind(instance.current_step().as_str())
        .bind(to_json(instance.data())?)
        .bind(instance.status().as_str())
        .bind(version_to_db(instance.version())?)
        .bind(pending_to_json(instance.pending_skill())?)
        .bind(instance.updated_at().as_datetime())
        .bind(instance.finished_at().map(|t| *t.as_datetime()))
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::storage(format!("Failed to update flow instance: {e}")))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        // Nothing matched: find out why.
        let row = sqlx::query("SELECT version, user_id FROM flow_instances WHERE id = $1")
            .bind(instance.id().as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::storage(format!("Failed to fetch flow version: {e}")))?;

        match row {
            None => Err(RepositoryError::NotFound(format!("flow instance {}", instance.id()))),
            Some(row) => {
                let owner: String = row.get("user_id");
                if owner != instance.user_id().as_str() {
                    return Err(RepositoryError::Forbidden(format!(
                        "flow instance {} belongs to another user",
                        instance.id()
                    )));
                }
                let found: i64 = row.get("version");
                Err(RepositoryError::StaleVersion {
                    expected: expected_version,
                    found: u64::try_from(found).unwrap_or_default(),
                })
            }
        }
    }
}

fn version_to_db(version: u64) -> Result<i64, RepositoryError> {
    i64::try_from(version).map_err(|_| RepositoryError::storage(format!("version {version} overflows BIGINT")))
}

fn to_json(data: &StepData) -> Result<serde_json::Value, RepositoryError> {
    serde_json::to_value(data).map_err(|e| RepositoryError::storage(format!("Failed to encode flow data: {e}")))
}

fn pending_to_json(pending: Option<&PendingSkill>) -> Result<Option<serde_json::Value>, RepositoryError> {
    pending
        .map(serde_json::to_value)
        .transpose()
        .map_err(|e| RepositoryError::storage(format!("Failed to encode pending skill: {e}")))
}

fn row_to_instance(row: &PgRow) -> Result<FlowInstance, RepositoryError> {
    let user_id: String = row.get("user_id");
    let kind: String = row.get("kind");
    let current_step: String = row.get("current_step");
    let data: serde_json::Value = row.get("data");
    let status: String = row.get("status");
    let version: i64 = row.get("version");
    let pending: Option<serde_json::Value> = row.get("pending_skill");
    let started_at: chrono::DateTime<chrono::Utc> = row.get("started_at");
    let updated_at: chrono::DateTime<chrono::Utc> = row.get("updated_at");
    let finished_at: Option<chrono::DateTime<chrono::Utc>> = row.get("finished_at");

    let user_id = UserId::new(user_id)
        .map_err(|e| RepositoryError::storage(format!("Invalid stored user id: {e}")))?;
    let kind: FlowKind = kind
        .parse()
        .map_err(|e| RepositoryError::storage(format!("Invalid stored flow kind: {e}")))?;
    let status = FlowStatus::parse(&status)
        .ok_or_else(|| RepositoryError::storage(format!("Invalid stored flow status: {status}")))?;
    let data: StepData = serde_json::from_value(data)
        .map_err(|e| RepositoryError::storage(format!("Invalid stored flow data: {e}")))?;
    let pending: Option<PendingSkill> = pending
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| RepositoryError::storage(format!("Invalid stored pending skill: {e}")))?;
    let version = u64::try_from(version)
        .map_err(|_| RepositoryError::storage(format!("Invalid stored version: {version}")))?;

    Ok(FlowInstance::reconstitute(
        FlowInstanceId::from_uuid(row.get("id")),
        user_id,
        kind,
        StepId::new(current_step),
        data,
        status,
        version,
        pending,
        Timestamp::from_datetime(started_at),
        Timestamp::from_datetime(updated_at),
        finished_at.map(Timestamp::from_datetime),
    ))
}
