use sqlx::Row;

use assetdesk_core::domain::approval::{ApprovalAction, ApprovalId, ApprovalRecord};
use assetdesk_core::domain::request::RequestId;
use assetdesk_core::domain::user::UserId;

use super::asset_request::{stage_columns, stage_from_columns};
use super::{parse_timestamp, ApprovalRepository, RepositoryError};
use crate::DbPool;

pub struct SqlApprovalRepository {
    pool: DbPool,
}

impl SqlApprovalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalRecord, RepositoryError> {
    let action: String = row.try_get("action")?;
    let action = ApprovalAction::parse(&action)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown approval action `{action}`")))?;

    Ok(ApprovalRecord {
        id: ApprovalId(row.try_get("id")?),
        request_id: RequestId(row.try_get("request_id")?),
        stage: stage_from_columns(row.try_get("approval_level")?, row.try_get("escalated")?)?,
        action,
        approver_id: UserId(row.try_get("approver_id")?),
        comments: row.try_get("comments")?,
        decided_at: parse_timestamp("decided_at", row.try_get("decided_at")?)?,
    })
}

/// Shared by the repository and the decision transaction.
pub(crate) async fn insert_record<'e, E>(executor: E, record: &ApprovalRecord) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let (approval_level, escalated) = stage_columns(record.stage);

    sqlx::query(
        "INSERT INTO approval (id, request_id, approver_id, approval_level, escalated, action,
                               comments, decided_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&record.id.0)
    .bind(&record.request_id.0)
    .bind(&record.approver_id.0)
    .bind(approval_level)
    .bind(escalated)
    .bind(record.action.as_str())
    .bind(&record.comments)
    .bind(record.decided_at.to_rfc3339())
    .execute(executor)
    .await?;

    Ok(())
}

#[async_trait::async_trait]
impl ApprovalRepository for SqlApprovalRepository {
    async fn append(&self, record: ApprovalRecord) -> Result<(), RepositoryError> {
        insert_record(&self.pool, &record).await?;
        Ok(())
    }

    async fn list_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<ApprovalRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, request_id, approver_id, approval_level, escalated, action, comments,
                    decided_at
             FROM approval WHERE request_id = ? ORDER BY decided_at ASC, rowid ASC",
        )
        .bind(&request_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_record).collect()
    }
}
