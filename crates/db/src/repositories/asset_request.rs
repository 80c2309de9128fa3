use std::str::FromStr;

use rust_decimal::Decimal;
use sqlx::{QueryBuilder, Row, Sqlite};

use assetdesk_core::domain::request::{
    ApprovalStage, AssetRequest, RequestId, RequestStatus, Urgency,
};
use assetdesk_core::domain::user::{Role, UserId};
use assetdesk_core::visibility::RequestScope;

use super::{
    parse_timestamp, parse_u32, parse_u8, AssetRequestRepository, RepositoryError, RequestFilter,
};
use crate::DbPool;

pub(crate) const REQUEST_COLUMNS: &str = "id, owner_id, requester_role, floor, item_name, \
     quantity, purpose, request_type, estimated_cost, urgency, status, approval_level, \
     escalated, created_at, updated_at";

pub struct SqlAssetRequestRepository {
    pool: DbPool,
}

impl SqlAssetRequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// `(approval_level, escalated)` column pair for a stage.
pub(crate) fn stage_columns(stage: ApprovalStage) -> (i64, i64) {
    match stage {
        ApprovalStage::Level { level } => (i64::from(level), 0),
        ApprovalStage::Escalated { from_level } => (i64::from(from_level), 1),
    }
}

pub(crate) fn stage_from_columns(level: i64, escalated: i64) -> Result<ApprovalStage, RepositoryError> {
    let level = parse_u8("approval_level", level)?;
    if level == 0 {
        return Err(RepositoryError::Decode("approval_level must be at least 1".to_string()));
    }
    Ok(if escalated != 0 {
        ApprovalStage::Escalated { from_level: level }
    } else {
        ApprovalStage::Level { level }
    })
}

pub(crate) fn parse_status(value: &str) -> Result<RequestStatus, RepositoryError> {
    RequestStatus::parse(value)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown request status `{value}`")))
}

pub(crate) fn row_to_request(row: &sqlx::sqlite::SqliteRow) -> Result<AssetRequest, RepositoryError> {
    let requester_role: String = row.try_get("requester_role")?;
    let status: String = row.try_get("status")?;
    let urgency: String = row.try_get("urgency")?;
    let estimated_cost: Option<String> = row.try_get("estimated_cost")?;

    let estimated_cost = estimated_cost
        .map(|raw| {
            Decimal::from_str(&raw).map_err(|error| {
                RepositoryError::Decode(format!("invalid estimated_cost `{raw}`: {error}"))
            })
        })
        .transpose()?;
    let urgency = Urgency::parse(&urgency)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown urgency `{urgency}`")))?;

    Ok(AssetRequest {
        id: RequestId(row.try_get("id")?),
        owner_id: UserId(row.try_get("owner_id")?),
        requester_role: Role::parse(&requester_role),
        floor: row.try_get("floor")?,
        item_name: row.try_get("item_name")?,
        quantity: parse_u32("quantity", row.try_get("quantity")?)?,
        purpose: row.try_get("purpose")?,
        request_type: row.try_get("request_type")?,
        estimated_cost,
        urgency,
        status: parse_status(&status)?,
        stage: stage_from_columns(row.try_get("approval_level")?, row.try_get("escalated")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

pub(crate) async fn insert_request<'e, E>(
    executor: E,
    request: &AssetRequest,
) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let (approval_level, escalated) = stage_columns(request.stage);

    sqlx::query(
        "INSERT INTO asset_request (id, owner_id, requester_role, floor, item_name, quantity,
                                    purpose, request_type, estimated_cost, urgency, status,
                                    approval_level, escalated, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&request.id.0)
    .bind(&request.owner_id.0)
    .bind(request.requester_role.as_str())
    .bind(&request.floor)
    .bind(&request.item_name)
    .bind(i64::from(request.quantity))
    .bind(&request.purpose)
    .bind(&request.request_type)
    .bind(request.estimated_cost.map(|cost| cost.to_string()))
    .bind(request.urgency.as_str())
    .bind(request.status.as_str())
    .bind(approval_level)
    .bind(escalated)
    .bind(request.created_at.to_rfc3339())
    .bind(request.updated_at.to_rfc3339())
    .execute(executor)
    .await?;

    Ok(())
}

#[async_trait::async_trait]
impl AssetRequestRepository for SqlAssetRequestRepository {
    async fn find_by_id(&self, id: &RequestId) -> Result<Option<AssetRequest>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM asset_request WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;

        row.as_ref().map(row_to_request).transpose()
    }

    async fn insert(&self, request: AssetRequest) -> Result<(), RepositoryError> {
        insert_request(&self.pool, &request).await?;
        Ok(())
    }

    async fn list(&self, filter: &RequestFilter) -> Result<Vec<AssetRequest>, RepositoryError> {
        let mut query_builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {REQUEST_COLUMNS} FROM asset_request WHERE 1=1"));

        match &filter.scope {
            RequestScope::All => {}
            RequestScope::Floor(floor) => {
                query_builder
                    .push(" AND floor IS NOT NULL AND TRIM(floor) = ")
                    .push_bind(floor.trim().to_string())
                    .push(" COLLATE NOCASE");
            }
            RequestScope::Own(owner_id) => {
                query_builder.push(" AND owner_id = ").push_bind(owner_id.0.clone());
            }
        }

        if let Some(status) = filter.status {
            query_builder.push(" AND status = ").push_bind(status.as_str());
        }

        query_builder
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(i64::from(filter.limit))
            .push(" OFFSET ")
            .push_bind(i64::from(filter.offset));

        let rows = query_builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_request).collect()
    }
}
