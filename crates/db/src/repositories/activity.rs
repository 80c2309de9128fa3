use sqlx::Row;

use assetdesk_core::audit::ActivityEntry;
use assetdesk_core::domain::request::RequestId;
use assetdesk_core::domain::user::UserId;

use super::{parse_timestamp, ActivityLogRepository, RepositoryError};
use crate::DbPool;

const ACTIVITY_COLUMNS: &str =
    "id, user_id, action, description, request_id, ip_address, occurred_at";

pub struct SqlActivityLogRepository {
    pool: DbPool,
}

impl SqlActivityLogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<ActivityEntry, RepositoryError> {
    let request_id: Option<String> = row.try_get("request_id")?;

    Ok(ActivityEntry {
        id: row.try_get("id")?,
        user_id: UserId(row.try_get("user_id")?),
        action: row.try_get("action")?,
        description: row.try_get("description")?,
        request_id: request_id.map(RequestId),
        ip_address: row.try_get("ip_address")?,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}

pub(crate) async fn insert_entry<'e, E>(executor: E, entry: &ActivityEntry) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        "INSERT INTO activity_log (id, user_id, action, description, request_id, ip_address,
                                   occurred_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&entry.id)
    .bind(&entry.user_id.0)
    .bind(&entry.action)
    .bind(&entry.description)
    .bind(entry.request_id.as_ref().map(|id| id.0.as_str()))
    .bind(&entry.ip_address)
    .bind(entry.occurred_at.to_rfc3339())
    .execute(executor)
    .await?;

    Ok(())
}

#[async_trait::async_trait]
impl ActivityLogRepository for SqlActivityLogRepository {
    async fn append(&self, entry: ActivityEntry) -> Result<(), RepositoryError> {
        insert_entry(&self.pool, &entry).await?;
        Ok(())
    }

    async fn recent(&self, limit: u32) -> Result<Vec<ActivityEntry>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activity_log
             ORDER BY occurred_at DESC, rowid DESC LIMIT ?"
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn list_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<ActivityEntry>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activity_log
             WHERE request_id = ? ORDER BY occurred_at ASC, rowid ASC"
        ))
        .bind(&request_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use assetdesk_core::audit::{ActivityAction, ActivityEntry};
    use assetdesk_core::domain::request::RequestId;
    use assetdesk_core::domain::user::UserId;

    use super::SqlActivityLogRepository;
    use crate::fixtures::DemoSeedDataset;
    use crate::repositories::ActivityLogRepository;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn recent_is_newest_first_and_limited() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        DemoSeedDataset::load(&pool).await.expect("seed");
        let repo = SqlActivityLogRepository::new(pool);

        let request_id = RequestId(DemoSeedDataset::EMPLOYEE_REQUEST.to_string());
        let actor = UserId(DemoSeedDataset::ADMIN.to_string());
        let base = Utc::now() + Duration::hours(1);

        for offset in 0..3 {
            repo.append(
                ActivityEntry::new(
                    actor.clone(),
                    ActivityAction::RequestApproved,
                    format!("entry {offset}"),
                    Some(request_id.clone()),
                    base + Duration::seconds(offset),
                )
                .with_ip_address("127.0.0.1"),
            )
            .await
            .expect("append");
        }

        let recent = repo.recent(2).await.expect("recent");
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].description, "entry 2");
        assert_eq!(recent[1].description, "entry 1");
        assert_eq!(recent[0].ip_address.as_deref(), Some("127.0.0.1"));

        let for_request = repo.list_for_request(&request_id).await.expect("for request");
        assert!(for_request.len() >= 3);
        assert_eq!(for_request.last().map(|entry| entry.description.as_str()), Some("entry 2"));
    }
}
