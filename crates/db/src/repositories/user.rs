use sqlx::Row;

use assetdesk_core::domain::user::{Role, User, UserId};

use super::{parse_timestamp, RepositoryError, UserRepository};
use crate::DbPool;

const USER_COLUMNS: &str =
    "id, username, full_name, email, role, floor, department, is_active, created_at";

pub struct SqlUserRepository {
    pool: DbPool,
}

impl SqlUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_user(row: &sqlx::sqlite::SqliteRow) -> Result<User, RepositoryError> {
    let role: String = row.try_get("role")?;
    let is_active: i64 = row.try_get("is_active")?;

    Ok(User {
        id: UserId(row.try_get("id")?),
        username: row.try_get("username")?,
        full_name: row.try_get("full_name")?,
        email: row.try_get("email")?,
        role: Role::parse(&role),
        floor: row.try_get("floor")?,
        department: row.try_get("department")?,
        is_active: is_active != 0,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

/// Flips `is_active` and returns the updated user, or `None` for an unknown id.
pub(crate) async fn toggle_active<'e, E>(
    executor: E,
    id: &UserId,
) -> Result<Option<User>, RepositoryError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let row = sqlx::query(&format!(
        "UPDATE app_user SET is_active = CASE is_active WHEN 0 THEN 1 ELSE 0 END
         WHERE id = ?
         RETURNING {USER_COLUMNS}"
    ))
    .bind(&id.0)
    .fetch_optional(executor)
    .await?;

    row.as_ref().map(row_to_user).transpose()
}

#[async_trait::async_trait]
impl UserRepository for SqlUserRepository {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM app_user WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM app_user WHERE username = ? COLLATE NOCASE"
        ))
        .bind(username.trim())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn save(&self, user: User) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO app_user (id, username, full_name, email, role, floor, department,
                                   is_active, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 username = excluded.username,
                 full_name = excluded.full_name,
                 email = excluded.email,
                 role = excluded.role,
                 floor = excluded.floor,
                 department = excluded.department,
                 is_active = excluded.is_active",
        )
        .bind(&user.id.0)
        .bind(&user.username)
        .bind(&user.full_name)
        .bind(&user.email)
        .bind(user.role.as_str())
        .bind(&user.floor)
        .bind(&user.department)
        .bind(i64::from(user.is_active))
        .bind(user.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(&self) -> Result<Vec<User>, RepositoryError> {
        let rows = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM app_user ORDER BY username"))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_user).collect()
    }
}
