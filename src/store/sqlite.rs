use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::SqlitePool;

use super::IdentityStore;
use crate::db::row_parsers::{db_user_from_row, db_user_role_from_row};
use crate::errors::{AuthzError, AuthzResult};
use crate::models::user::{NewUser, User, UserStatus};
use crate::models::user_role::{ScopeRef, UserRole, UserRoleFilter, UserRoleUpsert};
use crate::utils::{to_db_id, utc_now};

const USER_COLUMNS: &str =
    "id, name, email, password, status, is_super, last_login, create_time, update_time";
const USER_ROLE_COLUMNS: &str = "id, user_id, scope, scope_id, role, create_time, update_time";

// RETURNING statements are drained with `fetch_all`: stopping at the first row
// leaves the write open on its pooled connection.
fn single_row(rows: Vec<SqliteRow>, statement: &str) -> AuthzResult<SqliteRow> {
    rows.into_iter()
        .next()
        .ok_or_else(|| AuthzError::internal(format!("{statement} returned no row")))
}

#[derive(Clone)]
pub struct SqliteIdentityStore {
    pool: SqlitePool,
}

impl SqliteIdentityStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn create_user(&self, new_user: NewUser) -> AuthzResult<User> {
        let now = utc_now();
        let rows = sqlx::query(&format!(
            "INSERT INTO users (name, email, password, status, is_super, create_time, update_time) \
             VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING {USER_COLUMNS}"
        ))
        .bind(&new_user.name)
        .bind(&new_user.email)
        .bind(&new_user.password)
        .bind(UserStatus::Active.as_str())
        .bind(new_user.is_super)
        .bind(now)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                AuthzError::user_exists(new_user.name.clone())
            }
            other => AuthzError::Store(other),
        })?;

        let row = single_row(rows, "users insert")?;
        User::try_from(db_user_from_row(&row)?)
    }

    pub async fn set_user_status(&self, id: u64, status: UserStatus) -> AuthzResult<()> {
        let result = sqlx::query("UPDATE users SET status = ?, update_time = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(utc_now())
            .bind(to_db_id(id)?)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AuthzError::unknown_user(id));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for SqliteIdentityStore {
    async fn get_user(&self, id: u64) -> AuthzResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
            .bind(to_db_id(id)?)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| User::try_from(db_user_from_row(&r)?)).transpose()
    }

    async fn get_user_by_name(&self, name: &str) -> AuthzResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE name = ?"))
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| User::try_from(db_user_from_row(&r)?)).transpose()
    }

    async fn upsert_user_role(&self, grant: UserRoleUpsert) -> AuthzResult<UserRole> {
        let now = utc_now();
        let rows = sqlx::query(&format!(
            r#"
            INSERT INTO user_roles (user_id, scope, scope_id, role, create_time, update_time)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id, scope, scope_id)
            DO UPDATE SET role = excluded.role, update_time = excluded.update_time
            RETURNING {USER_ROLE_COLUMNS}
            "#
        ))
        .bind(to_db_id(grant.user_id)?)
        .bind(grant.scope.kind.as_str())
        .bind(to_db_id(grant.scope.id)?)
        .bind(grant.role.as_str())
        .bind(now)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => AuthzError::ConflictingGrant {
                user_id: grant.user_id,
                scope: grant.scope,
            },
            other => AuthzError::Store(other),
        })?;

        let row = single_row(rows, "user_roles upsert")?;
        UserRole::try_from(db_user_role_from_row(&row)?)
    }

    async fn delete_user_role(&self, user_id: u64, scope: ScopeRef) -> AuthzResult<Option<UserRole>> {
        let rows = sqlx::query(&format!(
            "DELETE FROM user_roles WHERE user_id = ? AND scope = ? AND scope_id = ? RETURNING {USER_ROLE_COLUMNS}"
        ))
        .bind(to_db_id(user_id)?)
        .bind(scope.kind.as_str())
        .bind(to_db_id(scope.id)?)
        .fetch_all(&self.pool)
        .await?;

        rows.first()
            .map(|r| UserRole::try_from(db_user_role_from_row(r)?))
            .transpose()
    }

    async fn list_user_roles(&self, filter: UserRoleFilter) -> AuthzResult<Vec<UserRole>> {
        // NULL parameters disable the corresponding predicate.
        let rows = sqlx::query(&format!(
            r#"
            SELECT {USER_ROLE_COLUMNS}
            FROM user_roles
            WHERE (?1 IS NULL OR user_id = ?1)
              AND (?2 IS NULL OR scope = ?2)
              AND (?3 IS NULL OR scope_id = ?3)
            ORDER BY id
            "#
        ))
        .bind(filter.user_id.map(to_db_id).transpose()?)
        .bind(filter.scope.map(|kind| kind.as_str()))
        .bind(filter.scope_id.map(to_db_id).transpose()?)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| UserRole::try_from(db_user_role_from_row(r)?))
            .collect()
    }
}
