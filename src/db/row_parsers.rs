use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::errors::AuthzError;
use crate::models::{user::DbUser, user_role::DbUserRole};

pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, AuthzError> {
    let s = s.trim();

    // RFC3339 (e.g. 2025-11-19T12:34:56Z)
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // sqlx writes "YYYY-MM-DD HH:MM:SS.f+00:00" for DateTime<Utc>
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Ok(dt.with_timezone(&Utc));
    }

    // SQLite default timestamp format
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    if let Ok(naive_date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let ndt = naive_date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| AuthzError::internal("invalid datetime: date out of range"))?;
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    Err(AuthzError::internal(format!("invalid datetime: {}", s)))
}

fn parse_opt_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, AuthzError> {
    match s {
        Some(s) if !s.trim().is_empty() => Ok(Some(parse_datetime(&s)?)),
        _ => Ok(None),
    }
}

fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, AuthzError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| AuthzError::internal(format!("missing {}: {}", name, e)))
}

pub fn db_user_from_row(row: &SqliteRow) -> Result<DbUser, AuthzError> {
    let create_time: String = column(row, "create_time")?;
    let update_time: String = column(row, "update_time")?;
    let last_login: Option<String> = column(row, "last_login")?;

    Ok(DbUser {
        id: column(row, "id")?,
        name: column(row, "name")?,
        email: column(row, "email")?,
        password: column(row, "password")?,
        status: column(row, "status")?,
        is_super: column(row, "is_super")?,
        last_login: parse_opt_datetime(last_login)?,
        create_time: parse_datetime(&create_time)?,
        update_time: parse_datetime(&update_time)?,
    })
}

pub fn db_user_role_from_row(row: &SqliteRow) -> Result<DbUserRole, AuthzError> {
    let create_time: String = column(row, "create_time")?;
    let update_time: String = column(row, "update_time")?;

    Ok(DbUserRole {
        id: column(row, "id")?,
        user_id: column(row, "user_id")?,
        scope: column(row, "scope")?,
        scope_id: column(row, "scope_id")?,
        role: column(row, "role")?,
        create_time: parse_datetime(&create_time)?,
        update_time: parse_datetime(&update_time)?,
    })
}
