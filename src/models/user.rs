use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AuthzError;
use crate::models::user_role::UserRole;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    Disabled,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Disabled => "disabled",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserStatus {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" | "normal" | "" => Ok(UserStatus::Active),
            "disabled" => Ok(UserStatus::Disabled),
            other => Err(AuthzError::internal(format!("unknown user status '{other}'"))),
        }
    }
}

/// Public view of a user. The credential secret stays on [`DbUser`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub name: String,
    pub email: Option<String>,
    pub status: UserStatus,
    pub is_super: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

#[derive(Clone)]
pub struct DbUser {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    pub password: String,
    pub status: String,
    pub is_super: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

// Hand-written so the credential never reaches a log line.
impl fmt::Debug for DbUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbUser")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("status", &self.status)
            .field("is_super", &self.is_super)
            .finish_non_exhaustive()
    }
}

impl TryFrom<DbUser> for User {
    type Error = AuthzError;

    fn try_from(value: DbUser) -> Result<Self, Self::Error> {
        Ok(User {
            id: crate::utils::from_db_id(value.id)?,
            name: value.name,
            email: value.email,
            status: value.status.parse()?,
            is_super: value.is_super,
            last_login: value.last_login,
            create_time: value.create_time,
            update_time: value.update_time,
        })
    }
}

/// Input for seeding a user record. `password` is already hashed.
#[derive(Clone)]
pub struct NewUser {
    pub name: String,
    pub email: Option<String>,
    pub password: String,
    pub is_super: bool,
}

impl NewUser {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: None,
            password: String::new(),
            is_super: false,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_password_hash(mut self, hash: impl Into<String>) -> Self {
        self.password = hash.into();
        self
    }

    pub fn super_admin(mut self) -> Self {
        self.is_super = true;
        self
    }
}

/// A user together with the grants attached for the current request.
#[derive(Debug, Clone, Serialize)]
pub struct UserWithRoles {
    #[serde(flatten)]
    pub user: User,
    pub roles: Vec<UserRole>,
}
