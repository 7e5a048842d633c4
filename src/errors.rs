use crate::models::user_role::{RoleLevel, ScopeRef};

pub type AuthzResult<T> = Result<T, AuthzError>;

#[derive(thiserror::Error, Debug)]
pub enum AuthzError {
    #[error("unknown user: {0}")]
    UnknownUser(String),
    #[error("invalid role: {0}")]
    InvalidRole(String),
    #[error("invalid scope: {0}")]
    InvalidScope(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflicting grant for user {user_id} at {scope}")]
    ConflictingGrant { user_id: u64, scope: ScopeRef },
    #[error("user already exists: {0}")]
    UserExists(String),
    #[error("forbidden: user {user_id} requires {required} at {scope}")]
    Forbidden {
        user_id: u64,
        required: RoleLevel,
        scope: ScopeRef,
    },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("store error")]
    Store(#[from] sqlx::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthzError {
    pub fn unknown_user(user: impl ToString) -> Self {
        Self::UnknownUser(user.to_string())
    }

    pub fn invalid_role(role: impl Into<String>) -> Self {
        Self::InvalidRole(role.into())
    }

    pub fn invalid_scope(message: impl Into<String>) -> Self {
        Self::InvalidScope(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn user_exists(name: impl Into<String>) -> Self {
        Self::UserExists(name.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Short machine-readable code, stable across message changes.
    pub fn code(&self) -> &'static str {
        match self {
            AuthzError::UnknownUser(_) => "unknown_user",
            AuthzError::InvalidRole(_) => "invalid_role",
            AuthzError::InvalidScope(_) => "invalid_scope",
            AuthzError::NotFound(_) => "not_found",
            AuthzError::ConflictingGrant { .. } => "conflicting_grant",
            AuthzError::UserExists(_) => "user_exists",
            AuthzError::Forbidden { .. } => "forbidden",
            AuthzError::Configuration(_) => "configuration",
            AuthzError::Store(_) => "store",
            AuthzError::Internal(_) => "internal",
        }
    }
}

impl From<anyhow::Error> for AuthzError {
    fn from(value: anyhow::Error) -> Self {
        Self::Internal(value.to_string())
    }
}
