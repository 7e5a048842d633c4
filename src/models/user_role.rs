use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AuthzError;
use crate::events::{Loggable, Severity};

/// Instance id used for grants on the platform itself.
pub const PLATFORM_INSTANCE_ID: u64 = 0;

// =============================================================================
// SCOPE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Platform,
    Cluster,
    Pipeline,
    Project,
    #[serde(rename = "appstore")]
    AppStore,
}

impl ScopeKind {
    pub const ALL: [ScopeKind; 5] = [
        ScopeKind::Platform,
        ScopeKind::Cluster,
        ScopeKind::Pipeline,
        ScopeKind::Project,
        ScopeKind::AppStore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::Platform => "platform",
            ScopeKind::Cluster => "cluster",
            ScopeKind::Pipeline => "pipeline",
            ScopeKind::Project => "project",
            ScopeKind::AppStore => "appstore",
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScopeKind {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScopeKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| AuthzError::invalid_scope(format!("unknown scope kind '{s}'")))
    }
}

/// A concrete scope instance, e.g. cluster #7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeRef {
    pub kind: ScopeKind,
    pub id: u64,
}

impl ScopeRef {
    pub fn new(kind: ScopeKind, id: u64) -> Self {
        Self { kind, id }
    }

    pub fn platform() -> Self {
        Self::new(ScopeKind::Platform, PLATFORM_INSTANCE_ID)
    }

    pub fn cluster(id: u64) -> Self {
        Self::new(ScopeKind::Cluster, id)
    }

    pub fn project(id: u64) -> Self {
        Self::new(ScopeKind::Project, id)
    }

    pub fn pipeline(id: u64) -> Self {
        Self::new(ScopeKind::Pipeline, id)
    }

    pub fn app_store(id: u64) -> Self {
        Self::new(ScopeKind::AppStore, id)
    }

    /// Platform grants only exist on the sentinel instance.
    pub fn validate(&self) -> Result<(), AuthzError> {
        if self.kind == ScopeKind::Platform && self.id != PLATFORM_INSTANCE_ID {
            return Err(AuthzError::invalid_scope(format!(
                "platform scope must use instance id {PLATFORM_INSTANCE_ID}, got {}",
                self.id
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ScopeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

// =============================================================================
// ROLE LEVEL
// =============================================================================

/// Ordered capability tier: viewer < editor < admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleLevel {
    Viewer,
    Editor,
    Admin,
}

impl RoleLevel {
    pub const ALL: [RoleLevel; 3] = [RoleLevel::Viewer, RoleLevel::Editor, RoleLevel::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoleLevel::Viewer => "viewer",
            RoleLevel::Editor => "editor",
            RoleLevel::Admin => "admin",
        }
    }

    pub fn satisfies(&self, required: RoleLevel) -> bool {
        *self >= required
    }
}

impl fmt::Display for RoleLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoleLevel {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoleLevel::ALL
            .into_iter()
            .find(|level| level.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| AuthzError::invalid_role(s))
    }
}

// =============================================================================
// USER ROLE (GRANT)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRole {
    pub id: u64,
    pub user_id: u64,
    pub scope: ScopeKind,
    pub scope_id: u64,
    pub role: RoleLevel,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl UserRole {
    pub fn scope_ref(&self) -> ScopeRef {
        ScopeRef::new(self.scope, self.scope_id)
    }

    pub fn is_at(&self, scope: ScopeRef) -> bool {
        self.scope == scope.kind && self.scope_id == scope.id
    }
}

impl Loggable for UserRole {
    fn entity_type() -> &'static str { "user_role" }
    fn subject_id(&self) -> u64 { self.user_id }
    fn severity(&self) -> Severity { Severity::Critical }
}

/// Storage row; scope and role are kept as text.
#[derive(Debug, Clone)]
pub struct DbUserRole {
    pub id: i64,
    pub user_id: i64,
    pub scope: String,
    pub scope_id: i64,
    pub role: String,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl TryFrom<DbUserRole> for UserRole {
    type Error = AuthzError;

    fn try_from(value: DbUserRole) -> Result<Self, Self::Error> {
        Ok(UserRole {
            id: crate::utils::from_db_id(value.id)?,
            user_id: crate::utils::from_db_id(value.user_id)?,
            scope: value
                .scope
                .parse()
                .map_err(|_| AuthzError::internal(format!("stored scope '{}' is invalid", value.scope)))?,
            scope_id: crate::utils::from_db_id(value.scope_id)?,
            role: value
                .role
                .parse()
                .map_err(|_| AuthzError::internal(format!("stored role '{}' is invalid", value.role)))?,
            create_time: value.create_time,
            update_time: value.update_time,
        })
    }
}

/// Write request for the unique (user, scope, instance) triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserRoleUpsert {
    pub user_id: u64,
    pub scope: ScopeRef,
    pub role: RoleLevel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserRoleFilter {
    pub user_id: Option<u64>,
    pub scope: Option<ScopeKind>,
    pub scope_id: Option<u64>,
}

impl UserRoleFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_user(user_id: u64) -> Self {
        Self { user_id: Some(user_id), ..Self::default() }
    }

    pub fn for_scope(scope: ScopeRef) -> Self {
        Self {
            scope: Some(scope.kind),
            scope_id: Some(scope.id),
            ..Self::default()
        }
    }

    pub fn matches(&self, role: &UserRole) -> bool {
        self.user_id.map_or(true, |id| role.user_id == id)
            && self.scope.map_or(true, |kind| role.scope == kind)
            && self.scope_id.map_or(true, |id| role.scope_id == id)
    }
}

/// Access-control-list entry for one scope instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeMember {
    pub user_id: u64,
    pub user_name: String,
    pub role: RoleLevel,
    pub scope: ScopeRef,
}
