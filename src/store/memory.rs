use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use super::IdentityStore;
use crate::errors::{AuthzError, AuthzResult};
use crate::models::user::{NewUser, User, UserStatus};
use crate::models::user_role::{ScopeKind, ScopeRef, UserRole, UserRoleFilter, UserRoleUpsert};
use crate::utils::utc_now;

type GrantKey = (u64, ScopeKind, u64);

#[derive(Default)]
struct Tables {
    next_user_id: u64,
    next_role_id: u64,
    users: BTreeMap<u64, User>,
    names: HashMap<String, u64>,
    roles: HashMap<GrantKey, UserRole>,
}

/// In-process store with the same uniqueness rules as the SQLite schema.
#[derive(Default)]
pub struct MemoryIdentityStore {
    tables: Mutex<Tables>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> AuthzResult<std::sync::MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| AuthzError::internal("memory store lock poisoned"))
    }

    pub fn create_user(&self, new_user: NewUser) -> AuthzResult<User> {
        let mut tables = self.lock()?;
        if tables.names.contains_key(&new_user.name) {
            return Err(AuthzError::user_exists(new_user.name));
        }

        tables.next_user_id += 1;
        let now = utc_now();
        let user = User {
            id: tables.next_user_id,
            name: new_user.name,
            email: new_user.email,
            status: UserStatus::Active,
            is_super: new_user.is_super,
            last_login: None,
            create_time: now,
            update_time: now,
        };
        tables.names.insert(user.name.clone(), user.id);
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn get_user(&self, id: u64) -> AuthzResult<Option<User>> {
        Ok(self.lock()?.users.get(&id).cloned())
    }

    async fn get_user_by_name(&self, name: &str) -> AuthzResult<Option<User>> {
        let tables = self.lock()?;
        Ok(tables.names.get(name).and_then(|id| tables.users.get(id)).cloned())
    }

    async fn upsert_user_role(&self, grant: UserRoleUpsert) -> AuthzResult<UserRole> {
        let mut tables = self.lock()?;
        let key = (grant.user_id, grant.scope.kind, grant.scope.id);
        let now = utc_now();

        if let Some(existing) = tables.roles.get_mut(&key) {
            existing.role = grant.role;
            existing.update_time = now;
            return Ok(existing.clone());
        }

        tables.next_role_id += 1;
        let role = UserRole {
            id: tables.next_role_id,
            user_id: grant.user_id,
            scope: grant.scope.kind,
            scope_id: grant.scope.id,
            role: grant.role,
            create_time: now,
            update_time: now,
        };
        tables.roles.insert(key, role.clone());
        Ok(role)
    }

    async fn delete_user_role(&self, user_id: u64, scope: ScopeRef) -> AuthzResult<Option<UserRole>> {
        Ok(self.lock()?.roles.remove(&(user_id, scope.kind, scope.id)))
    }

    async fn list_user_roles(&self, filter: UserRoleFilter) -> AuthzResult<Vec<UserRole>> {
        let tables = self.lock()?;
        let mut roles: Vec<UserRole> = tables
            .roles
            .values()
            .filter(|role| filter.matches(role))
            .cloned()
            .collect();
        roles.sort_by_key(|role| role.id);
        Ok(roles)
    }
}
