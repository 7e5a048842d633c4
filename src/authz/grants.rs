use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::errors::{AuthzError, AuthzResult};
use crate::events::{log_activity, EventBus};
use crate::models::user::UserWithRoles;
use crate::models::user_role::{
    RoleLevel, ScopeMember, ScopeRef, UserRole, UserRoleFilter, UserRoleUpsert,
};
use crate::store::IdentityStore;

/// Per-user mirror of `list_for_user`. Every invalidation bumps the user's
/// generation; a fill is only stored if the generation it started from is
/// still current, so a list read before a grant/revoke never lands afterwards.
#[derive(Default)]
struct RoleCache {
    entries: HashMap<u64, Vec<UserRole>>,
    generations: HashMap<u64, u64>,
}

impl RoleCache {
    fn generation(&self, user_id: u64) -> u64 {
        self.generations.get(&user_id).copied().unwrap_or(0)
    }
}

/// Creates, updates and revokes grants. All durable state lives in the store;
/// the optional cache only mirrors `list_for_user` results.
pub struct RoleGrantManager {
    store: Arc<dyn IdentityStore>,
    events: EventBus,
    cache: Option<RwLock<RoleCache>>,
}

impl RoleGrantManager {
    pub fn new(store: Arc<dyn IdentityStore>, events: EventBus, cache_enabled: bool) -> Self {
        Self {
            store,
            events,
            cache: cache_enabled.then(|| RwLock::new(RoleCache::default())),
        }
    }

    /// Grant `role` (by name) at `scope`. The role name is validated before any write.
    pub async fn grant(&self, user_id: u64, scope: ScopeRef, role: &str) -> AuthzResult<UserRole> {
        let role: RoleLevel = role.parse()?;
        self.grant_level(user_id, scope, role).await
    }

    pub async fn grant_level(&self, user_id: u64, scope: ScopeRef, role: RoleLevel) -> AuthzResult<UserRole> {
        scope.validate()?;
        if self.store.get_user(user_id).await?.is_none() {
            return Err(AuthzError::unknown_user(user_id));
        }

        let grant = self
            .store
            .upsert_user_role(UserRoleUpsert { user_id, scope, role })
            .await?;
        self.invalidate(user_id);

        tracing::info!(user_id, scope = %scope, role = %role, "role granted");
        log_activity(&self.events, "granted", None, &grant, None);
        Ok(grant)
    }

    /// Absent grants are not an error.
    pub async fn revoke(&self, user_id: u64, scope: ScopeRef) -> AuthzResult<()> {
        match self.store.delete_user_role(user_id, scope).await? {
            Some(removed) => {
                self.invalidate(user_id);
                tracing::info!(user_id, scope = %scope, role = %removed.role, "role revoked");
                log_activity(&self.events, "revoked", None, &removed, None);
            }
            None => {
                tracing::debug!(user_id, scope = %scope, "revoke on absent grant ignored");
            }
        }
        Ok(())
    }

    pub async fn list_for_user(&self, user_id: u64) -> AuthzResult<Vec<UserRole>> {
        let mut started_at = None;
        if let Some(cache) = &self.cache {
            let lookup = cache
                .read()
                .ok()
                .map(|c| (c.entries.get(&user_id).cloned(), c.generation(user_id)));
            match lookup {
                Some((Some(hit), _)) => return Ok(hit),
                Some((None, generation)) => started_at = Some(generation),
                None => {}
            }
        }

        let roles = self.store.list_user_roles(UserRoleFilter::for_user(user_id)).await?;

        if let (Some(cache), Some(generation)) = (&self.cache, started_at) {
            if let Ok(mut c) = cache.write() {
                if c.generation(user_id) == generation {
                    c.entries.insert(user_id, roles.clone());
                } else {
                    tracing::debug!(user_id, "grants changed during read, not caching");
                }
            }
        }
        Ok(roles)
    }

    pub async fn list_for_scope_instance(&self, scope: ScopeRef) -> AuthzResult<Vec<UserRole>> {
        self.store.list_user_roles(UserRoleFilter::for_scope(scope)).await
    }

    /// Snapshot of the user with their current grants attached.
    pub async fn user_with_roles(&self, user_id: u64) -> AuthzResult<UserWithRoles> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| AuthzError::unknown_user(user_id))?;
        let roles = self.list_for_user(user_id).await?;
        Ok(UserWithRoles { user, roles })
    }

    /// Access-control list for one instance, with user names resolved.
    pub async fn members_of(&self, scope: ScopeRef) -> AuthzResult<Vec<ScopeMember>> {
        let grants = self.list_for_scope_instance(scope).await?;
        let mut members = Vec::with_capacity(grants.len());
        for grant in grants {
            match self.store.get_user(grant.user_id).await? {
                Some(user) => members.push(ScopeMember {
                    user_id: user.id,
                    user_name: user.name,
                    role: grant.role,
                    scope,
                }),
                None => {
                    tracing::warn!(user_id = grant.user_id, scope = %scope, "grant references missing user");
                }
            }
        }
        Ok(members)
    }

    /// Revoke every grant at `scope`; used when the instance itself is deleted.
    pub async fn revoke_all_at(&self, scope: ScopeRef) -> AuthzResult<usize> {
        let grants = self.list_for_scope_instance(scope).await?;
        for grant in &grants {
            self.revoke(grant.user_id, scope).await?;
        }
        Ok(grants.len())
    }

    fn invalidate(&self, user_id: u64) {
        if let Some(cache) = &self.cache {
            if let Ok(mut c) = cache.write() {
                c.entries.remove(&user_id);
                *c.generations.entry(user_id).or_insert(0) += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::init_event_bus;
    use crate::models::user::NewUser;
    use crate::store::MemoryIdentityStore;
    use tokio::sync::oneshot;

    fn setup(cache: bool) -> (Arc<MemoryIdentityStore>, RoleGrantManager, u64) {
        let store = Arc::new(MemoryIdentityStore::new());
        let user = store.create_user(NewUser::new("ada")).unwrap();
        let (bus, _rx) = init_event_bus();
        let manager = RoleGrantManager::new(store.clone(), bus, cache);
        (store, manager, user.id)
    }

    #[tokio::test]
    async fn invalid_role_is_rejected_before_write() {
        let (store, manager, user_id) = setup(false);
        let err = manager.grant(user_id, ScopeRef::cluster(1), "owner").await.unwrap_err();
        assert!(matches!(err, AuthzError::InvalidRole(_)));
        assert!(store.list_user_roles(UserRoleFilter::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_user_cannot_be_granted() {
        let (_store, manager, _) = setup(false);
        let err = manager.grant(99, ScopeRef::cluster(1), "viewer").await.unwrap_err();
        assert!(matches!(err, AuthzError::UnknownUser(_)));
    }

    #[tokio::test]
    async fn platform_grant_must_target_sentinel() {
        let (_store, manager, user_id) = setup(false);
        let err = manager
            .grant(user_id, ScopeRef::new(crate::models::user_role::ScopeKind::Platform, 5), "admin")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::InvalidScope(_)));
        assert!(manager.grant(user_id, ScopeRef::platform(), "admin").await.is_ok());
    }

    #[tokio::test]
    async fn cache_is_invalidated_on_grant_and_revoke() {
        let (_store, manager, user_id) = setup(true);
        assert!(manager.list_for_user(user_id).await.unwrap().is_empty());

        manager.grant(user_id, ScopeRef::project(3), "editor").await.unwrap();
        assert_eq!(manager.list_for_user(user_id).await.unwrap().len(), 1);

        manager.revoke(user_id, ScopeRef::project(3)).await.unwrap();
        assert!(manager.list_for_user(user_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn grant_and_revoke_publish_activity() {
        let store = Arc::new(MemoryIdentityStore::new());
        let user = store.create_user(NewUser::new("ada")).unwrap();
        let (bus, mut rx) = init_event_bus();
        let manager = RoleGrantManager::new(store, bus, false);

        manager.grant(user.id, ScopeRef::cluster(2), "admin").await.unwrap();
        manager.revoke(user.id, ScopeRef::cluster(2)).await.unwrap();

        assert_eq!(rx.recv().await.unwrap()["name"], "user_role.granted");
        let revoked = rx.recv().await.unwrap();
        assert_eq!(revoked["name"], "user_role.revoked");
        assert_eq!(revoked["payload"]["new"]["scope_id"], 2);
        assert!(revoked["payload"].get("old").is_none());
    }

    #[tokio::test]
    async fn members_and_cascade_revoke() {
        let (store, manager, ada) = setup(false);
        let bob = store.create_user(NewUser::new("bob")).unwrap().id;
        let scope = ScopeRef::project(8);

        manager.grant(ada, scope, "admin").await.unwrap();
        manager.grant(bob, scope, "viewer").await.unwrap();
        manager.grant(bob, ScopeRef::project(9), "viewer").await.unwrap();

        let members = manager.members_of(scope).await.unwrap();
        let names: Vec<_> = members.iter().map(|m| m.user_name.as_str()).collect();
        assert_eq!(names, vec!["ada", "bob"]);

        assert_eq!(manager.revoke_all_at(scope).await.unwrap(), 2);
        assert!(manager.list_for_scope_instance(scope).await.unwrap().is_empty());
        assert_eq!(manager.list_for_user(bob).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn user_with_roles_is_a_snapshot() {
        let (_store, manager, user_id) = setup(true);
        manager.grant(user_id, ScopeRef::cluster(1), "viewer").await.unwrap();

        let snapshot = manager.user_with_roles(user_id).await.unwrap();
        manager.revoke(user_id, ScopeRef::cluster(1)).await.unwrap();

        assert_eq!(snapshot.user.name, "ada");
        assert_eq!(snapshot.roles.len(), 1);
        assert!(manager.user_with_roles(user_id).await.unwrap().roles.is_empty());
    }

    /// Holds the next `list_user_roles` call open after it has read the store.
    struct PausingStore {
        inner: Arc<MemoryIdentityStore>,
        pause: std::sync::Mutex<Option<(oneshot::Sender<()>, oneshot::Receiver<()>)>>,
    }

    #[async_trait::async_trait]
    impl IdentityStore for PausingStore {
        async fn get_user(&self, id: u64) -> AuthzResult<Option<crate::models::user::User>> {
            self.inner.get_user(id).await
        }

        async fn get_user_by_name(&self, name: &str) -> AuthzResult<Option<crate::models::user::User>> {
            self.inner.get_user_by_name(name).await
        }

        async fn upsert_user_role(&self, grant: UserRoleUpsert) -> AuthzResult<UserRole> {
            self.inner.upsert_user_role(grant).await
        }

        async fn delete_user_role(&self, user_id: u64, scope: ScopeRef) -> AuthzResult<Option<UserRole>> {
            self.inner.delete_user_role(user_id, scope).await
        }

        async fn list_user_roles(&self, filter: UserRoleFilter) -> AuthzResult<Vec<UserRole>> {
            let roles = self.inner.list_user_roles(filter).await;
            let pause = self.pause.lock().unwrap().take();
            if let Some((reached, resume)) = pause {
                reached.send(()).unwrap();
                resume.await.unwrap();
            }
            roles
        }
    }

    #[tokio::test]
    async fn revoke_during_cache_fill_is_not_undone() {
        let inner = Arc::new(MemoryIdentityStore::new());
        let user_id = inner.create_user(NewUser::new("ada")).unwrap().id;
        let store = Arc::new(PausingStore {
            inner,
            pause: std::sync::Mutex::new(None),
        });
        let (bus, _rx) = init_event_bus();
        let manager = RoleGrantManager::new(store.clone(), bus, true);
        manager.grant(user_id, ScopeRef::cluster(1), "admin").await.unwrap();

        let (reached_tx, reached_rx) = oneshot::channel();
        let (resume_tx, resume_rx) = oneshot::channel();
        *store.pause.lock().unwrap() = Some((reached_tx, resume_rx));

        let reader = manager.list_for_user(user_id);
        let writer = async {
            reached_rx.await.unwrap();
            manager.revoke(user_id, ScopeRef::cluster(1)).await.unwrap();
            resume_tx.send(()).unwrap();
        };
        let (stale, ()) = tokio::join!(reader, writer);

        // the in-flight read may see the old grant, later reads must not
        assert_eq!(stale.unwrap().len(), 1);
        assert!(manager.list_for_user(user_id).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_checks_and_revokes_settle_on_the_store() {
        let (_store, manager, user_id) = setup(true);
        let manager = Arc::new(manager);

        for round in 0..50u64 {
            let scope = ScopeRef::cluster(round);
            manager.grant(user_id, scope, "admin").await.unwrap();

            let readers: Vec<_> = (0..8)
                .map(|_| {
                    let manager = manager.clone();
                    tokio::spawn(async move { manager.list_for_user(user_id).await.unwrap() })
                })
                .collect();
            manager.revoke(user_id, scope).await.unwrap();
            for reader in readers {
                reader.await.unwrap();
            }

            assert!(manager.list_for_user(user_id).await.unwrap().is_empty(), "round {round}");
        }
    }
}
