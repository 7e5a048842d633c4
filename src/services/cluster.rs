use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Serialize;

use super::poisoned;
use crate::authz::{scope, AccessGate, AncestorResolver};
use crate::errors::{AuthzError, AuthzResult};
use crate::models::user_role::{RoleLevel, ScopeKind, ScopeRef};

/// Proof that a user passed the cluster-level check for one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterSession {
    pub cluster_id: u64,
    pub user_id: u64,
    pub level: RoleLevel,
}

/// Cluster access client. Besides gating cluster connections it records which
/// cluster hosts each project and pipeline workspace, and answers ancestor
/// lookups for the resolver from that placement table.
pub struct KubeClient {
    gate: Arc<AccessGate>,
    placements: RwLock<HashMap<ScopeRef, u64>>,
}

impl KubeClient {
    pub fn new(gate: Arc<AccessGate>) -> Self {
        Self {
            gate,
            placements: RwLock::new(HashMap::new()),
        }
    }

    pub async fn connect(&self, user_id: u64, cluster_id: u64, level: RoleLevel) -> AuthzResult<ClusterSession> {
        self.gate
            .require(user_id, level, ScopeRef::cluster(cluster_id), self)
            .await?;
        tracing::debug!(user_id, cluster_id, level = %level, "cluster session opened");
        Ok(ClusterSession {
            cluster_id,
            user_id,
            level,
        })
    }

    /// Record that `scope` (a project or pipeline workspace) lives on `cluster_id`.
    pub fn bind_to_cluster(&self, scope: ScopeRef, cluster_id: u64) -> AuthzResult<()> {
        if scope::parent(scope.kind) != Some(ScopeKind::Cluster) {
            return Err(AuthzError::invalid_scope(format!("{scope} cannot be placed on a cluster")));
        }
        self.placements
            .write()
            .map_err(|_| poisoned("placement table"))?
            .insert(scope, cluster_id);
        Ok(())
    }

    pub fn unbind(&self, scope: ScopeRef) -> AuthzResult<()> {
        self.placements
            .write()
            .map_err(|_| poisoned("placement table"))?
            .remove(&scope);
        Ok(())
    }

    pub fn cluster_of(&self, scope: ScopeRef) -> AuthzResult<Option<u64>> {
        Ok(self
            .placements
            .read()
            .map_err(|_| poisoned("placement table"))?
            .get(&scope)
            .copied())
    }
}

#[async_trait]
impl AncestorResolver for KubeClient {
    async fn resolve_ancestor(&self, scope: ScopeRef) -> AuthzResult<Option<ScopeRef>> {
        Ok(self.cluster_of(scope)?.map(ScopeRef::cluster))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::{AuthorizationResolver, AuthzMode, RoleGrantManager};
    use crate::events::init_event_bus;
    use crate::models::user::NewUser;
    use crate::store::{IdentityStore, MemoryIdentityStore};

    fn client() -> (Arc<MemoryIdentityStore>, Arc<RoleGrantManager>, KubeClient) {
        let store = Arc::new(MemoryIdentityStore::new());
        let dyn_store: Arc<dyn IdentityStore> = store.clone();
        let (bus, _rx) = init_event_bus();
        let grants = Arc::new(RoleGrantManager::new(dyn_store.clone(), bus, false));
        let resolver = Arc::new(AuthorizationResolver::new(dyn_store, grants.clone()));
        let gate = Arc::new(AccessGate::new(resolver, AuthzMode::Strict));
        (store, grants, KubeClient::new(gate))
    }

    #[tokio::test]
    async fn resolves_project_to_owning_cluster() {
        let (_store, _grants, kube) = client();
        kube.bind_to_cluster(ScopeRef::project(42), 7).unwrap();

        let parent = kube.resolve_ancestor(ScopeRef::project(42)).await.unwrap();
        assert_eq!(parent, Some(ScopeRef::cluster(7)));
        assert_eq!(kube.resolve_ancestor(ScopeRef::project(43)).await.unwrap(), None);
    }

    #[test]
    fn only_cluster_children_can_be_placed() {
        let (_store, _grants, kube) = client();
        assert!(kube.bind_to_cluster(ScopeRef::app_store(1), 7).is_err());
        assert!(kube.bind_to_cluster(ScopeRef::pipeline(1), 7).is_ok());
    }

    #[tokio::test]
    async fn connect_requires_cluster_grant() {
        let (store, grants, kube) = client();
        let user = store.create_user(NewUser::new("ada")).unwrap();

        assert!(kube.connect(user.id, 7, RoleLevel::Viewer).await.is_err());
        grants.grant(user.id, ScopeRef::cluster(7), "viewer").await.unwrap();
        let session = kube.connect(user.id, 7, RoleLevel::Viewer).await.unwrap();
        assert_eq!(session.cluster_id, 7);
        assert!(kube.connect(user.id, 7, RoleLevel::Editor).await.is_err());
    }
}
