use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::cluster::KubeClient;
use super::poisoned;
use crate::authz::{AccessGate, NoAncestors, RoleGrantManager};
use crate::errors::{AuthzError, AuthzResult};
use crate::models::user_role::{RoleLevel, ScopeMember, ScopeRef};
use crate::utils::utc_now;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct App {
    pub id: u64,
    pub name: String,
    /// Owning project or app store.
    pub scope: ScopeRef,
    pub create_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Project {
    pub id: u64,
    pub name: String,
    pub cluster_id: u64,
    pub owner_id: u64,
    pub create_time: DateTime<Utc>,
}

// =============================================================================
// APP BASE
// =============================================================================

/// App records shared by project apps and app-store apps. No access checks
/// here; callers go through `AppService` / `AppStoreService`.
#[derive(Default)]
pub struct AppBaseService {
    next_id: AtomicU64,
    apps: RwLock<BTreeMap<u64, App>>,
}

impl AppBaseService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, scope: ScopeRef, name: &str) -> AuthzResult<App> {
        let mut apps = self.apps.write().map_err(|_| poisoned("app table"))?;
        let app = App {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            name: name.to_string(),
            scope,
            create_time: utc_now(),
        };
        apps.insert(app.id, app.clone());
        Ok(app)
    }

    pub fn get(&self, id: u64) -> AuthzResult<Option<App>> {
        Ok(self.apps.read().map_err(|_| poisoned("app table"))?.get(&id).cloned())
    }

    pub fn list(&self, scope: ScopeRef) -> AuthzResult<Vec<App>> {
        Ok(self
            .apps
            .read()
            .map_err(|_| poisoned("app table"))?
            .values()
            .filter(|app| app.scope == scope)
            .cloned()
            .collect())
    }

    pub fn remove(&self, id: u64) -> AuthzResult<Option<App>> {
        Ok(self.apps.write().map_err(|_| poisoned("app table"))?.remove(&id))
    }

    pub fn remove_all(&self, scope: ScopeRef) -> AuthzResult<usize> {
        let mut apps = self.apps.write().map_err(|_| poisoned("app table"))?;
        let before = apps.len();
        apps.retain(|_, app| app.scope != scope);
        Ok(before - apps.len())
    }
}

// =============================================================================
// PROJECT APPS
// =============================================================================

pub struct AppService {
    kube: Arc<KubeClient>,
    base: Arc<AppBaseService>,
    gate: Arc<AccessGate>,
}

impl AppService {
    pub fn new(kube: Arc<KubeClient>, base: Arc<AppBaseService>, gate: Arc<AccessGate>) -> Self {
        Self { kube, base, gate }
    }

    pub async fn create_app(&self, user_id: u64, project_id: u64, name: &str) -> AuthzResult<App> {
        let scope = ScopeRef::project(project_id);
        self.gate.require(user_id, RoleLevel::Editor, scope, self.kube.as_ref()).await?;
        self.base.add(scope, name)
    }

    pub async fn list_apps(&self, user_id: u64, project_id: u64) -> AuthzResult<Vec<App>> {
        let scope = ScopeRef::project(project_id);
        self.gate.require(user_id, RoleLevel::Viewer, scope, self.kube.as_ref()).await?;
        self.base.list(scope)
    }

    pub async fn delete_app(&self, user_id: u64, app_id: u64) -> AuthzResult<()> {
        let app = self
            .base
            .get(app_id)?
            .ok_or_else(|| AuthzError::not_found(format!("app {app_id}")))?;
        self.gate.require(user_id, RoleLevel::Editor, app.scope, self.kube.as_ref()).await?;
        self.base.remove(app_id)?;
        Ok(())
    }

    /// Drop every app of a project that is being deleted.
    pub(crate) fn purge_project(&self, project_id: u64) -> AuthzResult<usize> {
        self.base.remove_all(ScopeRef::project(project_id))
    }
}

// =============================================================================
// PROJECTS
// =============================================================================

pub struct ProjectService {
    kube: Arc<KubeClient>,
    apps: Arc<AppService>,
    grants: Arc<RoleGrantManager>,
    gate: Arc<AccessGate>,
    next_id: AtomicU64,
    projects: RwLock<HashMap<u64, Project>>,
}

impl ProjectService {
    pub fn new(
        kube: Arc<KubeClient>,
        apps: Arc<AppService>,
        grants: Arc<RoleGrantManager>,
        gate: Arc<AccessGate>,
    ) -> Self {
        Self {
            kube,
            apps,
            grants,
            gate,
            next_id: AtomicU64::new(0),
            projects: RwLock::new(HashMap::new()),
        }
    }

    /// Editors of a cluster may create projects on it; the creator becomes the
    /// project's first admin.
    pub async fn create_project(&self, user_id: u64, cluster_id: u64, name: &str) -> AuthzResult<Project> {
        self.gate
            .require(user_id, RoleLevel::Editor, ScopeRef::cluster(cluster_id), self.kube.as_ref())
            .await?;

        let project = Project {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            name: name.to_string(),
            cluster_id,
            owner_id: user_id,
            create_time: utc_now(),
        };
        let scope = ScopeRef::project(project.id);

        self.kube.bind_to_cluster(scope, cluster_id)?;
        if let Err(err) = self.grants.grant_level(user_id, scope, RoleLevel::Admin).await {
            self.kube.unbind(scope)?;
            return Err(err);
        }
        self.projects
            .write()
            .map_err(|_| poisoned("project table"))?
            .insert(project.id, project.clone());

        tracing::info!(user_id, project_id = project.id, cluster_id, "project created");
        Ok(project)
    }

    pub async fn get_project(&self, user_id: u64, project_id: u64) -> AuthzResult<Project> {
        let project = self.lookup(project_id)?;
        self.gate
            .require(user_id, RoleLevel::Viewer, ScopeRef::project(project_id), self.kube.as_ref())
            .await?;
        Ok(project)
    }

    /// Projects the user may view, ordered by id.
    pub async fn list_projects(&self, user_id: u64) -> AuthzResult<Vec<Project>> {
        let mut all: Vec<Project> = self
            .projects
            .read()
            .map_err(|_| poisoned("project table"))?
            .values()
            .cloned()
            .collect();
        all.sort_by_key(|p| p.id);

        let mut visible = Vec::new();
        for project in all {
            if self
                .gate
                .permits(user_id, RoleLevel::Viewer, ScopeRef::project(project.id), self.kube.as_ref())
                .await?
            {
                visible.push(project);
            }
        }
        Ok(visible)
    }

    pub async fn members(&self, user_id: u64, project_id: u64) -> AuthzResult<Vec<ScopeMember>> {
        let project = self.get_project(user_id, project_id).await?;
        self.grants.members_of(ScopeRef::project(project.id)).await
    }

    pub async fn add_member(&self, user_id: u64, project_id: u64, member_id: u64, role: &str) -> AuthzResult<()> {
        let scope = ScopeRef::project(self.lookup(project_id)?.id);
        self.gate.require(user_id, RoleLevel::Admin, scope, self.kube.as_ref()).await?;
        self.grants.grant(member_id, scope, role).await?;
        Ok(())
    }

    pub async fn remove_member(&self, user_id: u64, project_id: u64, member_id: u64) -> AuthzResult<()> {
        let scope = ScopeRef::project(self.lookup(project_id)?.id);
        self.gate.require(user_id, RoleLevel::Admin, scope, self.kube.as_ref()).await?;
        self.grants.revoke(member_id, scope).await
    }

    /// Deleting a project cascades to its apps, grants and cluster placement.
    pub async fn delete_project(&self, user_id: u64, project_id: u64) -> AuthzResult<()> {
        let scope = ScopeRef::project(self.lookup(project_id)?.id);
        self.gate.require(user_id, RoleLevel::Admin, scope, self.kube.as_ref()).await?;

        let apps = self.apps.purge_project(project_id)?;
        let revoked = self.grants.revoke_all_at(scope).await?;
        self.kube.unbind(scope)?;
        self.projects
            .write()
            .map_err(|_| poisoned("project table"))?
            .remove(&project_id);

        tracing::info!(user_id, project_id, apps, revoked, "project deleted");
        Ok(())
    }

    fn lookup(&self, project_id: u64) -> AuthzResult<Project> {
        self.projects
            .read()
            .map_err(|_| poisoned("project table"))?
            .get(&project_id)
            .cloned()
            .ok_or_else(|| AuthzError::not_found(format!("project {project_id}")))
    }
}

// =============================================================================
// APP STORE
// =============================================================================

/// App stores sit directly under the platform, so no ancestor lookup is needed.
pub struct AppStoreService {
    base: Arc<AppBaseService>,
    gate: Arc<AccessGate>,
}

impl AppStoreService {
    pub fn new(base: Arc<AppBaseService>, gate: Arc<AccessGate>) -> Self {
        Self { base, gate }
    }

    pub async fn publish(&self, user_id: u64, store_id: u64, name: &str) -> AuthzResult<App> {
        let scope = ScopeRef::app_store(store_id);
        self.gate.require(user_id, RoleLevel::Editor, scope, &NoAncestors).await?;
        self.base.add(scope, name)
    }

    pub async fn list(&self, user_id: u64, store_id: u64) -> AuthzResult<Vec<App>> {
        let scope = ScopeRef::app_store(store_id);
        self.gate.require(user_id, RoleLevel::Viewer, scope, &NoAncestors).await?;
        self.base.list(scope)
    }
}
