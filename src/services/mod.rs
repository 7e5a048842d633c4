//! Service composition.
//!
//! Every business service is built exactly once by [`ServiceFactory::new`], in
//! dependency order, and reached through the factory's fields:
//!
//! ```text
//! ServiceFactory::new(config)
//!   ├─ authz     grants -> resolver -> gate      (shared by everything below)
//!   ├─ cluster   KubeClient
//!   ├─ project   AppBaseService -> AppService -> ProjectService, AppStoreService
//!   └─ pipeline  WorkspaceService -> PipelineService -> PipelineRunService
//!                (workspace deletion cascades through `PipelineFactory::delete_workspace`)
//! ```
//!
//! Construction performs no I/O. To swap the store (e.g. for a test double),
//! build a new factory from a different [`Config`].

pub mod cluster;
pub mod pipeline;
pub mod project;

use std::sync::Arc;

use crate::authz::{AccessGate, AuthorizationResolver, AuthzMode, RoleGrantManager};
use crate::config::Settings;
use crate::errors::{AuthzError, AuthzResult};
use crate::events::EventBus;
use crate::store::IdentityStore;

use cluster::KubeClient;
use pipeline::{PipelineRunService, PipelineService, WorkspaceService};
use project::{AppBaseService, AppService, AppStoreService, ProjectService};

#[derive(Clone)]
pub struct Config {
    pub store: Arc<dyn IdentityStore>,
    pub events: EventBus,
    pub mode: AuthzMode,
    pub role_cache: bool,
}

impl Config {
    pub fn new(store: Arc<dyn IdentityStore>, events: EventBus) -> Self {
        Self {
            store,
            events,
            mode: AuthzMode::default(),
            role_cache: true,
        }
    }

    pub fn with_settings(mut self, settings: &Settings) -> Self {
        self.mode = settings.mode;
        self.role_cache = settings.role_cache;
        self
    }

    pub fn with_mode(mut self, mode: AuthzMode) -> Self {
        self.mode = mode;
        self
    }
}

pub struct AuthzFactory {
    pub grants: Arc<RoleGrantManager>,
    pub resolver: Arc<AuthorizationResolver>,
    pub gate: Arc<AccessGate>,
}

pub struct ClusterFactory {
    pub kube_client: Arc<KubeClient>,
}

pub struct ProjectFactory {
    pub project_service: Arc<ProjectService>,
    pub app_service: Arc<AppService>,
    pub app_store_service: Arc<AppStoreService>,
}

pub struct PipelineFactory {
    pub workspace_service: Arc<WorkspaceService>,
    pub pipeline_service: Arc<PipelineService>,
    pub pipeline_run_service: Arc<PipelineRunService>,
}

impl PipelineFactory {
    /// Delete a workspace together with its pipelines and runs.
    pub async fn delete_workspace(&self, user_id: u64, workspace_id: u64) -> AuthzResult<()> {
        self.workspace_service.delete_workspace(user_id, workspace_id).await?;
        let pipelines = self.pipeline_service.purge_workspace(workspace_id)?;
        let runs = self.pipeline_run_service.purge_workspace(workspace_id)?;
        tracing::debug!(workspace_id, pipelines, runs, "workspace contents purged");
        Ok(())
    }
}

pub struct ServiceFactory {
    config: Config,
    pub authz: AuthzFactory,
    pub cluster: ClusterFactory,
    pub project: ProjectFactory,
    pub pipeline: PipelineFactory,
}

impl ServiceFactory {
    pub fn new(config: Config) -> Self {
        tracing::debug!(mode = ?config.mode, role_cache = config.role_cache, "composing services");

        let grants = Arc::new(RoleGrantManager::new(
            config.store.clone(),
            config.events.clone(),
            config.role_cache,
        ));
        let resolver = Arc::new(AuthorizationResolver::new(config.store.clone(), grants.clone()));
        let gate = Arc::new(AccessGate::new(resolver.clone(), config.mode));

        // Order matters: cluster access first, then app base, then the services built on them.
        let kube_client = Arc::new(KubeClient::new(gate.clone()));
        let app_base = Arc::new(AppBaseService::new());
        let app_service = Arc::new(AppService::new(kube_client.clone(), app_base.clone(), gate.clone()));
        let project_service = Arc::new(ProjectService::new(
            kube_client.clone(),
            app_service.clone(),
            grants.clone(),
            gate.clone(),
        ));
        let app_store_service = Arc::new(AppStoreService::new(app_base, gate.clone()));

        let workspace_service = Arc::new(WorkspaceService::new(kube_client.clone(), grants.clone(), gate.clone()));
        let pipeline_service = Arc::new(PipelineService::new(workspace_service.clone()));
        let pipeline_run_service = Arc::new(PipelineRunService::new(pipeline_service.clone()));

        Self {
            config,
            authz: AuthzFactory { grants, resolver, gate },
            cluster: ClusterFactory { kube_client },
            project: ProjectFactory {
                project_service,
                app_service,
                app_store_service,
            },
            pipeline: PipelineFactory {
                workspace_service,
                pipeline_service,
                pipeline_run_service,
            },
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn IdentityStore> {
        &self.config.store
    }
}

pub(crate) fn poisoned(table: &str) -> AuthzError {
    AuthzError::internal(format!("{table} lock poisoned"))
}
