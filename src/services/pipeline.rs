use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::cluster::KubeClient;
use super::poisoned;
use crate::authz::{AccessGate, RoleGrantManager};
use crate::errors::{AuthzError, AuthzResult};
use crate::models::user_role::{RoleLevel, ScopeRef};
use crate::utils::utc_now;

/// Grants at the `pipeline` scope are keyed by workspace id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Workspace {
    pub id: u64,
    pub name: String,
    pub cluster_id: u64,
    pub create_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pipeline {
    pub id: u64,
    pub workspace_id: u64,
    pub name: String,
    pub create_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineRun {
    pub id: u64,
    pub pipeline_id: u64,
    pub workspace_id: u64,
    pub triggered_by: u64,
    pub status: RunStatus,
    pub create_time: DateTime<Utc>,
}

// =============================================================================
// WORKSPACES
// =============================================================================

pub struct WorkspaceService {
    kube: Arc<KubeClient>,
    grants: Arc<RoleGrantManager>,
    gate: Arc<AccessGate>,
    next_id: AtomicU64,
    workspaces: RwLock<HashMap<u64, Workspace>>,
}

impl WorkspaceService {
    pub fn new(kube: Arc<KubeClient>, grants: Arc<RoleGrantManager>, gate: Arc<AccessGate>) -> Self {
        Self {
            kube,
            grants,
            gate,
            next_id: AtomicU64::new(0),
            workspaces: RwLock::new(HashMap::new()),
        }
    }

    pub async fn create_workspace(&self, user_id: u64, cluster_id: u64, name: &str) -> AuthzResult<Workspace> {
        self.gate
            .require(user_id, RoleLevel::Editor, ScopeRef::cluster(cluster_id), self.kube.as_ref())
            .await?;

        let workspace = Workspace {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            name: name.to_string(),
            cluster_id,
            create_time: utc_now(),
        };
        let scope = ScopeRef::pipeline(workspace.id);

        self.kube.bind_to_cluster(scope, cluster_id)?;
        if let Err(err) = self.grants.grant_level(user_id, scope, RoleLevel::Admin).await {
            self.kube.unbind(scope)?;
            return Err(err);
        }
        self.workspaces
            .write()
            .map_err(|_| poisoned("workspace table"))?
            .insert(workspace.id, workspace.clone());

        tracing::info!(user_id, workspace_id = workspace.id, cluster_id, "pipeline workspace created");
        Ok(workspace)
    }

    pub async fn get_workspace(&self, user_id: u64, workspace_id: u64) -> AuthzResult<Workspace> {
        let workspace = self.lookup(workspace_id)?;
        self.authorize(user_id, RoleLevel::Viewer, workspace_id).await?;
        Ok(workspace)
    }

    /// Drops the workspace record, its grants and its placement. Pipelines and
    /// runs go through `PipelineFactory::delete_workspace`.
    pub(crate) async fn delete_workspace(&self, user_id: u64, workspace_id: u64) -> AuthzResult<()> {
        self.lookup(workspace_id)?;
        self.authorize(user_id, RoleLevel::Admin, workspace_id).await?;

        let scope = ScopeRef::pipeline(workspace_id);
        let revoked = self.grants.revoke_all_at(scope).await?;
        self.kube.unbind(scope)?;
        self.workspaces
            .write()
            .map_err(|_| poisoned("workspace table"))?
            .remove(&workspace_id);

        tracing::info!(user_id, workspace_id, revoked, "pipeline workspace deleted");
        Ok(())
    }

    /// Shared gate for everything living inside a workspace.
    pub async fn authorize(&self, user_id: u64, required: RoleLevel, workspace_id: u64) -> AuthzResult<()> {
        self.gate
            .require(user_id, required, ScopeRef::pipeline(workspace_id), self.kube.as_ref())
            .await
    }

    pub(crate) fn lookup(&self, workspace_id: u64) -> AuthzResult<Workspace> {
        self.workspaces
            .read()
            .map_err(|_| poisoned("workspace table"))?
            .get(&workspace_id)
            .cloned()
            .ok_or_else(|| AuthzError::not_found(format!("workspace {workspace_id}")))
    }
}

// =============================================================================
// PIPELINES
// =============================================================================

pub struct PipelineService {
    workspaces: Arc<WorkspaceService>,
    next_id: AtomicU64,
    pipelines: RwLock<HashMap<u64, Pipeline>>,
}

impl PipelineService {
    pub fn new(workspaces: Arc<WorkspaceService>) -> Self {
        Self {
            workspaces,
            next_id: AtomicU64::new(0),
            pipelines: RwLock::new(HashMap::new()),
        }
    }

    pub async fn create_pipeline(&self, user_id: u64, workspace_id: u64, name: &str) -> AuthzResult<Pipeline> {
        self.workspaces.lookup(workspace_id)?;
        self.workspaces.authorize(user_id, RoleLevel::Editor, workspace_id).await?;

        let pipeline = Pipeline {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            workspace_id,
            name: name.to_string(),
            create_time: utc_now(),
        };
        self.pipelines
            .write()
            .map_err(|_| poisoned("pipeline table"))?
            .insert(pipeline.id, pipeline.clone());
        Ok(pipeline)
    }

    pub async fn list_pipelines(&self, user_id: u64, workspace_id: u64) -> AuthzResult<Vec<Pipeline>> {
        self.workspaces.lookup(workspace_id)?;
        self.workspaces.authorize(user_id, RoleLevel::Viewer, workspace_id).await?;
        let mut pipelines: Vec<Pipeline> = self
            .pipelines
            .read()
            .map_err(|_| poisoned("pipeline table"))?
            .values()
            .filter(|p| p.workspace_id == workspace_id)
            .cloned()
            .collect();
        pipelines.sort_by_key(|p| p.id);
        Ok(pipelines)
    }

    pub async fn get_pipeline(&self, user_id: u64, pipeline_id: u64) -> AuthzResult<Pipeline> {
        let pipeline = self.lookup(pipeline_id)?;
        self.workspaces
            .authorize(user_id, RoleLevel::Viewer, pipeline.workspace_id)
            .await?;
        Ok(pipeline)
    }

    /// Pipelines whose workspace is gone are reported as missing.
    pub(crate) fn lookup(&self, pipeline_id: u64) -> AuthzResult<Pipeline> {
        let pipeline = self
            .pipelines
            .read()
            .map_err(|_| poisoned("pipeline table"))?
            .get(&pipeline_id)
            .cloned()
            .ok_or_else(|| AuthzError::not_found(format!("pipeline {pipeline_id}")))?;

        match self.workspaces.lookup(pipeline.workspace_id) {
            Ok(_) => Ok(pipeline),
            Err(AuthzError::NotFound(_)) => Err(AuthzError::not_found(format!("pipeline {pipeline_id}"))),
            Err(err) => Err(err),
        }
    }

    pub(crate) fn purge_workspace(&self, workspace_id: u64) -> AuthzResult<usize> {
        let mut pipelines = self.pipelines.write().map_err(|_| poisoned("pipeline table"))?;
        let before = pipelines.len();
        pipelines.retain(|_, p| p.workspace_id != workspace_id);
        Ok(before - pipelines.len())
    }

    pub(crate) fn workspaces(&self) -> &WorkspaceService {
        &self.workspaces
    }
}

// =============================================================================
// PIPELINE RUNS
// =============================================================================

/// Records run requests; executing the build/deploy steps happens elsewhere.
pub struct PipelineRunService {
    pipelines: Arc<PipelineService>,
    next_id: AtomicU64,
    runs: RwLock<HashMap<u64, PipelineRun>>,
}

impl PipelineRunService {
    pub fn new(pipelines: Arc<PipelineService>) -> Self {
        Self {
            pipelines,
            next_id: AtomicU64::new(0),
            runs: RwLock::new(HashMap::new()),
        }
    }

    pub async fn trigger(&self, user_id: u64, pipeline_id: u64) -> AuthzResult<PipelineRun> {
        let pipeline = self.pipelines.lookup(pipeline_id)?;
        self.pipelines
            .workspaces()
            .authorize(user_id, RoleLevel::Editor, pipeline.workspace_id)
            .await?;

        let run = PipelineRun {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            pipeline_id,
            workspace_id: pipeline.workspace_id,
            triggered_by: user_id,
            status: RunStatus::Queued,
            create_time: utc_now(),
        };
        self.runs
            .write()
            .map_err(|_| poisoned("run table"))?
            .insert(run.id, run.clone());

        tracing::info!(user_id, pipeline_id, run_id = run.id, "pipeline run queued");
        Ok(run)
    }

    pub async fn cancel(&self, user_id: u64, run_id: u64) -> AuthzResult<PipelineRun> {
        let pipeline_id = self
            .runs
            .read()
            .map_err(|_| poisoned("run table"))?
            .get(&run_id)
            .map(|run| run.pipeline_id)
            .ok_or_else(|| AuthzError::not_found(format!("pipeline run {run_id}")))?;
        let pipeline = self.pipelines.lookup(pipeline_id)?;
        self.pipelines
            .workspaces()
            .authorize(user_id, RoleLevel::Editor, pipeline.workspace_id)
            .await?;

        let mut runs = self.runs.write().map_err(|_| poisoned("run table"))?;
        let run = runs
            .get_mut(&run_id)
            .ok_or_else(|| AuthzError::not_found(format!("pipeline run {run_id}")))?;
        run.status = RunStatus::Cancelled;
        Ok(run.clone())
    }

    pub async fn list_runs(&self, user_id: u64, pipeline_id: u64) -> AuthzResult<Vec<PipelineRun>> {
        let pipeline = self.pipelines.get_pipeline(user_id, pipeline_id).await?;
        let mut runs: Vec<PipelineRun> = self
            .runs
            .read()
            .map_err(|_| poisoned("run table"))?
            .values()
            .filter(|run| run.pipeline_id == pipeline.id)
            .cloned()
            .collect();
        runs.sort_by_key(|run| run.id);
        Ok(runs)
    }

    pub(crate) fn purge_workspace(&self, workspace_id: u64) -> AuthzResult<usize> {
        let mut runs = self.runs.write().map_err(|_| poisoned("run table"))?;
        let before = runs.len();
        runs.retain(|_, run| run.workspace_id != workspace_id);
        Ok(before - runs.len())
    }
}
