use std::sync::Arc;

use anyhow::Result;

use kubespace_authz::authz::AuthzMode;
use kubespace_authz::events::init_event_bus;
use kubespace_authz::models::user::{NewUser, User};
use kubespace_authz::models::user_role::RoleLevel;
use kubespace_authz::services::pipeline::RunStatus;
use kubespace_authz::store::MemoryIdentityStore;
use kubespace_authz::{AuthzError, Config, ScopeRef, ServiceFactory};

struct Fixture {
    store: Arc<MemoryIdentityStore>,
    factory: ServiceFactory,
}

impl Fixture {
    fn new(mode: AuthzMode) -> Self {
        let store = Arc::new(MemoryIdentityStore::new());
        let (bus, _rx) = init_event_bus();
        let factory = ServiceFactory::new(Config::new(store.clone(), bus).with_mode(mode));
        Self { store, factory }
    }

    fn user(&self, name: &str) -> User {
        self.store.create_user(NewUser::new(name)).expect("create user")
    }

    async fn grant(&self, user: &User, scope: ScopeRef, role: &str) {
        self.factory
            .authz
            .grants
            .grant(user.id, scope, role)
            .await
            .expect("grant");
    }
}

fn is_forbidden<T: std::fmt::Debug>(result: Result<T, AuthzError>) -> bool {
    matches!(result, Err(AuthzError::Forbidden { .. }))
}

#[tokio::test]
async fn project_creator_becomes_admin_and_cluster_viewers_can_read() -> Result<()> {
    let fx = Fixture::new(AuthzMode::Strict);
    let ada = fx.user("ada");
    let bob = fx.user("bob");
    fx.grant(&ada, ScopeRef::cluster(7), "editor").await;
    fx.grant(&bob, ScopeRef::cluster(7), "viewer").await;

    let projects = &fx.factory.project.project_service;
    let project = projects.create_project(ada.id, 7, "shop").await?;
    assert_eq!(project.cluster_id, 7);
    assert_eq!(fx.factory.cluster.kube_client.cluster_of(ScopeRef::project(project.id))?, Some(7));

    let members = projects.members(ada.id, project.id).await?;
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].role, RoleLevel::Admin);

    // bob inherits viewer from the cluster
    assert_eq!(projects.get_project(bob.id, project.id).await?.name, "shop");
    let apps = &fx.factory.project.app_service;
    assert!(is_forbidden(apps.create_app(bob.id, project.id, "cart").await));
    Ok(())
}

#[tokio::test]
async fn project_creation_needs_cluster_editor() -> Result<()> {
    let fx = Fixture::new(AuthzMode::Strict);
    let bob = fx.user("bob");
    fx.grant(&bob, ScopeRef::cluster(7), "viewer").await;

    let result = fx.factory.project.project_service.create_project(bob.id, 7, "shop").await;
    assert!(is_forbidden(result));
    Ok(())
}

#[tokio::test]
async fn project_grant_shadows_cluster_admin_in_services() -> Result<()> {
    let fx = Fixture::new(AuthzMode::Strict);
    let ada = fx.user("ada");
    let carol = fx.user("carol");
    fx.grant(&ada, ScopeRef::cluster(7), "editor").await;
    fx.grant(&carol, ScopeRef::cluster(7), "admin").await;

    let projects = &fx.factory.project.project_service;
    let shop = projects.create_project(ada.id, 7, "shop").await?;
    let blog = projects.create_project(ada.id, 7, "blog").await?;
    projects.add_member(ada.id, shop.id, carol.id, "viewer").await?;

    let apps = &fx.factory.project.app_service;
    assert!(is_forbidden(apps.create_app(carol.id, shop.id, "cart").await));
    assert_eq!(apps.create_app(carol.id, blog.id, "posts").await?.name, "posts");
    Ok(())
}

#[tokio::test]
async fn project_listing_only_shows_visible_projects() -> Result<()> {
    let fx = Fixture::new(AuthzMode::Strict);
    let ada = fx.user("ada");
    let bob = fx.user("bob");
    fx.grant(&ada, ScopeRef::cluster(1), "editor").await;
    fx.grant(&ada, ScopeRef::cluster(2), "editor").await;

    let projects = &fx.factory.project.project_service;
    let first = projects.create_project(ada.id, 1, "one").await?;
    projects.create_project(ada.id, 2, "two").await?;
    projects.add_member(ada.id, first.id, bob.id, "viewer").await?;

    assert_eq!(projects.list_projects(ada.id).await?.len(), 2);
    let visible = projects.list_projects(bob.id).await?;
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].id, first.id);
    Ok(())
}

#[tokio::test]
async fn deleting_a_project_cascades_to_apps_grants_and_placement() -> Result<()> {
    let fx = Fixture::new(AuthzMode::Strict);
    let ada = fx.user("ada");
    let bob = fx.user("bob");
    fx.grant(&ada, ScopeRef::cluster(7), "editor").await;

    let projects = &fx.factory.project.project_service;
    let apps = &fx.factory.project.app_service;
    let project = projects.create_project(ada.id, 7, "shop").await?;
    projects.add_member(ada.id, project.id, bob.id, "editor").await?;
    apps.create_app(bob.id, project.id, "cart").await?;

    assert!(is_forbidden(projects.delete_project(bob.id, project.id).await));
    projects.delete_project(ada.id, project.id).await?;

    let scope = ScopeRef::project(project.id);
    assert!(fx.factory.authz.grants.list_for_scope_instance(scope).await?.is_empty());
    assert_eq!(fx.factory.cluster.kube_client.cluster_of(scope)?, None);
    assert!(matches!(
        projects.get_project(ada.id, project.id).await,
        Err(AuthzError::NotFound(_))
    ));
    // unplaced and without grants, the old id is closed to non-super users
    assert!(is_forbidden(apps.list_apps(ada.id, project.id).await));
    Ok(())
}

#[tokio::test]
async fn removing_a_member_revokes_their_access() -> Result<()> {
    let fx = Fixture::new(AuthzMode::Strict);
    let ada = fx.user("ada");
    let bob = fx.user("bob");
    fx.grant(&ada, ScopeRef::cluster(7), "editor").await;

    let projects = &fx.factory.project.project_service;
    let project = projects.create_project(ada.id, 7, "shop").await?;
    projects.add_member(ada.id, project.id, bob.id, "viewer").await?;
    assert!(projects.get_project(bob.id, project.id).await.is_ok());

    projects.remove_member(ada.id, project.id, bob.id).await?;
    assert!(is_forbidden(projects.get_project(bob.id, project.id).await));
    Ok(())
}

#[tokio::test]
async fn pipeline_runs_need_editor_on_the_workspace() -> Result<()> {
    let fx = Fixture::new(AuthzMode::Strict);
    let ada = fx.user("ada");
    let bob = fx.user("bob");
    fx.grant(&ada, ScopeRef::cluster(3), "editor").await;

    let pipeline = &fx.factory.pipeline;
    let workspace = pipeline.workspace_service.create_workspace(ada.id, 3, "ci").await?;
    let build = pipeline.pipeline_service.create_pipeline(ada.id, workspace.id, "build").await?;

    fx.grant(&bob, ScopeRef::pipeline(workspace.id), "viewer").await;
    assert_eq!(pipeline.pipeline_service.list_pipelines(bob.id, workspace.id).await?.len(), 1);
    assert!(is_forbidden(pipeline.pipeline_run_service.trigger(bob.id, build.id).await));

    let run = pipeline.pipeline_run_service.trigger(ada.id, build.id).await?;
    assert_eq!(run.status, RunStatus::Queued);
    assert_eq!(run.triggered_by, ada.id);

    let cancelled = pipeline.pipeline_run_service.cancel(ada.id, run.id).await?;
    assert_eq!(cancelled.status, RunStatus::Cancelled);

    let runs = pipeline.pipeline_run_service.list_runs(bob.id, build.id).await?;
    assert_eq!(runs.len(), 1);
    Ok(())
}

#[tokio::test]
async fn cluster_editors_reach_workspaces_through_placement() -> Result<()> {
    let fx = Fixture::new(AuthzMode::Strict);
    let ada = fx.user("ada");
    let dev = fx.user("dev");
    fx.grant(&ada, ScopeRef::cluster(3), "editor").await;
    fx.grant(&dev, ScopeRef::cluster(3), "editor").await;

    let pipeline = &fx.factory.pipeline;
    let workspace = pipeline.workspace_service.create_workspace(ada.id, 3, "ci").await?;
    let build = pipeline.pipeline_service.create_pipeline(dev.id, workspace.id, "build").await?;
    assert!(pipeline.pipeline_run_service.trigger(dev.id, build.id).await.is_ok());

    // only the creator's admin grant allows deletion
    assert!(is_forbidden(pipeline.delete_workspace(dev.id, workspace.id).await));
    pipeline.delete_workspace(ada.id, workspace.id).await?;
    assert!(matches!(
        pipeline.workspace_service.get_workspace(ada.id, workspace.id).await,
        Err(AuthzError::NotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn app_store_access_comes_from_store_or_platform_grants() -> Result<()> {
    let fx = Fixture::new(AuthzMode::Strict);
    let curator = fx.user("curator");
    let reader = fx.user("reader");
    let cluster_admin = fx.user("cluster-admin");
    fx.grant(&curator, ScopeRef::app_store(1), "editor").await;
    fx.grant(&reader, ScopeRef::platform(), "viewer").await;
    fx.grant(&cluster_admin, ScopeRef::cluster(1), "admin").await;

    let store = &fx.factory.project.app_store_service;
    store.publish(curator.id, 1, "redis").await?;

    assert_eq!(store.list(reader.id, 1).await?.len(), 1);
    assert!(is_forbidden(store.publish(reader.id, 1, "mysql").await));
    assert!(is_forbidden(store.list(cluster_admin.id, 1).await));
    Ok(())
}

#[tokio::test]
async fn advisory_mode_lets_denied_calls_through() -> Result<()> {
    let fx = Fixture::new(AuthzMode::Advisory);
    let bob = fx.user("bob");

    let project = fx.factory.project.project_service.create_project(bob.id, 9, "loose").await?;
    assert_eq!(project.owner_id, bob.id);
    assert!(fx.factory.cluster.kube_client.connect(bob.id, 9, RoleLevel::Admin).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn off_mode_skips_checks_entirely() -> Result<()> {
    let fx = Fixture::new(AuthzMode::Off);
    let session = fx.factory.cluster.kube_client.connect(404, 1, RoleLevel::Admin).await?;
    assert_eq!(session.cluster_id, 1);
    Ok(())
}

#[tokio::test]
async fn super_admin_passes_every_service_gate() -> Result<()> {
    let fx = Fixture::new(AuthzMode::Strict);
    let root = fx.store.create_user(NewUser::new("root").super_admin())?;

    let project = fx.factory.project.project_service.create_project(root.id, 1, "ops").await?;
    fx.factory.project.app_service.create_app(root.id, project.id, "grafana").await?;
    fx.factory.project.app_store_service.publish(root.id, 5, "nginx").await?;
    let workspace = fx.factory.pipeline.workspace_service.create_workspace(root.id, 1, "ci").await?;
    assert_eq!(workspace.cluster_id, 1);
    Ok(())
}

#[tokio::test]
async fn deleting_a_workspace_removes_its_pipelines_and_runs() -> Result<()> {
    let fx = Fixture::new(AuthzMode::Strict);
    let root = fx.store.create_user(NewUser::new("root").super_admin())?;

    let pipeline = &fx.factory.pipeline;
    let workspace = pipeline.workspace_service.create_workspace(root.id, 2, "ci").await?;
    let build = pipeline.pipeline_service.create_pipeline(root.id, workspace.id, "build").await?;
    let run = pipeline.pipeline_run_service.trigger(root.id, build.id).await?;

    pipeline.delete_workspace(root.id, workspace.id).await?;

    let not_found = |result: Result<(), AuthzError>| matches!(result, Err(AuthzError::NotFound(_)));
    assert!(not_found(pipeline.pipeline_service.get_pipeline(root.id, build.id).await.map(drop)));
    assert!(not_found(pipeline.pipeline_run_service.trigger(root.id, build.id).await.map(drop)));
    assert!(not_found(pipeline.pipeline_run_service.cancel(root.id, run.id).await.map(drop)));
    assert!(not_found(pipeline.pipeline_run_service.list_runs(root.id, build.id).await.map(drop)));
    assert!(not_found(pipeline.pipeline_service.list_pipelines(root.id, workspace.id).await.map(drop)));
    assert_eq!(fx.factory.cluster.kube_client.cluster_of(ScopeRef::pipeline(workspace.id))?, None);
    Ok(())
}

#[tokio::test]
async fn failed_creator_grant_leaves_no_placement_behind() -> Result<()> {
    let fx = Fixture::new(AuthzMode::Off);
    let kube = &fx.factory.cluster.kube_client;

    let result = fx.factory.project.project_service.create_project(404, 7, "ghost").await;
    assert!(matches!(result, Err(AuthzError::UnknownUser(_))));
    assert_eq!(kube.cluster_of(ScopeRef::project(1))?, None);

    let result = fx.factory.pipeline.workspace_service.create_workspace(404, 7, "ghost").await;
    assert!(matches!(result, Err(AuthzError::UnknownUser(_))));
    assert_eq!(kube.cluster_of(ScopeRef::pipeline(1))?, None);
    Ok(())
}
