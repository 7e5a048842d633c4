use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::{Row, SqlitePool};

use kubespace_authz::config::Settings;
use kubespace_authz::db;
use kubespace_authz::errors::AuthzError;
use kubespace_authz::events::{init_event_bus, start_activity_listener};
use kubespace_authz::models::user::{NewUser, User};
use kubespace_authz::models::user_role::{RoleLevel, ScopeKind, ScopeRef};
use kubespace_authz::store::{IdentityStore, SqliteIdentityStore};
use kubespace_authz::utils::hash_credential;
use kubespace_authz::{Config, ScopeChain, ServiceFactory};

#[derive(Parser, Debug)]
#[command(author, version, about = "kubespace authorization admin tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    Migrate,
    /// Show migration status against the current database
    MigrateStatus,
    /// Create a user record
    UserAdd {
        name: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long = "super")]
        is_super: bool,
    },
    /// Grant (or change) a role at a scope instance
    Grant {
        user: String,
        scope: ScopeKind,
        #[arg(long, default_value_t = 0)]
        id: u64,
        role: String,
    },
    /// Revoke the role held at a scope instance
    Revoke {
        user: String,
        scope: ScopeKind,
        #[arg(long, default_value_t = 0)]
        id: u64,
    },
    /// List a user's grants
    Roles { user: String },
    /// List who holds a role at a scope instance
    Members {
        scope: ScopeKind,
        #[arg(long, default_value_t = 0)]
        id: u64,
    },
    /// Evaluate an access check
    Check {
        user: String,
        role: RoleLevel,
        scope: ScopeKind,
        #[arg(long, default_value_t = 0)]
        id: u64,
        /// Owning cluster of a project or pipeline workspace
        #[arg(long)]
        cluster: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    let cli = Cli::parse();
    let settings = Settings::from_env()?;
    let pool = db::init(settings.require_database_url()?).await?;

    match cli.command {
        Commands::Migrate => {
            println!("Migrations applied");
            Ok(())
        }
        Commands::MigrateStatus => print_status(&pool).await,
        command => {
            let store = Arc::new(SqliteIdentityStore::new(pool.clone()));
            let (bus, rx) = init_event_bus();
            let listener = tokio::spawn(start_activity_listener(rx, pool.clone()));

            let factory = ServiceFactory::new(Config::new(store.clone(), bus).with_settings(&settings));
            let result = run(&factory, &store, command).await;

            // Dropping the factory closes the bus so the listener drains and exits.
            drop(factory);
            listener.await.context("activity listener panicked")?;
            result
        }
    }
}

async fn run(factory: &ServiceFactory, store: &SqliteIdentityStore, command: Commands) -> anyhow::Result<()> {
    let grants = &factory.authz.grants;

    match command {
        Commands::UserAdd { name, email, password, is_super } => {
            let mut new_user = NewUser::new(name);
            if let Some(email) = email {
                new_user = new_user.with_email(email);
            }
            if let Some(password) = password {
                new_user = new_user.with_password_hash(hash_credential(&password)?);
            }
            if is_super {
                new_user = new_user.super_admin();
            }
            let user = store.create_user(new_user).await?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        Commands::Grant { user, scope, id, role } => {
            let user = find_user(store, &user).await?;
            let grant = grants.grant(user.id, ScopeRef::new(scope, id), &role).await?;
            println!("{}", serde_json::to_string_pretty(&grant)?);
        }
        Commands::Revoke { user, scope, id } => {
            let user = find_user(store, &user).await?;
            grants.revoke(user.id, ScopeRef::new(scope, id)).await?;
            println!("Revoked");
        }
        Commands::Roles { user } => {
            let user = find_user(store, &user).await?;
            let view = grants.user_with_roles(user.id).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Commands::Members { scope, id } => {
            let members = grants.members_of(ScopeRef::new(scope, id)).await?;
            println!("{}", serde_json::to_string_pretty(&members)?);
        }
        Commands::Check { user, role, scope, id, cluster } => {
            let user = find_user(store, &user).await?;
            let mut chain = ScopeChain::new(ScopeRef::new(scope, id));
            if let Some(cluster_id) = cluster {
                chain = chain.with_ancestor(ScopeRef::cluster(cluster_id));
            }
            let decision = factory.authz.resolver.check_chain(user.id, role, &chain).await?;
            println!("{}", if decision.is_allowed() { "allow" } else { "deny" });
        }
        Commands::Migrate | Commands::MigrateStatus => {}
    }

    Ok(())
}

async fn find_user(store: &SqliteIdentityStore, name: &str) -> Result<User, AuthzError> {
    store
        .get_user_by_name(name)
        .await?
        .ok_or_else(|| AuthzError::unknown_user(name))
}

async fn print_status(pool: &SqlitePool) -> anyhow::Result<()> {
    let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
        .fetch_all(pool)
        .await?;
    let applied_versions: HashSet<i64> = rows
        .iter()
        .filter_map(|row| row.try_get::<i64, _>("version").ok())
        .collect();

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in db::MIGRATOR.iter() {
        let version = migration.version;
        let status = if applied_versions.contains(&version) { "applied" } else { "pending" };
        let desc = migration.description.as_ref().trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, version, name);
    }

    Ok(())
}

fn load_env() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    let _ = dotenvy::from_path(crate_env);
}

fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr);

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
