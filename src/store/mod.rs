//! Identity store: the narrow read/write interface onto durable user and grant records.
//!
//! The authorization core never touches storage directly; everything goes through
//! [`IdentityStore`]. Two implementations ship with the crate:
//! - [`MemoryIdentityStore`] for tests and embedded use
//! - [`SqliteIdentityStore`] backed by the `users` / `user_roles` tables

mod memory;
mod sqlite;

pub use memory::MemoryIdentityStore;
pub use sqlite::SqliteIdentityStore;

use async_trait::async_trait;

use crate::errors::AuthzResult;
use crate::models::user::User;
use crate::models::user_role::{ScopeRef, UserRole, UserRoleFilter, UserRoleUpsert};

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// `Ok(None)` when no user has this id.
    async fn get_user(&self, id: u64) -> AuthzResult<Option<User>>;

    async fn get_user_by_name(&self, name: &str) -> AuthzResult<Option<User>>;

    /// Create or update the grant keyed by (user, scope kind, scope instance).
    /// A single atomic write; never delete-then-insert.
    async fn upsert_user_role(&self, grant: UserRoleUpsert) -> AuthzResult<UserRole>;

    /// Returns the deleted grant, `None` if nothing matched.
    async fn delete_user_role(&self, user_id: u64, scope: ScopeRef) -> AuthzResult<Option<UserRole>>;

    /// Matching grants ordered by id.
    async fn list_user_roles(&self, filter: UserRoleFilter) -> AuthzResult<Vec<UserRole>>;
}
