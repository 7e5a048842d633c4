pub mod authz;
pub mod config;
pub mod db;
pub mod errors;
pub mod events;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

// Re-export commonly used items for tests
pub use authz::{AuthorizationResolver, Decision, RoleGrantManager, ScopeChain};
pub use errors::{AuthzError, AuthzResult};
pub use models::user_role::{RoleLevel, ScopeKind, ScopeRef};
pub use services::{Config, ServiceFactory};
