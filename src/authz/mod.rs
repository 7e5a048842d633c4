//! Authorization module - scope hierarchy, grants and the resolver
//!
//! This module implements scope-hierarchical RBAC with support for:
//! - Grants at platform, cluster, project, pipeline and appstore scopes
//! - Narrowest-applicable-grant-wins resolution up the scope hierarchy
//! - Super admin bypass
//! - Configurable enforcement modes (off/advisory/strict)

mod grants;
mod resolver;
pub mod scope;

pub use grants::RoleGrantManager;
pub use resolver::{decide, AncestorResolver, AuthorizationResolver, Decision, NoAncestors, ScopeChain};

use std::str::FromStr;
use std::sync::Arc;

use crate::errors::{AuthzError, AuthzResult};
use crate::models::user_role::{RoleLevel, ScopeRef};

/// Authorization enforcement mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthzMode {
    /// No permission checks (development mode)
    Off,
    /// Log denials but allow the operation (rollout mode)
    Advisory,
    /// Refuse denied operations
    #[default]
    Strict,
}

impl FromStr for AuthzMode {
    type Err = AuthzError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" => Ok(AuthzMode::Off),
            "advisory" => Ok(AuthzMode::Advisory),
            "strict" | "" => Ok(AuthzMode::Strict),
            other => Err(AuthzError::configuration(format!(
                "AUTHZ_MODE must be off, advisory or strict, got '{other}'"
            ))),
        }
    }
}

/// Guard used by business services in front of privileged operations.
pub struct AccessGate {
    resolver: Arc<AuthorizationResolver>,
    mode: AuthzMode,
}

impl AccessGate {
    pub fn new(resolver: Arc<AuthorizationResolver>, mode: AuthzMode) -> Self {
        Self { resolver, mode }
    }

    pub fn mode(&self) -> AuthzMode {
        self.mode
    }

    pub fn resolver(&self) -> &Arc<AuthorizationResolver> {
        &self.resolver
    }

    /// `Ok(())` when the operation may proceed under the current mode.
    pub async fn require(
        &self,
        user_id: u64,
        required: RoleLevel,
        scope: ScopeRef,
        ancestors: &dyn AncestorResolver,
    ) -> AuthzResult<()> {
        if self.mode == AuthzMode::Off {
            return Ok(());
        }

        let decision = self.resolver.check(user_id, required, scope, ancestors).await?;
        match (decision, self.mode) {
            (Decision::Allow, _) | (_, AuthzMode::Off) => Ok(()),
            (Decision::Deny, AuthzMode::Advisory) => {
                tracing::warn!(
                    user_id,
                    required = %required,
                    scope = %scope,
                    "access denied (advisory mode, allowing)"
                );
                Ok(())
            }
            (Decision::Deny, AuthzMode::Strict) => Err(AuthzError::Forbidden {
                user_id,
                required,
                scope,
            }),
        }
    }

    /// Visibility filter for listings; honours the mode like `require`.
    pub async fn permits(
        &self,
        user_id: u64,
        required: RoleLevel,
        scope: ScopeRef,
        ancestors: &dyn AncestorResolver,
    ) -> AuthzResult<bool> {
        match self.require(user_id, required, scope, ancestors).await {
            Ok(()) => Ok(true),
            Err(AuthzError::Forbidden { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }
}
