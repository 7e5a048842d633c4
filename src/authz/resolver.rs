use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::grants::RoleGrantManager;
use super::scope;
use crate::errors::{AuthzError, AuthzResult};
use crate::models::user::User;
use crate::models::user_role::{RoleLevel, ScopeKind, ScopeRef, UserRole};
use crate::store::IdentityStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Maps a scope instance to the instance that owns it, e.g. project 42 -> cluster 7.
/// Supplied by the business domain that knows the ownership.
#[async_trait]
pub trait AncestorResolver: Send + Sync {
    async fn resolve_ancestor(&self, scope: ScopeRef) -> AuthzResult<Option<ScopeRef>>;
}

/// Resolver for scopes whose only ancestor is the platform.
pub struct NoAncestors;

#[async_trait]
impl AncestorResolver for NoAncestors {
    async fn resolve_ancestor(&self, _scope: ScopeRef) -> AuthzResult<Option<ScopeRef>> {
        Ok(None)
    }
}

/// The requested instance plus the ancestor instance ids known for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeChain {
    target: ScopeRef,
    ancestors: BTreeMap<ScopeKind, u64>,
}

impl ScopeChain {
    pub fn new(target: ScopeRef) -> Self {
        Self {
            target,
            ancestors: BTreeMap::new(),
        }
    }

    /// Ancestors outside the target's lineage are dropped.
    pub fn with_ancestor(mut self, ancestor: ScopeRef) -> Self {
        if scope::is_ancestor(ancestor.kind, self.target.kind) {
            self.ancestors.insert(ancestor.kind, ancestor.id);
        } else {
            tracing::warn!(target = %self.target, ancestor = %ancestor, "ignoring ancestor outside the scope lineage");
        }
        self
    }

    pub fn target(&self) -> ScopeRef {
        self.target
    }

    /// Build the chain by asking `resolver` for each parent in turn.
    pub async fn resolve(target: ScopeRef, resolver: &dyn AncestorResolver) -> AuthzResult<Self> {
        let mut chain = Self::new(target);
        let mut current = target;

        while let Some(expected) = scope::parent(current.kind) {
            let Some(found) = resolver.resolve_ancestor(current).await? else {
                break;
            };
            if found.kind != expected {
                tracing::warn!(
                    scope = %current,
                    expected = %expected,
                    found = %found,
                    "ancestor resolver returned a scope outside the hierarchy"
                );
                break;
            }
            chain.ancestors.insert(found.kind, found.id);
            current = found;
        }

        Ok(chain)
    }

    /// Instances to inspect, narrowest first. Levels without a known id are skipped;
    /// the platform level always resolves to its single instance.
    pub fn levels(&self) -> Vec<ScopeRef> {
        scope::lineage(self.target.kind)
            .into_iter()
            .filter_map(|kind| {
                if kind == self.target.kind {
                    Some(self.target)
                } else if kind == ScopeKind::Platform {
                    Some(ScopeRef::platform())
                } else {
                    self.ancestors.get(&kind).map(|id| ScopeRef::new(kind, *id))
                }
            })
            .collect()
    }
}

/// Narrowest-applicable-grant-wins: the first level holding a grant decides,
/// even when that grant is insufficient.
pub fn decide(user: &User, grants: &[UserRole], required: RoleLevel, chain: &ScopeChain) -> Decision {
    if user.is_super {
        return Decision::Allow;
    }

    for level in chain.levels() {
        if let Some(grant) = grants.iter().find(|g| g.is_at(level)) {
            return if grant.role.satisfies(required) {
                Decision::Allow
            } else {
                Decision::Deny
            };
        }
    }

    Decision::Deny
}

pub struct AuthorizationResolver {
    store: Arc<dyn IdentityStore>,
    grants: Arc<RoleGrantManager>,
}

impl AuthorizationResolver {
    pub fn new(store: Arc<dyn IdentityStore>, grants: Arc<RoleGrantManager>) -> Self {
        Self { store, grants }
    }

    /// Can `user_id` act with `required` at `scope`? Missing grants are a `Deny`;
    /// only an unresolvable user is an error.
    pub async fn check(
        &self,
        user_id: u64,
        required: RoleLevel,
        scope: ScopeRef,
        ancestors: &dyn AncestorResolver,
    ) -> AuthzResult<Decision> {
        let chain = ScopeChain::resolve(scope, ancestors).await?;
        self.check_chain(user_id, required, &chain).await
    }

    pub async fn check_chain(
        &self,
        user_id: u64,
        required: RoleLevel,
        chain: &ScopeChain,
    ) -> AuthzResult<Decision> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| AuthzError::unknown_user(user_id))?;

        if user.is_super {
            tracing::debug!(user_id, scope = %chain.target(), "super admin bypass");
            return Ok(Decision::Allow);
        }

        let grants = self.grants.list_for_user(user_id).await?;
        let decision = decide(&user, &grants, required, chain);

        tracing::debug!(
            user_id,
            required = %required,
            scope = %chain.target(),
            decision = ?decision,
            "authorization checked"
        );
        Ok(decision)
    }
}
