use crate::models::user_role::ScopeKind;

/// scope kind -> parent kind. `platform` is the only root; `appstore` hangs
/// directly off the platform rather than a cluster.
const HIERARCHY: [(ScopeKind, Option<ScopeKind>); 5] = [
    (ScopeKind::Platform, None),
    (ScopeKind::Cluster, Some(ScopeKind::Platform)),
    (ScopeKind::Project, Some(ScopeKind::Cluster)),
    (ScopeKind::Pipeline, Some(ScopeKind::Cluster)),
    (ScopeKind::AppStore, Some(ScopeKind::Platform)),
];

pub fn parent(kind: ScopeKind) -> Option<ScopeKind> {
    HIERARCHY
        .iter()
        .find(|(child, _)| *child == kind)
        .and_then(|(_, parent)| *parent)
}

/// `kind` followed by each ancestor up to the root.
pub fn lineage(kind: ScopeKind) -> Vec<ScopeKind> {
    let mut chain = vec![kind];
    let mut current = kind;
    while let Some(next) = parent(current) {
        chain.push(next);
        current = next;
    }
    chain
}

pub fn is_ancestor(ancestor: ScopeKind, kind: ScopeKind) -> bool {
    lineage(kind).into_iter().skip(1).any(|k| k == ancestor)
}
