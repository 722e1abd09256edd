//! Authorization engine.
//!
//! Answers "which groups, events and users can this actor manage" and
//! "may this actor touch that resource". Authority always derives live
//! from the current grant rows over a fresh group snapshot; nothing is
//! cached, so a revoked grant loses its effect on the next check.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use scoutreg_common::{AppError, AppResult};
use scoutreg_db::entities::{event, group, user, user_permission};
use scoutreg_db::repositories::{
    EventRepository, GroupRepository, PermissionRepository, UserRepository,
};

use crate::services::org_tree::OrgTree;

/// Groups an actor manages: the first-seen deduplicated union of the
/// subtrees of all their granted groups, or the whole forest for
/// superusers. Grant rows pointing at groups missing from the snapshot
/// contribute nothing.
pub fn managed_group_ids(
    tree: &OrgTree,
    actor: &user::Model,
    grants: &[user_permission::Model],
) -> AppResult<Vec<String>> {
    if actor.is_superuser {
        return tree.preorder_ids();
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut out: Vec<String> = Vec::new();
    for grant in grants {
        if !grant.granted || grant.user_id != actor.id {
            continue;
        }
        let subtree = match tree.subtree_ids(&grant.group_id) {
            Ok(ids) => ids,
            Err(AppError::GroupNotFound(_)) => continue,
            Err(e) => return Err(e),
        };
        for id in subtree {
            if seen.insert(id.clone()) {
                out.push(id);
            }
        }
    }
    Ok(out)
}

/// Membership test equivalent to `managed_group_ids(..).contains(group_id)`
/// without materializing the whole closure: a group is managed exactly
/// when one of the actor's granted groups lies on its path to the root.
pub fn has_group_permission(
    tree: &OrgTree,
    actor: &user::Model,
    grants: &[user_permission::Model],
    group_id: &str,
) -> AppResult<bool> {
    // Unknown ids are an error, not a quiet "no".
    tree.get(group_id)?;
    if actor.is_superuser {
        return Ok(true);
    }

    let granted: HashSet<&str> = grants
        .iter()
        .filter(|p| p.granted && p.user_id == actor.id)
        .map(|p| p.group_id.as_str())
        .collect();
    if granted.is_empty() {
        return Ok(false);
    }
    Ok(tree
        .path_ids(group_id)?
        .iter()
        .any(|id| granted.contains(id.as_str())))
}

/// Users visible in the actor's admin listing: the actor itself first,
/// then every holder of a permission row in the given rows, in row
/// order, deduplicated. Pending holders count too; a manager has to see
/// who is waiting inside their subtree.
#[must_use]
pub fn managed_user_ids(
    actor: &user::Model,
    rows_on_managed: &[user_permission::Model],
) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    seen.insert(actor.id.as_str());
    let mut out = vec![actor.id.clone()];
    for perm in rows_on_managed {
        if seen.insert(perm.user_id.as_str()) {
            out.push(perm.user_id.clone());
        }
    }
    out
}

/// Users entitled to approve a request on the group whose root-to-group
/// path is `path_ids`: every holder of a granted permission on a path
/// node, walking the path from the root down, deduplicated first-seen.
#[must_use]
pub fn grantable_user_ids(
    path_ids: &[String],
    granted_on_path: &[user_permission::Model],
) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut out: Vec<String> = Vec::new();
    for group_id in path_ids {
        for perm in granted_on_path {
            if perm.granted
                && perm.group_id == *group_id
                && seen.insert(perm.user_id.as_str())
            {
                out.push(perm.user_id.clone());
            }
        }
    }
    out
}

/// Who gets to act on a pending permission request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalRoute {
    /// Users holding a grant along the target group's path.
    Managers(Vec<String>),
    /// Nobody along the path can approve; the request escalates to the
    /// superuser set.
    Superusers(Vec<String>),
    /// No managers and no superusers exist. Only a misconfigured
    /// deployment ends up here.
    Unreachable,
}

impl ApprovalRoute {
    /// Pick the route: path managers first, superusers as fallback.
    #[must_use]
    pub fn resolve(grantable: Vec<String>, superusers: Vec<String>) -> Self {
        if !grantable.is_empty() {
            Self::Managers(grantable)
        } else if !superusers.is_empty() {
            Self::Superusers(superusers)
        } else {
            Self::Unreachable
        }
    }

    /// Recipient ids for this route, empty when unreachable.
    #[must_use]
    pub fn recipients(&self) -> &[String] {
        match self {
            Self::Managers(ids) | Self::Superusers(ids) => ids,
            Self::Unreachable => &[],
        }
    }
}

/// Service answering authorization questions against the live database.
#[derive(Clone)]
pub struct AuthorizationService {
    group_repo: GroupRepository,
    event_repo: EventRepository,
    user_repo: UserRepository,
    permission_repo: PermissionRepository,
}

impl AuthorizationService {
    /// Create a new authorization service.
    pub fn new(
        group_repo: GroupRepository,
        event_repo: EventRepository,
        user_repo: UserRepository,
        permission_repo: PermissionRepository,
    ) -> Self {
        Self {
            group_repo,
            event_repo,
            user_repo,
            permission_repo,
        }
    }

    /// Load a fresh snapshot of the whole group forest.
    pub async fn snapshot(&self) -> AppResult<OrgTree> {
        let groups = self.group_repo.find_all().await?;
        Ok(OrgTree::from_groups(groups))
    }

    async fn managed_context(
        &self,
        actor_id: &str,
    ) -> AppResult<(user::Model, OrgTree, Vec<String>)> {
        let actor = self.user_repo.get_by_id(actor_id).await?;
        let tree = self.snapshot().await?;
        let grants = self.permission_repo.find_granted_by_user(actor_id).await?;
        let managed = managed_group_ids(&tree, &actor, &grants)?;
        Ok((actor, tree, managed))
    }

    /// Groups the actor manages, in deterministic listing order.
    pub async fn managed_groups(&self, actor_id: &str) -> AppResult<Vec<group::Model>> {
        let (_, tree, managed) = self.managed_context(actor_id).await?;
        let mut groups = Vec::with_capacity(managed.len());
        for id in &managed {
            groups.push(tree.get(id)?.clone());
        }
        Ok(groups)
    }

    /// Events belonging to the actor's managed groups, grouped in managed
    /// listing order, upcoming first within each group.
    pub async fn managed_events(&self, actor_id: &str) -> AppResult<Vec<event::Model>> {
        let (_, _, managed) = self.managed_context(actor_id).await?;
        let events = self.event_repo.find_by_group_ids(&managed).await?;

        let mut by_group: HashMap<String, Vec<event::Model>> = HashMap::new();
        for event in events {
            by_group.entry(event.group_id.clone()).or_default().push(event);
        }
        let mut out = Vec::new();
        for group_id in &managed {
            if let Some(mut bucket) = by_group.remove(group_id) {
                out.append(&mut bucket);
            }
        }
        Ok(out)
    }

    /// Users visible in the actor's admin listing. The actor always sees
    /// at least itself; superusers see everyone. Holders of pending
    /// requests inside the managed subtree are listed alongside the
    /// granted ones.
    pub async fn managed_users(&self, actor_id: &str) -> AppResult<Vec<user::Model>> {
        let (actor, _, managed) = self.managed_context(actor_id).await?;
        if actor.is_superuser {
            return self.user_repo.find_all().await;
        }
        let rows = self.permission_repo.find_by_group_ids(&managed).await?;
        let ids = managed_user_ids(&actor, &rows);
        self.users_in_order(&ids).await
    }

    /// Whether the actor may manage the given group.
    pub async fn has_group_permission(&self, actor_id: &str, group_id: &str) -> AppResult<bool> {
        let actor = self.user_repo.get_by_id(actor_id).await?;
        let tree = self.snapshot().await?;
        let grants = self.permission_repo.find_granted_by_user(actor_id).await?;
        has_group_permission(&tree, &actor, &grants, group_id)
    }

    /// Whether the actor may manage the given event, via its owning group.
    pub async fn has_event_permission(&self, actor_id: &str, event_id: &str) -> AppResult<bool> {
        let event = self.event_repo.get_by_id(event_id).await?;
        self.has_group_permission(actor_id, &event.group_id).await
    }

    /// Whether the target user appears in the actor's managed users.
    pub async fn manages_user(&self, actor_id: &str, user_id: &str) -> AppResult<bool> {
        if actor_id == user_id {
            return Ok(true);
        }
        let (actor, _, managed) = self.managed_context(actor_id).await?;
        if actor.is_superuser {
            return Ok(true);
        }
        let rows = self.permission_repo.find_by_group_ids(&managed).await?;
        Ok(rows.iter().any(|p| p.user_id == user_id))
    }

    /// Users entitled to approve the given permission, walking the target
    /// group's path from the root down.
    pub async fn grantable_users(
        &self,
        permission: &user_permission::Model,
    ) -> AppResult<Vec<user::Model>> {
        let tree = self.snapshot().await?;
        let path = tree.path_ids(&permission.group_id)?;
        let granted = self.permission_repo.find_granted_by_group_ids(&path).await?;
        let ids = grantable_user_ids(&path, &granted);
        self.users_in_order(&ids).await
    }

    /// Resolve where a request for this permission must be routed.
    pub async fn approval_route(
        &self,
        permission: &user_permission::Model,
    ) -> AppResult<ApprovalRoute> {
        let grantable: Vec<String> = self
            .grantable_users(permission)
            .await?
            .into_iter()
            .map(|u| u.id)
            .collect();
        // The superuser fallback is only consulted when the path yields
        // nobody.
        let superusers: Vec<String> = if grantable.is_empty() {
            self.user_repo
                .find_superusers()
                .await?
                .into_iter()
                .map(|u| u.id)
                .collect()
        } else {
            Vec::new()
        };
        let route = ApprovalRoute::resolve(grantable, superusers);
        if route == ApprovalRoute::Unreachable {
            warn!(
                group_id = %permission.group_id,
                user_id = %permission.user_id,
                "no approver reachable for permission request"
            );
        }
        Ok(route)
    }

    /// Approver ids for the permission, failing hard when nobody can
    /// approve it.
    pub async fn require_approvers(
        &self,
        permission: &user_permission::Model,
    ) -> AppResult<Vec<String>> {
        match self.approval_route(permission).await? {
            ApprovalRoute::Managers(ids) | ApprovalRoute::Superusers(ids) => Ok(ids),
            ApprovalRoute::Unreachable => {
                Err(AppError::UnreachableApproval(permission.group_id.clone()))
            }
        }
    }

    /// Users responsible for the public site: all superusers plus every
    /// holder of a granted permission on a root group.
    pub async fn site_editors(&self) -> AppResult<Vec<user::Model>> {
        let mut editors = self.user_repo.find_superusers().await?;
        let tree = self.snapshot().await?;
        let root_ids: Vec<String> = tree.roots().iter().map(|g| g.id.clone()).collect();
        let granted = self
            .permission_repo
            .find_granted_by_group_ids(&root_ids)
            .await?;

        let mut seen: HashSet<String> = editors.iter().map(|u| u.id.clone()).collect();
        let mut holder_ids: Vec<String> = Vec::new();
        for perm in &granted {
            if perm.granted && seen.insert(perm.user_id.clone()) {
                holder_ids.push(perm.user_id.clone());
            }
        }
        editors.extend(self.users_in_order(&holder_ids).await?);
        Ok(editors)
    }

    /// Fetch users by id, preserving the id list's order.
    async fn users_in_order(&self, ids: &[String]) -> AppResult<Vec<user::Model>> {
        let users = self.user_repo.find_by_ids(ids).await?;
        let mut by_id: HashMap<String, user::Model> =
            users.into_iter().map(|u| (u.id.clone(), u)).collect();
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }
}
