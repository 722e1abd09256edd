//! Flat-role escalation for fixed-depth deployments.
//!
//! Some deployments run the forest at a fixed three-level layout: lands
//! at the roots, regions below them, local groups at the leaves. The
//! coordinator roles of that layout are not separate state; a "land
//! coordinator" is simply a user granted on a depth-0 group. This module
//! provides the level-filtered views and the escalation matrix deciding
//! who may toggle whose roles.

use std::collections::HashSet;

use chrono::Utc;
use sea_orm::Set;
use tracing::info;

use scoutreg_common::{AppError, AppResult, IdGenerator};
use scoutreg_db::entities::{event, group, user, user_permission};
use scoutreg_db::repositories::{GroupRepository, PermissionRepository, UserRepository};

use crate::services::authorization::{managed_group_ids, AuthorizationService};
use crate::services::notification::{NoticeBuilder, NotifierService};
use crate::services::org_tree::OrgTree;

/// The three coordinator levels of a flat deployment, identified by the
/// depth of the scope group they point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerLevel {
    /// Root level, e.g. a national association.
    Land,
    /// Middle level, e.g. a district.
    Region,
    /// Leaf level, the local group.
    Group,
}

impl ManagerLevel {
    /// Tree depth a scope group of this level must have.
    #[must_use]
    pub const fn depth(self) -> usize {
        match self {
            Self::Land => 0,
            Self::Region => 1,
            Self::Group => 2,
        }
    }

    /// Label used in messages and logs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Land => "land",
            Self::Region => "region",
            Self::Group => "group",
        }
    }

    /// Whether holders of this level may appoint peers at the same scope.
    /// Region coordinators are appointed from above only.
    #[must_use]
    pub const fn grantable_by_same_level(self) -> bool {
        matches!(self, Self::Land | Self::Group)
    }
}

/// The escalation matrix.
///
/// An actor may toggle a subject's role at `level` over the scope group
/// whose root-down path is `scope_path_ids` when one of their granted
/// groups lies on that path. Two restrictions tighten the rule: region
/// roles can only be granted from strictly above the scope, and actors
/// editing their own roles always need authority from strictly above.
/// Superusers may do everything here; their own superuser flag is the one
/// thing this matrix never covers.
#[must_use]
pub fn may_set_manager_flag(
    actor: &user::Model,
    subject_id: &str,
    level: ManagerLevel,
    scope_path_ids: &[String],
    actor_grants: &[user_permission::Model],
) -> bool {
    if actor.is_superuser {
        return true;
    }
    let editing_self = actor.id == subject_id;
    let allowed: &[String] = if editing_self || !level.grantable_by_same_level() {
        let end = scope_path_ids.len().saturating_sub(1);
        &scope_path_ids[..end]
    } else {
        scope_path_ids
    };
    allowed.iter().any(|group_id| {
        actor_grants
            .iter()
            .any(|p| p.granted && p.user_id == actor.id && p.group_id == *group_id)
    })
}

/// Service exposing the flat-role views and role toggles.
#[derive(Clone)]
pub struct EscalationService {
    user_repo: UserRepository,
    group_repo: GroupRepository,
    permission_repo: PermissionRepository,
    authz: AuthorizationService,
    notifier: NotifierService,
    notices: NoticeBuilder,
    id_gen: IdGenerator,
}

impl EscalationService {
    /// Create a new escalation service.
    pub fn new(
        user_repo: UserRepository,
        group_repo: GroupRepository,
        permission_repo: PermissionRepository,
        authz: AuthorizationService,
        notifier: NotifierService,
        notices: NoticeBuilder,
    ) -> Self {
        Self {
            user_repo,
            group_repo,
            permission_repo,
            authz,
            notifier,
            notices,
            id_gen: IdGenerator::new(),
        }
    }

    /// Lands (root groups) the actor manages.
    pub async fn query_lands(&self, actor_id: &str) -> AppResult<Vec<group::Model>> {
        self.managed_at_depth(actor_id, ManagerLevel::Land).await
    }

    /// Regions the actor manages.
    pub async fn query_regions(&self, actor_id: &str) -> AppResult<Vec<group::Model>> {
        self.managed_at_depth(actor_id, ManagerLevel::Region).await
    }

    /// Local groups the actor manages.
    pub async fn query_groups(&self, actor_id: &str) -> AppResult<Vec<group::Model>> {
        self.managed_at_depth(actor_id, ManagerLevel::Group).await
    }

    /// Events reachable through the actor's roles.
    pub async fn query_events(&self, actor_id: &str) -> AppResult<Vec<event::Model>> {
        self.authz.managed_events(actor_id).await
    }

    /// Users visible to the actor through their roles.
    pub async fn query_users(&self, actor_id: &str) -> AppResult<Vec<user::Model>> {
        self.authz.managed_users(actor_id).await
    }

    /// Toggle another user's superuser flag.
    ///
    /// Only superusers may do this, and never to themselves; the
    /// self-restriction holds even for superusers.
    pub async fn set_superuser(
        &self,
        actor_id: &str,
        subject_id: &str,
        value: bool,
    ) -> AppResult<user::Model> {
        if actor_id == subject_id {
            return Err(AppError::Forbidden(
                "Own superuser flag cannot be changed".to_string(),
            ));
        }
        let actor = self.user_repo.get_by_id(actor_id).await?;
        if !actor.is_superuser {
            return Err(AppError::Unauthorized);
        }
        let subject = self.user_repo.get_by_id(subject_id).await?;
        if subject.is_superuser == value {
            return Ok(subject);
        }

        let mut active: user::ActiveModel = subject.into();
        active.is_superuser = Set(value);
        let updated = self.user_repo.update(active).await?;

        info!(
            subject_id = %updated.id,
            value,
            changed_by = %actor_id,
            "superuser flag changed"
        );

        let description = if value {
            "superuser access granted"
        } else {
            "superuser access revoked"
        };
        self.notify_flags_changed(&updated, description).await?;
        Ok(updated)
    }

    /// Grant or revoke a coordinator role.
    ///
    /// Granting upserts a granted permission row on the scope group,
    /// revoking deletes it. The scope group's depth must match the level.
    pub async fn set_manager_flag(
        &self,
        actor_id: &str,
        subject_id: &str,
        level: ManagerLevel,
        scope_group_id: &str,
        value: bool,
    ) -> AppResult<()> {
        let actor = self.user_repo.get_by_id(actor_id).await?;
        let subject = self.user_repo.get_by_id(subject_id).await?;
        let tree = self.authz.snapshot().await?;

        let scope = self.require_scope(&tree, scope_group_id, level)?.clone();
        let path = tree.path_ids(scope_group_id)?;
        let actor_grants = self.permission_repo.find_granted_by_user(actor_id).await?;
        if !may_set_manager_flag(&actor, subject_id, level, &path, &actor_grants) {
            return Err(AppError::Unauthorized);
        }

        let existing = self
            .permission_repo
            .find_by_user_and_group(subject_id, scope_group_id)
            .await?;
        match (existing, value) {
            (Some(row), true) if row.granted => return Ok(()),
            (Some(row), true) => {
                let mut active: user_permission::ActiveModel = row.into();
                active.granted = Set(true);
                self.permission_repo.update(active).await?;
            }
            (None, true) => {
                self.permission_repo
                    .create(user_permission::ActiveModel {
                        id: Set(self.id_gen.generate()),
                        user_id: Set(subject.id.clone()),
                        group_id: Set(scope.id.clone()),
                        granted: Set(true),
                        created_at: Set(Utc::now().fixed_offset()),
                    })
                    .await?;
            }
            (Some(row), false) => {
                self.permission_repo.delete(&row.id).await?;
            }
            (None, false) => return Ok(()),
        }

        info!(
            subject_id = %subject.id,
            scope_group_id = %scope.id,
            level = level.label(),
            value,
            changed_by = %actor_id,
            "manager flag changed"
        );

        let description = format!(
            "{} coordinator role for {} {}",
            level.label(),
            scope.display_name(),
            if value { "granted" } else { "revoked" }
        );
        self.notify_flags_changed_with_tree(&tree, &subject, &description)
            .await?;
        Ok(())
    }

    /// Move a coordinator role to a different scope at the same level.
    ///
    /// The role survives the move only when the actor could also grant it
    /// at the new scope; otherwise the subject is left with a pending
    /// request there and has to be re-approved.
    pub async fn reassign_scope(
        &self,
        actor_id: &str,
        subject_id: &str,
        level: ManagerLevel,
        from_group_id: &str,
        to_group_id: &str,
    ) -> AppResult<user_permission::Model> {
        let actor = self.user_repo.get_by_id(actor_id).await?;
        let subject = self.user_repo.get_by_id(subject_id).await?;
        let tree = self.authz.snapshot().await?;

        self.require_scope(&tree, from_group_id, level)?;
        let to_scope = self.require_scope(&tree, to_group_id, level)?.clone();

        let actor_grants = self.permission_repo.find_granted_by_user(actor_id).await?;
        let from_path = tree.path_ids(from_group_id)?;
        if !may_set_manager_flag(&actor, subject_id, level, &from_path, &actor_grants) {
            return Err(AppError::Unauthorized);
        }

        let Some(row) = self
            .permission_repo
            .find_by_user_and_group(subject_id, from_group_id)
            .await?
        else {
            return Err(AppError::NotFound(format!(
                "No {} role for {subject_id} at {from_group_id}",
                level.label()
            )));
        };
        let was_granted = row.granted;
        self.permission_repo.delete(&row.id).await?;

        let to_path = tree.path_ids(to_group_id)?;
        let keep =
            was_granted && may_set_manager_flag(&actor, subject_id, level, &to_path, &actor_grants);

        let moved = match self
            .permission_repo
            .find_by_user_and_group(subject_id, to_group_id)
            .await?
        {
            Some(existing) => {
                let already = existing.granted;
                let mut active: user_permission::ActiveModel = existing.into();
                active.granted = Set(already || keep);
                self.permission_repo.update(active).await?
            }
            None => {
                self.permission_repo
                    .create(user_permission::ActiveModel {
                        id: Set(self.id_gen.generate()),
                        user_id: Set(subject.id.clone()),
                        group_id: Set(to_scope.id.clone()),
                        granted: Set(keep),
                        created_at: Set(Utc::now().fixed_offset()),
                    })
                    .await?
            }
        };

        info!(
            subject_id = %subject.id,
            from = %from_group_id,
            to = %to_group_id,
            level = level.label(),
            kept = moved.granted,
            changed_by = %actor_id,
            "coordinator scope reassigned"
        );

        let description = if moved.granted {
            format!(
                "{} coordinator role moved to {}",
                level.label(),
                to_scope.display_name()
            )
        } else {
            format!(
                "{} coordinator role moved to {} and set back to pending, approval is required again",
                level.label(),
                to_scope.display_name()
            )
        };
        self.notify_flags_changed_with_tree(&tree, &subject, &description)
            .await?;

        Ok(moved)
    }

    async fn managed_at_depth(
        &self,
        actor_id: &str,
        level: ManagerLevel,
    ) -> AppResult<Vec<group::Model>> {
        let actor = self.user_repo.get_by_id(actor_id).await?;
        let tree = self.authz.snapshot().await?;
        let grants = self.permission_repo.find_granted_by_user(actor_id).await?;
        let managed = managed_group_ids(&tree, &actor, &grants)?;

        let mut out = Vec::new();
        for id in &managed {
            if tree.depth(id)? == level.depth() {
                out.push(tree.get(id)?.clone());
            }
        }
        Ok(out)
    }

    fn require_scope<'t>(
        &self,
        tree: &'t OrgTree,
        group_id: &str,
        level: ManagerLevel,
    ) -> AppResult<&'t group::Model> {
        if tree.depth(group_id)? != level.depth() {
            return Err(AppError::Validation(format!(
                "Group {group_id} is not a {} level group",
                level.label()
            )));
        }
        tree.get(group_id)
    }

    async fn notify_flags_changed(
        &self,
        subject: &user::Model,
        description: &str,
    ) -> AppResult<()> {
        let tree = self.authz.snapshot().await?;
        self.notify_flags_changed_with_tree(&tree, subject, description)
            .await
    }

    async fn notify_flags_changed_with_tree(
        &self,
        tree: &OrgTree,
        subject: &user::Model,
        description: &str,
    ) -> AppResult<()> {
        let cc = self.manager_chain(tree, &subject.id).await?;
        let bcc: Vec<String> = self
            .user_repo
            .find_superusers()
            .await?
            .into_iter()
            .map(|u| u.id)
            .collect();
        let notice = self
            .notices
            .account_flags_changed(subject, description, cc, bcc);
        if let Err(e) = self.notifier.deliver(notice).await {
            tracing::warn!(error = %e, "failed to deliver account flags notice");
        }
        Ok(())
    }

    /// Users holding a grant on any ancestor chain of the subject's
    /// permission rows, i.e. the people responsible for the subject.
    async fn manager_chain(&self, tree: &OrgTree, subject_id: &str) -> AppResult<Vec<String>> {
        let rows = self.permission_repo.find_by_user(subject_id).await?;

        let mut seen_groups: HashSet<String> = HashSet::new();
        let mut path_ids: Vec<String> = Vec::new();
        for row in &rows {
            let path = match tree.path_ids(&row.group_id) {
                Ok(p) => p,
                Err(AppError::GroupNotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            for id in path {
                if seen_groups.insert(id.clone()) {
                    path_ids.push(id);
                }
            }
        }
        if path_ids.is_empty() {
            return Ok(Vec::new());
        }

        let granted = self
            .permission_repo
            .find_granted_by_group_ids(&path_ids)
            .await?;
        let mut seen: HashSet<&str> = HashSet::new();
        let mut out: Vec<String> = Vec::new();
        for p in &granted {
            if p.granted && p.user_id != subject_id && seen.insert(p.user_id.as_str()) {
                out.push(p.user_id.clone());
            }
        }
        Ok(out)
    }
}
