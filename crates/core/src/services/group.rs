//! Group service.
//!
//! Structural edits to the forest. Creating a root and moving a group to
//! a different parent are superuser operations; everything else follows
//! `HasGroupPermission` on the touched group. Deleting a group takes its
//! whole subtree with it, events and permission rows included.

use chrono::Utc;
use sea_orm::Set;
use serde::Deserialize;
use tracing::info;
use validator::Validate;

use scoutreg_common::{AppError, AppResult, IdGenerator};
use scoutreg_db::entities::group;
use scoutreg_db::repositories::{
    EventRepository, GroupRepository, PermissionRepository, UserRepository,
};

use crate::services::authorization::AuthorizationService;

/// Group service for structural and descriptive edits.
#[derive(Clone)]
pub struct GroupService {
    group_repo: GroupRepository,
    event_repo: EventRepository,
    permission_repo: PermissionRepository,
    user_repo: UserRepository,
    authz: AuthorizationService,
    id_gen: IdGenerator,
}

/// Input for creating a group.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateGroupInput {
    /// Stable id. Seed data supplies slug ids; when absent a ULID is
    /// generated.
    #[validate(length(min = 1, max = 64))]
    pub id: Option<String>,

    /// Parent group; `None` creates a root.
    pub parent_id: Option<String>,

    #[validate(length(min = 1, max = 100))]
    pub name: String,

    #[validate(length(max = 50))]
    pub level: Option<String>,

    #[validate(length(max = 200))]
    pub street: Option<String>,

    #[validate(length(max = 10))]
    pub zip: Option<String>,

    #[validate(length(max = 100))]
    pub city: Option<String>,

    #[validate(length(max = 200))]
    pub website: Option<String>,

    #[validate(length(max = 200))]
    pub instagram: Option<String>,

    #[validate(length(max = 200))]
    pub facebook: Option<String>,

    /// Whether the group appears in public listings.
    #[serde(default = "default_display")]
    pub display: bool,

    /// Free-form attributes.
    pub attributes: Option<serde_json::Value>,
}

const fn default_display() -> bool {
    true
}

/// Input for updating a group's descriptive fields. The parent is not
/// part of this struct; moving a group is [`GroupService::set_parent`].
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateGroupInput {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,

    #[validate(length(max = 50))]
    pub level: Option<String>,

    #[validate(length(max = 200))]
    pub street: Option<String>,

    #[validate(length(max = 10))]
    pub zip: Option<String>,

    #[validate(length(max = 100))]
    pub city: Option<String>,

    #[validate(length(max = 200))]
    pub website: Option<String>,

    #[validate(length(max = 200))]
    pub instagram: Option<String>,

    #[validate(length(max = 200))]
    pub facebook: Option<String>,

    pub display: Option<bool>,

    pub attributes: Option<serde_json::Value>,
}

/// One row of a seed import.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GroupSeed {
    #[validate(length(min = 1, max = 64))]
    pub id: String,

    pub parent_id: Option<String>,

    #[validate(length(min = 1, max = 100))]
    pub name: String,

    #[validate(length(max = 50))]
    pub level: Option<String>,

    #[validate(length(max = 200))]
    pub street: Option<String>,

    #[validate(length(max = 10))]
    pub zip: Option<String>,

    #[validate(length(max = 100))]
    pub city: Option<String>,

    #[validate(length(max = 200))]
    pub website: Option<String>,
}

/// Counts reported back from a seed import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub inserted: usize,
    pub updated: usize,
}

impl GroupService {
    /// Create a new group service.
    #[must_use]
    pub fn new(
        group_repo: GroupRepository,
        event_repo: EventRepository,
        permission_repo: PermissionRepository,
        user_repo: UserRepository,
        authz: AuthorizationService,
    ) -> Self {
        Self {
            group_repo,
            event_repo,
            permission_repo,
            user_repo,
            authz,
            id_gen: IdGenerator::new(),
        }
    }

    /// Get a group by id.
    pub async fn get(&self, id: &str) -> AppResult<group::Model> {
        self.group_repo.get_by_id(id).await
    }

    /// The whole forest in pre-order, roots in snapshot order.
    pub async fn list_all(&self) -> AppResult<Vec<group::Model>> {
        let tree = self.authz.snapshot().await?;
        Ok(tree.preorder()?.into_iter().cloned().collect())
    }

    /// Root groups.
    pub async fn list_roots(&self) -> AppResult<Vec<group::Model>> {
        self.group_repo.find_roots().await
    }

    /// Direct children of a group.
    pub async fn list_children(&self, parent_id: &str) -> AppResult<Vec<group::Model>> {
        self.group_repo.get_by_id(parent_id).await?;
        self.group_repo.find_children(parent_id).await
    }

    /// Create a group.
    ///
    /// A child group requires management permission on the parent; a root
    /// group requires superuser.
    pub async fn create(&self, actor_id: &str, input: CreateGroupInput) -> AppResult<group::Model> {
        input.validate()?;

        match &input.parent_id {
            Some(parent_id) => {
                self.group_repo.get_by_id(parent_id).await?;
                if !self.authz.has_group_permission(actor_id, parent_id).await? {
                    return Err(AppError::Unauthorized);
                }
            }
            None => {
                let actor = self.user_repo.get_by_id(actor_id).await?;
                if !actor.is_superuser {
                    return Err(AppError::Unauthorized);
                }
            }
        }

        let id = match input.id {
            Some(id) => {
                if self.group_repo.find_by_id(&id).await?.is_some() {
                    return Err(AppError::Conflict(format!("Group {id} already exists")));
                }
                id
            }
            None => self.id_gen.generate(),
        };

        let created = self
            .group_repo
            .create(group::ActiveModel {
                id: Set(id),
                parent_id: Set(input.parent_id),
                name: Set(input.name),
                level: Set(input.level),
                street: Set(input.street),
                zip: Set(input.zip),
                city: Set(input.city),
                website: Set(input.website),
                instagram: Set(input.instagram),
                facebook: Set(input.facebook),
                display: Set(input.display),
                attributes: Set(input.attributes),
                created_at: Set(Utc::now().fixed_offset()),
                updated_at: Set(None),
            })
            .await?;

        info!(group_id = %created.id, created_by = %actor_id, "group created");
        Ok(created)
    }

    /// Update a group's descriptive fields.
    pub async fn update(
        &self,
        actor_id: &str,
        group_id: &str,
        input: UpdateGroupInput,
    ) -> AppResult<group::Model> {
        input.validate()?;

        let existing = self.group_repo.get_by_id(group_id).await?;
        if !self.authz.has_group_permission(actor_id, group_id).await? {
            return Err(AppError::Unauthorized);
        }

        let mut active: group::ActiveModel = existing.into();
        if let Some(name) = input.name {
            active.name = Set(name);
        }
        if let Some(level) = input.level {
            active.level = Set(Some(level));
        }
        if let Some(street) = input.street {
            active.street = Set(Some(street));
        }
        if let Some(zip) = input.zip {
            active.zip = Set(Some(zip));
        }
        if let Some(city) = input.city {
            active.city = Set(Some(city));
        }
        if let Some(website) = input.website {
            active.website = Set(Some(website));
        }
        if let Some(instagram) = input.instagram {
            active.instagram = Set(Some(instagram));
        }
        if let Some(facebook) = input.facebook {
            active.facebook = Set(Some(facebook));
        }
        if let Some(display) = input.display {
            active.display = Set(display);
        }
        if let Some(attributes) = input.attributes {
            active.attributes = Set(Some(attributes));
        }
        active.updated_at = Set(Some(Utc::now().fixed_offset()));

        let updated = self.group_repo.update(active).await?;
        info!(group_id = %updated.id, updated_by = %actor_id, "group updated");
        Ok(updated)
    }

    /// Move a group under a different parent (or make it a root).
    ///
    /// Superuser only: re-parenting changes what every grant along the old
    /// and new paths covers. The new parent must not lie inside the moved
    /// group's own subtree.
    pub async fn set_parent(
        &self,
        actor_id: &str,
        group_id: &str,
        new_parent_id: Option<String>,
    ) -> AppResult<group::Model> {
        let actor = self.user_repo.get_by_id(actor_id).await?;
        if !actor.is_superuser {
            return Err(AppError::Unauthorized);
        }

        let tree = self.authz.snapshot().await?;
        let existing = tree.get(group_id)?.clone();
        if let Some(parent_id) = &new_parent_id {
            tree.get(parent_id)?;
            if tree.subtree_ids(group_id)?.contains(parent_id) {
                return Err(AppError::Validation(format!(
                    "Group {parent_id} lies inside the subtree of {group_id}"
                )));
            }
        }

        let mut active: group::ActiveModel = existing.into();
        active.parent_id = Set(new_parent_id.clone());
        active.updated_at = Set(Some(Utc::now().fixed_offset()));
        let updated = self.group_repo.update(active).await?;

        info!(
            group_id = %updated.id,
            new_parent = new_parent_id.as_deref().unwrap_or("<root>"),
            moved_by = %actor_id,
            "group re-parented"
        );
        Ok(updated)
    }

    /// Delete a group and its entire subtree.
    ///
    /// Descendant groups, their events and the permission rows on every
    /// deleted group go with it; pending requests die with the group.
    pub async fn delete(&self, actor_id: &str, group_id: &str) -> AppResult<()> {
        if !self.authz.has_group_permission(actor_id, group_id).await? {
            return Err(AppError::Unauthorized);
        }

        let tree = self.authz.snapshot().await?;
        let subtree = tree.subtree_ids(group_id)?;

        let events = self.event_repo.delete_by_group_ids(&subtree).await?;
        let permissions = self.permission_repo.delete_by_group_ids(&subtree).await?;
        let groups = self.group_repo.delete_by_ids(&subtree).await?;

        info!(
            group_id,
            groups, events, permissions,
            deleted_by = %actor_id,
            "group subtree deleted"
        );
        Ok(())
    }

    /// Batch upsert of groups keyed by stable id, for loading the
    /// federation structure from a prepared list. Superuser only.
    ///
    /// Existing rows keep their visibility flag and extra attributes; the
    /// seeded fields overwrite what is there.
    pub async fn import(&self, actor_id: &str, seeds: Vec<GroupSeed>) -> AppResult<ImportSummary> {
        let actor = self.user_repo.get_by_id(actor_id).await?;
        if !actor.is_superuser {
            return Err(AppError::Unauthorized);
        }

        let mut summary = ImportSummary::default();
        for seed in seeds {
            seed.validate()?;
            match self.group_repo.find_by_id(&seed.id).await? {
                Some(existing) => {
                    let mut active: group::ActiveModel = existing.into();
                    active.parent_id = Set(seed.parent_id);
                    active.name = Set(seed.name);
                    active.level = Set(seed.level);
                    active.street = Set(seed.street);
                    active.zip = Set(seed.zip);
                    active.city = Set(seed.city);
                    active.website = Set(seed.website);
                    active.updated_at = Set(Some(Utc::now().fixed_offset()));
                    self.group_repo.update(active).await?;
                    summary.updated += 1;
                }
                None => {
                    self.group_repo
                        .create(group::ActiveModel {
                            id: Set(seed.id),
                            parent_id: Set(seed.parent_id),
                            name: Set(seed.name),
                            level: Set(seed.level),
                            street: Set(seed.street),
                            zip: Set(seed.zip),
                            city: Set(seed.city),
                            website: Set(seed.website),
                            instagram: Set(None),
                            facebook: Set(None),
                            display: Set(true),
                            attributes: Set(None),
                            created_at: Set(Utc::now().fixed_offset()),
                            updated_at: Set(None),
                        })
                        .await?;
                    summary.inserted += 1;
                }
            }
        }

        info!(
            inserted = summary.inserted,
            updated = summary.updated,
            imported_by = %actor_id,
            "group seed import finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scoutreg_db::entities::{user, user_permission};
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use std::sync::Arc;

    fn grp(id: &str, parent: Option<&str>) -> group::Model {
        group::Model {
            id: id.to_string(),
            parent_id: parent.map(ToString::to_string),
            name: format!("Group {id}"),
            level: None,
            street: None,
            zip: None,
            city: None,
            website: None,
            instagram: None,
            facebook: None,
            display: true,
            attributes: None,
            created_at: chrono::Utc::now().fixed_offset(),
            updated_at: None,
        }
    }

    fn usr(id: &str, is_superuser: bool) -> user::Model {
        user::Model {
            id: id.to_string(),
            password_hash: "hash".to_string(),
            name: format!("User {id}"),
            is_superuser,
            created_at: chrono::Utc::now().fixed_offset(),
            last_login: None,
            reset_token: None,
            reset_token_expires_at: None,
        }
    }

    fn perm(id: &str, user_id: &str, group_id: &str, granted: bool) -> user_permission::Model {
        user_permission::Model {
            id: id.to_string(),
            user_id: user_id.to_string(),
            group_id: group_id.to_string(),
            granted,
            created_at: chrono::Utc::now().fixed_offset(),
        }
    }

    fn service_with(
        group_db: sea_orm::DatabaseConnection,
        event_db: sea_orm::DatabaseConnection,
        user_db: sea_orm::DatabaseConnection,
        perm_db: sea_orm::DatabaseConnection,
    ) -> GroupService {
        let group_repo = GroupRepository::new(Arc::new(group_db));
        let event_repo = EventRepository::new(Arc::new(event_db));
        let user_repo = UserRepository::new(Arc::new(user_db));
        let permission_repo = PermissionRepository::new(Arc::new(perm_db));
        let authz = AuthorizationService::new(
            group_repo.clone(),
            event_repo.clone(),
            user_repo.clone(),
            permission_repo.clone(),
        );
        GroupService::new(group_repo, event_repo, permission_repo, user_repo, authz)
    }

    fn child_input(parent: &str, name: &str) -> CreateGroupInput {
        CreateGroupInput {
            id: None,
            parent_id: Some(parent.to_string()),
            name: name.to_string(),
            level: Some("Stamm".to_string()),
            street: None,
            zip: None,
            city: None,
            website: None,
            instagram: None,
            facebook: None,
            display: true,
            attributes: None,
        }
    }

    #[tokio::test]
    async fn test_root_create_requires_superuser() {
        let user_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![usr("m@example.org", false)]])
            .into_connection();
        let service = service_with(
            MockDatabase::new(DatabaseBackend::Postgres).into_connection(),
            MockDatabase::new(DatabaseBackend::Postgres).into_connection(),
            user_db,
            MockDatabase::new(DatabaseBackend::Postgres).into_connection(),
        );

        let input = CreateGroupInput {
            parent_id: None,
            ..child_input("ignored", "New Land")
        };
        match service.create("m@example.org", input).await {
            Err(AppError::Unauthorized) => {}
            other => panic!("Expected Unauthorized, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_manager_creates_child_group() {
        let created = grp("01new", Some("b"));
        let group_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![grp("b", Some("a"))]])
            .append_query_results([vec![grp("a", None), grp("b", Some("a"))]])
            .append_query_results([vec![created]])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();
        let user_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![usr("m@example.org", false)]])
            .into_connection();
        let perm_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![perm("p1", "m@example.org", "b", true)]])
            .into_connection();

        let service = service_with(
            group_db,
            MockDatabase::new(DatabaseBackend::Postgres).into_connection(),
            user_db,
            perm_db,
        );
        let group = service
            .create("m@example.org", child_input("b", "Stamm Greif"))
            .await
            .unwrap();
        assert_eq!(group.parent_id.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_stranger_cannot_create_child_group() {
        let group_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![grp("b", Some("a"))]])
            .append_query_results([vec![grp("a", None), grp("b", Some("a"))]])
            .into_connection();
        let user_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![usr("x@example.org", false)]])
            .into_connection();
        let perm_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<user_permission::Model>::new()])
            .into_connection();

        let service = service_with(
            group_db,
            MockDatabase::new(DatabaseBackend::Postgres).into_connection(),
            user_db,
            perm_db,
        );
        match service
            .create("x@example.org", child_input("b", "Stamm Greif"))
            .await
        {
            Err(AppError::Unauthorized) => {}
            other => panic!("Expected Unauthorized, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_seed_id_conflict() {
        let group_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![grp("b", Some("a"))]])
            .append_query_results([vec![grp("a", None), grp("b", Some("a"))]])
            .append_query_results([vec![grp("taken", Some("b"))]])
            .into_connection();
        let user_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![usr("m@example.org", false)]])
            .into_connection();
        let perm_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![perm("p1", "m@example.org", "b", true)]])
            .into_connection();

        let service = service_with(
            group_db,
            MockDatabase::new(DatabaseBackend::Postgres).into_connection(),
            user_db,
            perm_db,
        );
        let input = CreateGroupInput {
            id: Some("taken".to_string()),
            ..child_input("b", "Stamm Greif")
        };
        match service.create("m@example.org", input).await {
            Err(AppError::Conflict(_)) => {}
            other => panic!("Expected Conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reparent_into_own_subtree_is_rejected() {
        let group_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![
                grp("a", None),
                grp("b", Some("a")),
                grp("d", Some("b")),
            ]])
            .into_connection();
        let user_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![usr("root@example.org", true)]])
            .into_connection();

        let service = service_with(
            group_db,
            MockDatabase::new(DatabaseBackend::Postgres).into_connection(),
            user_db,
            MockDatabase::new(DatabaseBackend::Postgres).into_connection(),
        );
        match service
            .set_parent("root@example.org", "b", Some("d".to_string()))
            .await
        {
            Err(AppError::Validation(_)) => {}
            other => panic!("Expected Validation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reparent_requires_superuser() {
        let user_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![usr("m@example.org", false)]])
            .into_connection();
        let service = service_with(
            MockDatabase::new(DatabaseBackend::Postgres).into_connection(),
            MockDatabase::new(DatabaseBackend::Postgres).into_connection(),
            user_db,
            MockDatabase::new(DatabaseBackend::Postgres).into_connection(),
        );
        match service.set_parent("m@example.org", "b", None).await {
            Err(AppError::Unauthorized) => {}
            other => panic!("Expected Unauthorized, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete_cascades_over_subtree() {
        // Manager of b deletes it; d hangs below b.
        let group_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![
                grp("a", None),
                grp("b", Some("a")),
                grp("d", Some("b")),
            ]])
            .append_query_results([vec![
                grp("a", None),
                grp("b", Some("a")),
                grp("d", Some("b")),
            ]])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 2,
            }])
            .into_connection();
        let user_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![usr("m@example.org", false)]])
            .into_connection();
        let perm_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![perm("p1", "m@example.org", "b", true)]])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();
        let event_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 3,
            }])
            .into_connection();

        let service = service_with(group_db, event_db, user_db, perm_db);
        service.delete("m@example.org", "b").await.unwrap();
    }

    #[tokio::test]
    async fn test_import_requires_superuser() {
        let user_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![usr("m@example.org", false)]])
            .into_connection();
        let service = service_with(
            MockDatabase::new(DatabaseBackend::Postgres).into_connection(),
            MockDatabase::new(DatabaseBackend::Postgres).into_connection(),
            user_db,
            MockDatabase::new(DatabaseBackend::Postgres).into_connection(),
        );
        match service.import("m@example.org", vec![]).await {
            Err(AppError::Unauthorized) => {}
            other => panic!("Expected Unauthorized, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_import_inserts_and_updates() {
        let group_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<group::Model>::new()])
            .append_query_results([vec![grp("bdp", None)]])
            .append_query_results([vec![grp("bdp-bawue", Some("bdp"))]])
            .append_query_results([vec![grp("bdp-bawue", Some("bdp"))]])
            .append_exec_results([
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                },
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                },
            ])
            .into_connection();
        let user_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![usr("root@example.org", true)]])
            .into_connection();

        let service = service_with(
            group_db,
            MockDatabase::new(DatabaseBackend::Postgres).into_connection(),
            user_db,
            MockDatabase::new(DatabaseBackend::Postgres).into_connection(),
        );
        let seeds = vec![
            GroupSeed {
                id: "bdp".to_string(),
                parent_id: None,
                name: "BdP".to_string(),
                level: Some("Bund".to_string()),
                street: None,
                zip: None,
                city: None,
                website: None,
            },
            GroupSeed {
                id: "bdp-bawue".to_string(),
                parent_id: Some("bdp".to_string()),
                name: "BdP Baden-Württemberg".to_string(),
                level: Some("Land".to_string()),
                street: None,
                zip: None,
                city: None,
                website: None,
            },
        ];
        let summary = service.import("root@example.org", seeds).await.unwrap();
        assert_eq!(
            summary,
            ImportSummary {
                inserted: 1,
                updated: 1
            }
        );
    }
}
