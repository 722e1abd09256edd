//! Permission request and approval workflow.
//!
//! A permission row is a pending request until it is granted; denial is
//! simply deleting the row. Notices go out after the write succeeded, and
//! a failed delivery never rolls the write back.

use chrono::Utc;
use sea_orm::Set;
use tracing::{info, warn};

use scoutreg_common::{AppError, AppResult, IdGenerator};
use scoutreg_db::entities::user_permission;
use scoutreg_db::repositories::{GroupRepository, PermissionRepository, UserRepository};

use crate::services::authorization::{ApprovalRoute, AuthorizationService};
use crate::services::notification::{NoticeBuilder, NotifierService};

/// Service driving the request, grant and revoke transitions.
#[derive(Clone)]
pub struct PermissionService {
    permission_repo: PermissionRepository,
    user_repo: UserRepository,
    group_repo: GroupRepository,
    authz: AuthorizationService,
    notifier: NotifierService,
    notices: NoticeBuilder,
    id_gen: IdGenerator,
}

impl PermissionService {
    /// Create a new permission service.
    pub fn new(
        permission_repo: PermissionRepository,
        user_repo: UserRepository,
        group_repo: GroupRepository,
        authz: AuthorizationService,
        notifier: NotifierService,
        notices: NoticeBuilder,
    ) -> Self {
        Self {
            permission_repo,
            user_repo,
            group_repo,
            authz,
            notifier,
            notices,
            id_gen: IdGenerator::new(),
        }
    }

    /// File a management request of the actor for a group.
    ///
    /// The row starts out pending and the users entitled to approve it are
    /// notified. When nobody along the group's path can approve, the
    /// superuser set is notified instead.
    pub async fn request(
        &self,
        actor_id: &str,
        group_id: &str,
    ) -> AppResult<user_permission::Model> {
        let actor = self.user_repo.get_by_id(actor_id).await?;
        let group = self.group_repo.get_by_id(group_id).await?;

        if self
            .permission_repo
            .find_by_user_and_group(actor_id, group_id)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict(format!(
                "Permission for group {group_id} already requested"
            )));
        }

        let permission = self
            .permission_repo
            .create(user_permission::ActiveModel {
                id: Set(self.id_gen.generate()),
                user_id: Set(actor.id.clone()),
                group_id: Set(group.id.clone()),
                granted: Set(false),
                created_at: Set(Utc::now().fixed_offset()),
            })
            .await?;

        info!(user_id = %actor.id, group_id = %group.id, "permission requested");

        match self.authz.approval_route(&permission).await? {
            ApprovalRoute::Managers(ids) | ApprovalRoute::Superusers(ids) => {
                let notice = self.notices.permission_requested(&actor, &group, ids);
                if let Err(e) = self.notifier.deliver(notice).await {
                    warn!(error = %e, "failed to deliver permission request notice");
                }
            }
            // Already logged by the route resolution; the request stays
            // pending until an approver appears.
            ApprovalRoute::Unreachable => {}
        }

        Ok(permission)
    }

    /// Approve a pending request.
    ///
    /// Only actors managing the target group may grant. An unauthorized
    /// attempt changes nothing and notifies nobody.
    pub async fn grant(
        &self,
        actor_id: &str,
        permission_id: &str,
    ) -> AppResult<user_permission::Model> {
        let permission = self.permission_repo.get_by_id(permission_id).await?;

        if !self
            .authz
            .has_group_permission(actor_id, &permission.group_id)
            .await?
        {
            return Err(AppError::Unauthorized);
        }
        if permission.granted {
            return Err(AppError::InvalidState(format!(
                "Permission {permission_id} is already granted"
            )));
        }

        let subject = self.user_repo.get_by_id(&permission.user_id).await?;
        let group = self.group_repo.get_by_id(&permission.group_id).await?;

        let mut active: user_permission::ActiveModel = permission.into();
        active.granted = Set(true);
        let updated = self.permission_repo.update(active).await?;

        info!(
            user_id = %subject.id,
            group_id = %group.id,
            granted_by = %actor_id,
            "permission granted"
        );

        let (cc, bcc) = self.change_recipients(&updated).await?;
        let notice = self.notices.permission_granted(&subject, &group, cc, bcc);
        if let Err(e) = self.notifier.deliver(notice).await {
            warn!(error = %e, "failed to deliver grant notice");
        }

        Ok(updated)
    }

    /// Delete a permission row, pending or granted.
    ///
    /// Allowed for the subject itself and for anyone managing the target
    /// group (which includes every superuser).
    pub async fn revoke(&self, actor_id: &str, permission_id: &str) -> AppResult<()> {
        let permission = self.permission_repo.get_by_id(permission_id).await?;

        let allowed = actor_id == permission.user_id
            || self
                .authz
                .has_group_permission(actor_id, &permission.group_id)
                .await?;
        if !allowed {
            return Err(AppError::Unauthorized);
        }

        let subject = self.user_repo.get_by_id(&permission.user_id).await?;
        let group = self.group_repo.get_by_id(&permission.group_id).await?;
        // Recipients are computed while the row still exists.
        let (cc, bcc) = self.change_recipients(&permission).await?;

        self.permission_repo.delete(&permission.id).await?;

        info!(
            user_id = %subject.id,
            group_id = %group.id,
            revoked_by = %actor_id,
            "permission revoked"
        );

        let notice = self
            .notices
            .permission_revoked(&subject, &group.display_name(), cc, bcc);
        if let Err(e) = self.notifier.deliver(notice).await {
            warn!(error = %e, "failed to deliver revocation notice");
        }

        Ok(())
    }

    /// Pending requests the actor is entitled to approve.
    pub async fn pending_for(&self, actor_id: &str) -> AppResult<Vec<user_permission::Model>> {
        let managed = self.authz.managed_groups(actor_id).await?;
        let ids: Vec<String> = managed.into_iter().map(|g| g.id).collect();
        self.permission_repo.find_pending_by_group_ids(&ids).await
    }

    /// All permission rows of one user, pending and granted.
    pub async fn list_for_user(&self, user_id: &str) -> AppResult<Vec<user_permission::Model>> {
        self.permission_repo.find_by_user(user_id).await
    }

    /// Manager chain and superuser set for a change notice concerning the
    /// given row. The subject is dropped from the cc list since the notice
    /// goes to them directly.
    async fn change_recipients(
        &self,
        permission: &user_permission::Model,
    ) -> AppResult<(Vec<String>, Vec<String>)> {
        let cc: Vec<String> = self
            .authz
            .grantable_users(permission)
            .await?
            .into_iter()
            .map(|u| u.id)
            .filter(|id| id != &permission.user_id)
            .collect();
        let bcc: Vec<String> = self
            .user_repo
            .find_superusers()
            .await?
            .into_iter()
            .map(|u| u.id)
            .collect();
        Ok((cc, bcc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::notification::{Notice, Notifier};
    use async_trait::async_trait;
    use scoutreg_db::entities::{group, user};
    use scoutreg_db::repositories::EventRepository;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingNotifier {
        sent: Arc<Mutex<Vec<Notice>>>,
    }

    impl RecordingNotifier {
        fn notices(&self) -> Vec<Notice> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn deliver(&self, notice: Notice) -> AppResult<()> {
            self.sent.lock().unwrap().push(notice);
            Ok(())
        }
    }

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

    struct TestHarness {
        service: PermissionService,
        notifier: RecordingNotifier,
    }

    fn harness(
        group_db: sea_orm::DatabaseConnection,
        user_db: sea_orm::DatabaseConnection,
        perm_db: sea_orm::DatabaseConnection,
    ) -> TestHarness {
        let group_repo = GroupRepository::new(Arc::new(group_db));
        let user_repo = UserRepository::new(Arc::new(user_db));
        let permission_repo = PermissionRepository::new(Arc::new(perm_db));
        let event_repo = EventRepository::new(Arc::new(
            MockDatabase::new(DatabaseBackend::Postgres).into_connection(),
        ));
        let authz = AuthorizationService::new(
            group_repo.clone(),
            event_repo,
            user_repo.clone(),
            permission_repo.clone(),
        );
        let notifier = RecordingNotifier::default();
        let service = PermissionService::new(
            permission_repo,
            user_repo,
            group_repo,
            authz,
            Arc::new(notifier.clone()),
            NoticeBuilder::new("ScoutTag", "https://scouttag.example.org"),
        );
        TestHarness { service, notifier }
    }

    #[tokio::test]
    async fn test_request_creates_pending_and_notifies_managers() {
        // Forest a(b); manager m is granted on a; alice requests b.
        let group_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![grp("b", Some("a"))]])
            .append_query_results([vec![grp("a", None), grp("b", Some("a"))]])
            .into_connection();
        let user_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![usr("alice@example.org", false)]])
            .append_query_results([vec![usr("m@example.org", false)]])
            .into_connection();
        let perm_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<user_permission::Model>::new()])
            .append_query_results([vec![perm("p1", "alice@example.org", "b", false)]])
            .append_query_results([vec![perm("pm", "m@example.org", "a", true)]])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();

        let t = harness(group_db, user_db, perm_db);
        let created = t
            .service
            .request("alice@example.org", "b")
            .await
            .unwrap();

        assert!(!created.granted);
        let notices = t.notifier.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].to, vec!["m@example.org"]);
        assert!(notices[0].subject.contains("Permission requested"));
    }

    #[tokio::test]
    async fn test_duplicate_request_is_rejected() {
        let group_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![grp("b", Some("a"))]])
            .into_connection();
        let user_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![usr("alice@example.org", false)]])
            .into_connection();
        let perm_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![perm("p1", "alice@example.org", "b", false)]])
            .into_connection();

        let t = harness(group_db, user_db, perm_db);
        match t.service.request("alice@example.org", "b").await {
            Err(AppError::Conflict(_)) => {}
            other => panic!("Expected Conflict, got {other:?}"),
        }
        assert!(t.notifier.notices().is_empty());
    }

    #[tokio::test]
    async fn test_unauthorized_grant_changes_nothing() {
        // Stranger x holds no grants anywhere.
        let group_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![grp("a", None), grp("b", Some("a"))]])
            .into_connection();
        let user_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![usr("x@example.org", false)]])
            .into_connection();
        let perm_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![perm("p1", "alice@example.org", "b", false)]])
            .append_query_results([Vec::<user_permission::Model>::new()])
            .into_connection();

        let t = harness(group_db, user_db, perm_db);
        match t.service.grant("x@example.org", "p1").await {
            Err(AppError::Unauthorized) => {}
            other => panic!("Expected Unauthorized, got {other:?}"),
        }
        assert!(t.notifier.notices().is_empty());
    }

    #[tokio::test]
    async fn test_granting_twice_is_invalid_state() {
        let group_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![grp("a", None), grp("b", Some("a"))]])
            .into_connection();
        let user_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![usr("root@example.org", true)]])
            .into_connection();
        let perm_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![perm("p1", "alice@example.org", "b", true)]])
            .append_query_results([Vec::<user_permission::Model>::new()])
            .into_connection();

        let t = harness(group_db, user_db, perm_db);
        match t.service.grant("root@example.org", "p1").await {
            Err(AppError::InvalidState(_)) => {}
            other => panic!("Expected InvalidState, got {other:?}"),
        }
        assert!(t.notifier.notices().is_empty());
    }

    #[tokio::test]
    async fn test_grant_notifies_subject_with_chain_copied() {
        // Manager m (granted on a) approves alice's request on b.
        let group_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![grp("a", None), grp("b", Some("a"))]])
            .append_query_results([vec![grp("b", Some("a"))]])
            .append_query_results([vec![grp("a", None), grp("b", Some("a"))]])
            .into_connection();
        let user_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![usr("m@example.org", false)]])
            .append_query_results([vec![usr("alice@example.org", false)]])
            .append_query_results([vec![
                usr("m@example.org", false),
                usr("alice@example.org", false),
            ]])
            .append_query_results([vec![usr("root@example.org", true)]])
            .into_connection();
        let perm_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![perm("p1", "alice@example.org", "b", false)]])
            .append_query_results([vec![perm("pm", "m@example.org", "a", true)]])
            .append_query_results([vec![perm("p1", "alice@example.org", "b", true)]])
            .append_query_results([vec![
                perm("pm", "m@example.org", "a", true),
                perm("p1", "alice@example.org", "b", true),
            ]])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();

        let t = harness(group_db, user_db, perm_db);
        let granted = t.service.grant("m@example.org", "p1").await.unwrap();

        assert!(granted.granted);
        let notices = t.notifier.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].to, vec!["alice@example.org"]);
        assert_eq!(notices[0].cc, vec!["m@example.org"]);
        assert_eq!(notices[0].bcc, vec!["root@example.org"]);
    }

    #[tokio::test]
    async fn test_subject_can_revoke_own_permission() {
        let group_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![grp("b", Some("a"))]])
            .append_query_results([vec![grp("a", None), grp("b", Some("a"))]])
            .into_connection();
        let user_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![usr("alice@example.org", false)]])
            .append_query_results([vec![usr("m@example.org", false)]])
            .append_query_results([vec![usr("root@example.org", true)]])
            .into_connection();
        let perm_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![perm("p1", "alice@example.org", "b", true)]])
            .append_query_results([vec![
                perm("pm", "m@example.org", "a", true),
                perm("p1", "alice@example.org", "b", true),
            ]])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();

        let t = harness(group_db, user_db, perm_db);
        t.service
            .revoke("alice@example.org", "p1")
            .await
            .unwrap();

        let notices = t.notifier.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].to, vec!["alice@example.org"]);
        assert_eq!(notices[0].cc, vec!["m@example.org"]);
        assert!(notices[0].body.contains("has been removed"));
    }

    #[tokio::test]
    async fn test_stranger_cannot_revoke() {
        let group_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![grp("a", None), grp("b", Some("a"))]])
            .into_connection();
        let user_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![usr("x@example.org", false)]])
            .into_connection();
        let perm_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![perm("p1", "alice@example.org", "b", true)]])
            .append_query_results([Vec::<user_permission::Model>::new()])
            .into_connection();

        let t = harness(group_db, user_db, perm_db);
        match t.service.revoke("x@example.org", "p1").await {
            Err(AppError::Unauthorized) => {}
            other => panic!("Expected Unauthorized, got {other:?}"),
        }
        assert!(t.notifier.notices().is_empty());
    }
}
