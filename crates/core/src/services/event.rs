//! Event service.
//!
//! Events are owned by exactly one group; every write goes through
//! `HasGroupPermission` on that group. The end-after-start rule is
//! checked here at write time, not by the data model.

use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::Set;
use serde::Deserialize;
use tracing::info;
use validator::Validate;

use scoutreg_common::{AppError, AppResult, IdGenerator};
use scoutreg_db::entities::event;
use scoutreg_db::repositories::{EventRepository, GroupRepository};

use crate::services::authorization::AuthorizationService;

/// Event service for business logic.
#[derive(Clone)]
pub struct EventService {
    event_repo: EventRepository,
    group_repo: GroupRepository,
    authz: AuthorizationService,
    id_gen: IdGenerator,
}

/// Input for creating an event.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateEventInput {
    /// Group that owns the event.
    pub group_id: String,

    #[validate(length(min = 1, max = 120))]
    pub title: String,

    #[validate(email, length(max = 120))]
    pub email: Option<String>,

    #[validate(length(max = 40))]
    pub tel: Option<String>,

    pub lat: Option<f64>,
    pub lon: Option<f64>,

    pub starts_at: DateTime<FixedOffset>,
    pub ends_at: Option<DateTime<FixedOffset>>,

    #[validate(length(max = 2000))]
    pub description: Option<String>,

    pub photo: Option<Vec<u8>>,
}

/// Input for updating an event. Absent fields stay unchanged.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateEventInput {
    #[validate(length(min = 1, max = 120))]
    pub title: Option<String>,

    #[validate(email, length(max = 120))]
    pub email: Option<String>,

    #[validate(length(max = 40))]
    pub tel: Option<String>,

    pub lat: Option<f64>,
    pub lon: Option<f64>,

    pub starts_at: Option<DateTime<FixedOffset>>,
    pub ends_at: Option<DateTime<FixedOffset>>,

    #[validate(length(max = 2000))]
    pub description: Option<String>,

    pub photo: Option<Vec<u8>>,
}

fn check_dates(
    starts_at: DateTime<FixedOffset>,
    ends_at: Option<DateTime<FixedOffset>>,
) -> AppResult<()> {
    if let Some(end) = ends_at {
        if end < starts_at {
            return Err(AppError::Validation(
                "Event must not end before it starts".to_string(),
            ));
        }
    }
    Ok(())
}

impl EventService {
    /// Create a new event service.
    #[must_use]
    pub fn new(
        event_repo: EventRepository,
        group_repo: GroupRepository,
        authz: AuthorizationService,
    ) -> Self {
        Self {
            event_repo,
            group_repo,
            authz,
            id_gen: IdGenerator::new(),
        }
    }

    /// Get an event by id.
    pub async fn get(&self, id: &str) -> AppResult<event::Model> {
        self.event_repo.get_by_id(id).await
    }

    /// Events of a single group, soonest first. Public listing, no
    /// authorization required.
    pub async fn list_for_group(&self, group_id: &str) -> AppResult<Vec<event::Model>> {
        self.group_repo.get_by_id(group_id).await?;
        self.event_repo.find_by_group_id(group_id).await
    }

    /// Events that are not over at the given cutoff, soonest first.
    pub async fn list_current(
        &self,
        cutoff: DateTime<FixedOffset>,
    ) -> AppResult<Vec<event::Model>> {
        self.event_repo.find_current(cutoff).await
    }

    /// Create an event under a group the actor manages.
    pub async fn create(&self, actor_id: &str, input: CreateEventInput) -> AppResult<event::Model> {
        input.validate()?;
        check_dates(input.starts_at, input.ends_at)?;

        self.group_repo.get_by_id(&input.group_id).await?;
        if !self
            .authz
            .has_group_permission(actor_id, &input.group_id)
            .await?
        {
            return Err(AppError::Unauthorized);
        }

        let created = self
            .event_repo
            .create(event::ActiveModel {
                id: Set(self.id_gen.generate()),
                group_id: Set(input.group_id),
                title: Set(input.title),
                email: Set(input.email),
                tel: Set(input.tel),
                lat: Set(input.lat),
                lon: Set(input.lon),
                starts_at: Set(input.starts_at),
                ends_at: Set(input.ends_at),
                description: Set(input.description),
                photo: Set(input.photo),
                created_at: Set(Utc::now().fixed_offset()),
                updated_at: Set(None),
            })
            .await?;

        info!(
            event_id = %created.id,
            group_id = %created.group_id,
            created_by = %actor_id,
            "event created"
        );
        Ok(created)
    }

    /// Update an event.
    pub async fn update(
        &self,
        actor_id: &str,
        event_id: &str,
        input: UpdateEventInput,
    ) -> AppResult<event::Model> {
        input.validate()?;

        let existing = self.event_repo.get_by_id(event_id).await?;
        if !self
            .authz
            .has_group_permission(actor_id, &existing.group_id)
            .await?
        {
            return Err(AppError::Unauthorized);
        }

        let starts_at = input.starts_at.unwrap_or(existing.starts_at);
        let ends_at = input.ends_at.or(existing.ends_at);
        check_dates(starts_at, ends_at)?;

        let mut active: event::ActiveModel = existing.into();
        if let Some(title) = input.title {
            active.title = Set(title);
        }
        if let Some(email) = input.email {
            active.email = Set(Some(email));
        }
        if let Some(tel) = input.tel {
            active.tel = Set(Some(tel));
        }
        if let Some(lat) = input.lat {
            active.lat = Set(Some(lat));
        }
        if let Some(lon) = input.lon {
            active.lon = Set(Some(lon));
        }
        if let Some(at) = input.starts_at {
            active.starts_at = Set(at);
        }
        if let Some(at) = input.ends_at {
            active.ends_at = Set(Some(at));
        }
        if let Some(description) = input.description {
            active.description = Set(Some(description));
        }
        if let Some(photo) = input.photo {
            active.photo = Set(Some(photo));
        }
        active.updated_at = Set(Some(Utc::now().fixed_offset()));

        let updated = self.event_repo.update(active).await?;
        info!(event_id = %updated.id, updated_by = %actor_id, "event updated");
        Ok(updated)
    }

    /// Delete an event.
    pub async fn delete(&self, actor_id: &str, event_id: &str) -> AppResult<()> {
        let existing = self.event_repo.get_by_id(event_id).await?;
        if !self
            .authz
            .has_group_permission(actor_id, &existing.group_id)
            .await?
        {
            return Err(AppError::Unauthorized);
        }

        self.event_repo.delete(event_id).await?;
        info!(
            event_id,
            group_id = %existing.group_id,
            deleted_by = %actor_id,
            "event deleted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use scoutreg_db::entities::{group, user, user_permission};
    use scoutreg_db::repositories::{PermissionRepository, UserRepository};
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

    fn evt(id: &str, group_id: &str) -> event::Model {
        let starts = chrono::Utc::now().fixed_offset();
        event::Model {
            id: id.to_string(),
            group_id: group_id.to_string(),
            title: "Sommerlager".to_string(),
            email: None,
            tel: None,
            lat: None,
            lon: None,
            starts_at: starts,
            ends_at: Some(starts + Duration::days(7)),
            description: None,
            photo: None,
            created_at: starts,
            updated_at: None,
        }
    }

    fn service_with(
        event_db: sea_orm::DatabaseConnection,
        group_db: sea_orm::DatabaseConnection,
        user_db: sea_orm::DatabaseConnection,
        perm_db: sea_orm::DatabaseConnection,
    ) -> EventService {
        let group_repo = GroupRepository::new(Arc::new(group_db));
        let event_repo = EventRepository::new(Arc::new(event_db));
        let user_repo = UserRepository::new(Arc::new(user_db));
        let permission_repo = PermissionRepository::new(Arc::new(perm_db));
        let authz = AuthorizationService::new(
            group_repo.clone(),
            event_repo.clone(),
            user_repo,
            permission_repo,
        );
        EventService::new(event_repo, group_repo, authz)
    }

    fn create_input(group_id: &str) -> CreateEventInput {
        let starts = chrono::Utc::now().fixed_offset();
        CreateEventInput {
            group_id: group_id.to_string(),
            title: "Sommerlager".to_string(),
            email: Some("lager@example.org".to_string()),
            tel: None,
            lat: None,
            lon: None,
            starts_at: starts,
            ends_at: Some(starts + Duration::days(7)),
            description: Some("Eine Woche Zelten.".to_string()),
            photo: None,
        }
    }

    #[test]
    fn test_end_before_start_is_rejected() {
        let starts = chrono::Utc::now().fixed_offset();
        let result = check_dates(starts, Some(starts - Duration::hours(1)));
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(check_dates(starts, Some(starts)).is_ok());
        assert!(check_dates(starts, None).is_ok());
    }

    #[tokio::test]
    async fn test_manager_creates_event() {
        let event_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![evt("e1", "b")]])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();
        let group_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![grp("b", Some("a"))]])
            .append_query_results([vec![grp("a", None), grp("b", Some("a"))]])
            .into_connection();
        let user_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![usr("m@example.org", false)]])
            .into_connection();
        let perm_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![perm("p1", "m@example.org", "a", true)]])
            .into_connection();

        let service = service_with(event_db, group_db, user_db, perm_db);
        let created = service
            .create("m@example.org", create_input("b"))
            .await
            .unwrap();
        assert_eq!(created.group_id, "b");
    }

    #[tokio::test]
    async fn test_stranger_cannot_create_event() {
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
            MockDatabase::new(DatabaseBackend::Postgres).into_connection(),
            group_db,
            user_db,
            perm_db,
        );
        match service.create("x@example.org", create_input("b")).await {
            Err(AppError::Unauthorized) => {}
            other => panic!("Expected Unauthorized, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_under_unknown_group() {
        let group_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<group::Model>::new()])
            .into_connection();
        let service = service_with(
            MockDatabase::new(DatabaseBackend::Postgres).into_connection(),
            group_db,
            MockDatabase::new(DatabaseBackend::Postgres).into_connection(),
            MockDatabase::new(DatabaseBackend::Postgres).into_connection(),
        );
        match service.create("m@example.org", create_input("ghost")).await {
            Err(AppError::GroupNotFound(_)) => {}
            other => panic!("Expected GroupNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_update_checks_moved_dates() {
        // Moving the start past the stored end must fail.
        let event_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![evt("e1", "b")]])
            .into_connection();
        let group_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![grp("a", None), grp("b", Some("a"))]])
            .into_connection();
        let user_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![usr("m@example.org", false)]])
            .into_connection();
        let perm_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![perm("p1", "m@example.org", "b", true)]])
            .into_connection();

        let service = service_with(event_db, group_db, user_db, perm_db);
        let input = UpdateEventInput {
            starts_at: Some(chrono::Utc::now().fixed_offset() + Duration::days(30)),
            ..Default::default()
        };
        match service.update("m@example.org", "e1", input).await {
            Err(AppError::Validation(_)) => {}
            other => panic!("Expected Validation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_manager_deletes_event() {
        let event_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![evt("e1", "b")]])
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();
        let group_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![grp("a", None), grp("b", Some("a"))]])
            .into_connection();
        let user_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![usr("m@example.org", false)]])
            .into_connection();
        let perm_db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![perm("p1", "m@example.org", "a", true)]])
            .into_connection();

        let service = service_with(event_db, group_db, user_db, perm_db);
        service.delete("m@example.org", "e1").await.unwrap();
    }
}
